//! Media metadata: what a source contains and whether it plays natively.

pub mod frame_rate;
pub mod metadata;
pub mod probe;

pub use frame_rate::parse_frame_rate;
pub use metadata::{FfprobeOutput, MediaMetadata, is_mobile_compatible};
pub use probe::{FfprobeProber, FormatProber, ProbeError, ProbeResult};
