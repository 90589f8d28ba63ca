//! Integration tests for Tidecast
//!
//! Drive the full router with in-memory upstreams and the simulated engine,
//! plus a real ffmpeg round trip when the binaries are installed.

#[path = "integration/support.rs"]
mod support;

#[path = "integration/relay_endpoints.rs"]
mod relay_endpoints;
#[path = "integration/resource_release.rs"]
mod resource_release;
#[path = "integration/ffmpeg_round_trip.rs"]
mod ffmpeg_round_trip;
