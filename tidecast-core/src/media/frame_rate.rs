//! Frame rate parsing for container metadata.
//!
//! Containers report frame rates as rationals such as `30000/1001`. The value
//! comes from untrusted input and is only ever split and divided, never
//! evaluated.

/// Parses a frame rate given as `numerator/denominator` or a plain decimal.
///
/// Returns `None` for zero denominators, non-finite or non-positive results,
/// and any text that is not exactly one of those two forms.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let rate = match raw.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator = parse_component(numerator)?;
            let denominator = parse_component(denominator)?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => parse_component(raw)?,
    };

    (rate.is_finite() && rate > 0.0).then_some(rate)
}

// Digits with at most one decimal point; rejects signs, exponents, "inf" and "NaN"
fn parse_component(text: &str) -> Option<f64> {
    let text = text.trim();
    let mut seen_point = false;
    let well_formed = !text.is_empty()
        && text.chars().all(|c| match c {
            '0'..='9' => true,
            '.' if !seen_point => {
                seen_point = true;
                true
            }
            _ => false,
        });

    if !well_formed || text == "." {
        return None;
    }
    text.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_common_rates() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert_eq!(parse_frame_rate("24"), Some(24.0));
        assert_eq!(parse_frame_rate(" 50/2 "), Some(25.0));

        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_rejects_degenerate_rates() {
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("25/0"), None);
        assert_eq!(parse_frame_rate("0/1"), None);
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("/"), None);
        assert_eq!(parse_frame_rate("inf"), None);
        assert_eq!(parse_frame_rate("NaN/1"), None);
    }

    #[test]
    fn test_rejects_expressions() {
        assert_eq!(parse_frame_rate("1+1"), None);
        assert_eq!(parse_frame_rate("2*3/1"), None);
        assert_eq!(parse_frame_rate("30/1/1"), None);
        assert_eq!(parse_frame_rate("-30/1"), None);
        assert_eq!(parse_frame_rate("1e3/1"), None);
        assert_eq!(parse_frame_rate("process.exit()"), None);
    }

    proptest! {
        #[test]
        fn prop_rational_matches_division(num in 1u32..1_000_000, den in 1u32..1_000_000) {
            let parsed = parse_frame_rate(&format!("{num}/{den}")).unwrap();
            let expected = f64::from(num) / f64::from(den);
            prop_assert!((parsed - expected).abs() <= f64::EPSILON * expected.max(1.0));
        }

        #[test]
        fn prop_arbitrary_text_never_panics(raw in ".{0,32}") {
            if let Some(rate) = parse_frame_rate(&raw) {
                prop_assert!(rate.is_finite() && rate > 0.0);
            }
        }
    }
}
