//! Property tests for the sexagesimal parser and formatters

use lx200_mount::protocol::{format_hms, format_signed_dms, parse_sexagesimal};
use proptest::prelude::*;

proptest! {
    #[test]
    fn parser_never_panics(raw in proptest::collection::vec(any::<u8>(), 0..24)) {
        let _ = parse_sexagesimal(&raw);
    }

    #[test]
    fn formatted_degrees_parse_back(value in -89.999f64..89.999) {
        let formatted = format_signed_dms(value);
        let parsed = parse_sexagesimal(formatted.as_bytes()).unwrap();
        // formatting rounds to one arcsecond
        prop_assert!((parsed - value).abs() <= 0.5 / 3600.0 + 1e-9, "{value} -> {formatted} -> {parsed}");
    }

    #[test]
    fn formatted_hours_parse_back(value in 0.0f64..360.0) {
        let formatted = format_hms(value);
        let parsed = parse_sexagesimal(formatted.as_bytes()).unwrap();
        // formatting rounds to one second of time, so the error is at most
        // half of 15 arcseconds (plus the wrap at 24h)
        let raw = (parsed - value).rem_euclid(360.0);
        let diff = raw.min(360.0 - raw);
        prop_assert!(diff <= 7.5 / 3600.0 + 1e-9, "{value} -> {formatted} -> {parsed}");
    }
}
