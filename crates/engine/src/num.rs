//! Canonical numeric parsing and formatting.
//!
//! All numeric storage is ASCII decimal so that INCR semantics and wire
//! interop are deterministic. Parsing is strict: the whole byte string
//! must be the number, no surrounding whitespace.

use quartz_core::error::{Error, Result};

/// Parse a stored or supplied value as a signed integer.
pub fn parse_i64(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::parse("value is not an integer or out of range"))
}

/// Parse a stored or supplied value as a float.
pub fn parse_f64(bytes: &[u8]) -> Result<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .ok_or_else(|| Error::parse("value is not a valid float"))
}

/// Canonical integer form.
pub fn fmt_i64(v: i64) -> Vec<u8> {
    v.to_string().into_bytes()
}

/// Canonical unsigned form (counters).
pub fn fmt_u64(v: u64) -> Vec<u8> {
    v.to_string().into_bytes()
}

/// Parse a counter entry; absent counters read as zero.
pub fn parse_u64(bytes: &[u8]) -> Result<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| Error::corruption("counter entry is not a decimal"))
}

/// Canonical float form: shortest representation that round-trips, with
/// integral values rendered without a fractional part.
pub fn fmt_f64(v: f64) -> Vec<u8> {
    format!("{}", v).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_i64_strict() {
        assert_eq!(parse_i64(b"42").unwrap(), 42);
        assert_eq!(parse_i64(b"-7").unwrap(), -7);
        assert!(parse_i64(b" 42").is_err());
        assert!(parse_i64(b"42x").is_err());
        assert!(parse_i64(b"3.5").is_err());
        assert!(parse_i64(b"").is_err());
    }

    #[test]
    fn test_parse_f64_rejects_nan() {
        assert_eq!(parse_f64(b"1.5").unwrap(), 1.5);
        assert_eq!(parse_f64(b"-2e3").unwrap(), -2000.0);
        assert!(parse_f64(b"nan").is_err());
        assert!(parse_f64(b"abc").is_err());
    }

    #[test]
    fn test_fmt_round_trip() {
        assert_eq!(fmt_i64(-15), b"-15".to_vec());
        assert_eq!(fmt_f64(14.0), b"14".to_vec());
        assert_eq!(fmt_f64(10.5), b"10.5".to_vec());
        assert_eq!(parse_f64(&fmt_f64(0.1)).unwrap(), 0.1);
    }
}
