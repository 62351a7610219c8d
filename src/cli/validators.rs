//! CLI argument validators.
//!
//! Shared validation functions for CLI argument parsing.

/// Parse and validate confidence value (0.0-1.0).
pub fn parse_confidence(s: &str) -> Result<f64, String> {
    parse_bounded_float(s, 0.0, 1.0, "confidence")
}

/// Parse and validate a bounded float value.
///
/// # Arguments
///
/// * `s` - The string to parse
/// * `min` - Minimum allowed value (inclusive)
/// * `max` - Maximum allowed value (inclusive)
/// * `name` - Name of the parameter for error messages
pub fn parse_bounded_float(s: &str, min: f64, max: f64, name: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !(min..=max).contains(&value) {
        return Err(format!(
            "{name} must be between {min} and {max}, got {value}"
        ));
    }

    Ok(value)
}

/// Parse and validate latitude value (-90.0 to 90.0).
pub fn parse_latitude(s: &str) -> Result<f64, String> {
    parse_bounded_float(s, -90.0, 90.0, "latitude")
}

/// Parse and validate longitude value (-180.0 to 180.0).
pub fn parse_longitude(s: &str) -> Result<f64, String> {
    parse_bounded_float(s, -180.0, 180.0, "longitude")
}

/// Parse a finite value greater than zero.
pub fn parse_positive_float(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !value.is_finite() || value <= 0.0 {
        return Err(format!("value must be greater than 0, got {value}"));
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confidence_valid() {
        assert_eq!(parse_confidence("0.5").ok(), Some(0.5));
        assert_eq!(parse_confidence("0.0").ok(), Some(0.0));
        assert_eq!(parse_confidence("1.0").ok(), Some(1.0));
    }

    #[test]
    fn test_parse_confidence_invalid() {
        assert!(parse_confidence("1.1").is_err());
        assert!(parse_confidence("-0.1").is_err());
        assert!(parse_confidence("abc").is_err());
    }

    #[test]
    fn test_parse_bounded_float_invalid_range() {
        let err = parse_bounded_float("101.0", -100.0, 100.0, "test");
        assert!(err.unwrap_err().contains("test must be between"));
    }

    #[test]
    fn test_parse_coordinates() {
        assert_eq!(parse_latitude("-90.0").ok(), Some(-90.0));
        assert!(parse_latitude("90.5").is_err());
        assert_eq!(parse_longitude("180").ok(), Some(180.0));
        assert!(parse_longitude("-181").is_err());
    }

    #[test]
    fn test_parse_positive_float() {
        assert_eq!(parse_positive_float("0.5").ok(), Some(0.5));
        assert!(parse_positive_float("0").is_err());
        assert!(parse_positive_float("-1").is_err());
        assert!(parse_positive_float("inf").is_err());
        assert!(parse_positive_float("x").unwrap_err().contains("not a valid number"));
    }
}
