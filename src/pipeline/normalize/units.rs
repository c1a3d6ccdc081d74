//! Canonical unit table. Every height leaves the normalizer in meters.

/// Meters per one of the given unit, or `None` when the unit is unknown.
pub fn meters_per(unit: &str) -> Option<f64> {
    let unit = unit.trim().to_ascii_lowercase();
    let factor = match unit.trim_end_matches('.') {
        "m" | "meter" | "meters" | "metre" | "metres" | "metric" => 1.0,
        "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => 0.01,
        "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => 0.001,
        "ft" | "foot" | "feet" | "english" => 0.3048,
        "in" | "inch" | "inches" => 0.0254,
        _ => return None,
    };
    Some(factor)
}

/// Convert a height to meters.
pub fn height_to_meters(value: f64, unit: &str) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    meters_per(unit).map(|factor| value * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meters_pass_through_unchanged() {
        assert_eq!(height_to_meters(1.2, "m"), Some(1.2));
        assert_eq!(height_to_meters(1.2, " Meters "), Some(1.2));
    }

    #[test]
    fn test_imperial_and_metric_conversions() {
        let ft = height_to_meters(10.0, "ft").unwrap();
        assert!((ft - 3.048).abs() < 1e-9);
        let cm = height_to_meters(150.0, "cm").unwrap();
        assert!((cm - 1.5).abs() < 1e-9);
        let inches = height_to_meters(12.0, "in.").unwrap();
        assert!((inches - 0.3048).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_unit_and_non_finite_values() {
        assert_eq!(height_to_meters(1.0, "fathoms"), None);
        assert_eq!(height_to_meters(1.0, ""), None);
        assert_eq!(height_to_meters(f64::NAN, "m"), None);
    }
}
