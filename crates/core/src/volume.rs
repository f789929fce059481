//! Conversions between the receiver's dB scale and the UI scales.
//!
//! The media player uses 0..100 percent for -80..0 dB. The receiver protocol
//! itself uses an absolute 0..98 scale for -80..+18 dB.

pub const MIN_VOLUME_DB: f64 = -80.0;
pub const MAX_VOLUME_DB: f64 = 0.0;
pub const MAX_ABSOLUTE_VOLUME: f64 = 98.0;

/// Affine map of `value` from `[in_min, in_max]` to `[out_min, out_max]`.
pub fn map_range(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (value - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

/// dB (-80..0) to media player percent (0..100).
pub fn volume_to_percent(volume_db: f64) -> f64 {
    let clamped = volume_db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB);
    map_range(clamped, MIN_VOLUME_DB, MAX_VOLUME_DB, 0.0, 100.0)
}

/// Media player percent (0..100) to dB (-80..0).
pub fn percent_to_volume(percent: f64) -> f64 {
    let clamped = percent.clamp(0.0, 100.0);
    map_range(clamped, 0.0, 100.0, MIN_VOLUME_DB, MAX_VOLUME_DB)
}

/// Relative dB (-80..+18) to the absolute 0..98 scale.
pub fn relative_volume_to_absolute(relative: f64) -> f64 {
    (relative + 80.0).clamp(0.0, MAX_ABSOLUTE_VOLUME)
}

/// Absolute 0..98 scale to relative dB (-80..+18).
pub fn absolute_volume_to_relative(absolute: f64) -> f64 {
    absolute.clamp(0.0, MAX_ABSOLUTE_VOLUME) - 80.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_relative_to_absolute() {
        assert_eq!(relative_volume_to_absolute(-70.0), 10.0);
        assert_eq!(relative_volume_to_absolute(-100.0), 0.0);
        assert_eq!(relative_volume_to_absolute(18.5), 98.0);
        assert_eq!(relative_volume_to_absolute(-30.5), 49.5);
    }

    #[test]
    fn test_absolute_to_relative() {
        assert_eq!(absolute_volume_to_relative(10.0), -70.0);
        assert_eq!(absolute_volume_to_relative(-5.0), -80.0);
        assert_eq!(absolute_volume_to_relative(120.0), 18.0);
    }

    #[test]
    fn test_percent_mapping() {
        assert!(approx(volume_to_percent(-80.0), 0.0));
        assert!(approx(volume_to_percent(-40.0), 50.0));
        assert!(approx(volume_to_percent(0.0), 100.0));
        assert!(approx(volume_to_percent(12.0), 100.0));
        assert!(approx(volume_to_percent(-95.0), 0.0));

        assert!(approx(percent_to_volume(25.0), -60.0));
        assert!(approx(percent_to_volume(150.0), 0.0));
        assert!(approx(percent_to_volume(-1.0), -80.0));
    }

    #[test]
    fn test_round_trip_inside_range() {
        for db in [-79.5, -55.0, -32.5, -0.5] {
            assert!(approx(percent_to_volume(volume_to_percent(db)), db));
            assert!(approx(absolute_volume_to_relative(relative_volume_to_absolute(db)), db));
        }
    }

    #[test]
    fn test_map_range() {
        assert!(approx(map_range(5.0, 0.0, 10.0, 0.0, 100.0), 50.0));
        assert!(approx(map_range(-20.0, -80.0, 0.0, 0.0, 100.0), 75.0));
    }
}
