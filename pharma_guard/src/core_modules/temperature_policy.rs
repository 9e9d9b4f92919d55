//! Numeric temperature policy.
//!
//! A reading is judged against the batch's nominal maximum plus a tolerance that
//! absorbs sensor and transit noise. The limit itself is still allowed: only a
//! reading strictly above `max_safe + tolerance` exceeds it.

use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};

/// Margin (°C) above the nominal maximum before a reading invalidates a batch.
pub const DEFAULT_TOLERANCE_CELSIUS: f64 = 5.0;

/// Where a reading sits relative to the batch thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureBand {
    /// At or below the nominal maximum.
    WithinRange,
    /// Above the nominal maximum but inside the tolerance.
    Warning,
    /// Above `max_safe + tolerance`.
    Exceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureVerdict {
    pub within_range: bool,
    pub exceeds_limit: bool,
    pub max_allowed: f64,
    pub band: TemperatureBand,
}

/// Evaluates one reading. Pure and total; threshold sanity is checked by
/// [`validate_thresholds`] where batches are created.
///
/// Cold excursions are not part of the invalidation rule, so `_min_safe` does not
/// influence the verdict.
pub fn evaluate(reading: f64, _min_safe: f64, max_safe: f64, tolerance: f64) -> TemperatureVerdict {
    let max_allowed = max_safe + tolerance;
    let exceeds_limit = reading > max_allowed;

    let band = if exceeds_limit {
        TemperatureBand::Exceeded
    } else if reading > max_safe {
        TemperatureBand::Warning
    } else {
        TemperatureBand::WithinRange
    };

    TemperatureVerdict {
        within_range: reading <= max_allowed,
        exceeds_limit,
        max_allowed,
        band,
    }
}

/// Rejects readings no sensor can produce. A NaN compares false against every
/// limit and would otherwise slip past the heat rule.
pub fn validate_reading(reading: f64) -> GuardResult<()> {
    if reading.is_finite() {
        Ok(())
    } else {
        Err(GuardError::InvalidReading(reading))
    }
}

/// Rejects thresholds that cannot describe a storage range.
pub fn validate_thresholds(min_safe: f64, max_safe: f64, tolerance: f64) -> GuardResult<()> {
    if !min_safe.is_finite() || !max_safe.is_finite() || min_safe >= max_safe {
        return Err(GuardError::InvalidRange { min: min_safe, max: max_safe });
    }
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(GuardError::InvalidTolerance(tolerance));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_inclusive() {
        let at_limit = evaluate(13.0, 2.0, 8.0, 5.0);
        assert!(at_limit.within_range);
        assert!(!at_limit.exceeds_limit);
        assert_eq!(at_limit.max_allowed, 13.0);
        assert_eq!(at_limit.band, TemperatureBand::Warning);

        let above = evaluate(13.0001, 2.0, 8.0, 5.0);
        assert!(above.exceeds_limit);
        assert!(!above.within_range);
        assert_eq!(above.band, TemperatureBand::Exceeded);
    }

    #[test]
    fn readings_above_the_limit_always_exceed() {
        for step in 1..200 {
            let reading = 13.0 + step as f64 * 0.37;
            assert!(evaluate(reading, 2.0, 8.0, 5.0).exceeds_limit, "{reading}");
        }
    }

    #[test]
    fn bands_split_at_nominal_maximum() {
        assert_eq!(evaluate(6.0, 2.0, 8.0, 5.0).band, TemperatureBand::WithinRange);
        assert_eq!(evaluate(8.0, 2.0, 8.0, 5.0).band, TemperatureBand::WithinRange);
        assert_eq!(evaluate(8.5, 2.0, 8.0, 5.0).band, TemperatureBand::Warning);
        // Cold readings do not trip the heat rule.
        assert!(evaluate(-20.0, 2.0, 8.0, 5.0).within_range);
    }

    #[test]
    fn zero_tolerance_uses_the_nominal_maximum() {
        let verdict = evaluate(8.1, 2.0, 8.0, 0.0);
        assert!(verdict.exceeds_limit);
        assert_eq!(verdict.max_allowed, 8.0);
    }

    #[test]
    fn non_finite_readings_are_never_within_range() {
        let nan = evaluate(f64::NAN, 2.0, 8.0, 5.0);
        assert!(!nan.within_range);
        assert!(!evaluate(f64::INFINITY, 2.0, 8.0, 5.0).within_range);

        assert!(validate_reading(13.0).is_ok());
        assert!(validate_reading(-40.0).is_ok());
        for reading in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                validate_reading(reading),
                Err(GuardError::InvalidReading(_))
            ));
        }
    }

    #[test]
    fn threshold_validation() {
        assert!(validate_thresholds(2.0, 8.0, 5.0).is_ok());
        assert!(matches!(
            validate_thresholds(8.0, 8.0, 5.0),
            Err(GuardError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_thresholds(9.0, 8.0, 5.0),
            Err(GuardError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_thresholds(f64::NAN, 8.0, 5.0),
            Err(GuardError::InvalidRange { .. })
        ));
        assert!(matches!(
            validate_thresholds(2.0, 8.0, -1.0),
            Err(GuardError::InvalidTolerance(_))
        ));
    }
}
