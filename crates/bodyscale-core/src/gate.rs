//! Plausibility check and debounce for stable readings.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use bodyscale_types::{
    AcceptedMeasurement, DecodedReading, MAX_PLAUSIBLE_WEIGHT_KG, MIN_PLAUSIBLE_WEIGHT_KG,
    round_weight,
};

use crate::error::{Error, Result};

/// Tuning for [`MeasurementGate`].
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Lowest accepted weight (inclusive).
    pub min_weight_kg: f64,
    /// Highest accepted weight (inclusive).
    pub max_weight_kg: f64,
    /// Minimum spacing between accepted measurements.
    pub debounce: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_weight_kg: MIN_PLAUSIBLE_WEIGHT_KG,
            max_weight_kg: MAX_PLAUSIBLE_WEIGHT_KG,
            debounce: Duration::from_millis(5000),
        }
    }
}

impl GateConfig {
    /// Set the accepted weight range.
    #[must_use]
    pub fn weight_range(mut self, min_kg: f64, max_kg: f64) -> Self {
        self.min_weight_kg = min_kg;
        self.max_weight_kg = max_kg;
        self
    }

    /// Set the debounce window.
    #[must_use]
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.min_weight_kg.is_finite() || !self.max_weight_kg.is_finite() {
            return Err(Error::invalid_config("weight bounds must be finite"));
        }
        if self.min_weight_kg < 0.0 {
            return Err(Error::invalid_config("min_weight_kg must be >= 0"));
        }
        if self.max_weight_kg <= self.min_weight_kg {
            return Err(Error::invalid_config(
                "max_weight_kg must be greater than min_weight_kg",
            ));
        }
        Ok(())
    }
}

/// What the gate did with a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// The reading passed; emit this measurement.
    Accepted(AcceptedMeasurement),
    /// The weight is implausible.
    OutOfRange {
        /// The rejected weight.
        weight_kg: f64,
    },
    /// Too soon after the previous accepted measurement.
    Debounced {
        /// Time since the previous acceptance.
        since_last: Duration,
    },
}

impl GateOutcome {
    /// The accepted measurement, if any.
    pub fn accepted(self) -> Option<AcceptedMeasurement> {
        match self {
            Self::Accepted(measurement) => Some(measurement),
            _ => None,
        }
    }
}

/// Validates and debounces stable readings.
///
/// The debounce window is process-wide: it survives reconnects and a
/// forgotten device, so a user stepping off and on again within the window
/// does not produce a duplicate.
#[derive(Debug, Clone)]
pub struct MeasurementGate {
    config: GateConfig,
    last_accepted: Option<Instant>,
}

impl Default for MeasurementGate {
    fn default() -> Self {
        Self::new(GateConfig::default())
    }
}

impl MeasurementGate {
    /// Create a gate with the given tuning.
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_accepted: None,
        }
    }

    /// Gate a reading against the current time.
    ///
    /// The measurement timestamp is the reading's `captured_at`, or now.
    pub fn offer(&mut self, reading: &DecodedReading) -> GateOutcome {
        let timestamp = reading.captured_at.unwrap_or_else(OffsetDateTime::now_utc);
        self.evaluate(reading, Instant::now(), timestamp)
    }

    /// Gate a reading at an explicit instant.
    pub fn evaluate(
        &mut self,
        reading: &DecodedReading,
        now: Instant,
        timestamp: OffsetDateTime,
    ) -> GateOutcome {
        let weight_kg = reading.weight_kg;
        if !(self.config.min_weight_kg..=self.config.max_weight_kg).contains(&weight_kg) {
            return GateOutcome::OutOfRange { weight_kg };
        }

        if let Some(last) = self.last_accepted {
            let since_last = now.saturating_duration_since(last);
            if since_last < self.config.debounce {
                debug!(?since_last, "Debouncing repeated measurement");
                return GateOutcome::Debounced { since_last };
            }
        }

        self.last_accepted = Some(now);
        GateOutcome::Accepted(AcceptedMeasurement {
            weight_kg: round_weight(weight_kg),
            impedance_ohm: reading.impedance_ohm,
            timestamp,
        })
    }

    /// When the last measurement was accepted.
    pub fn last_accepted(&self) -> Option<Instant> {
        self.last_accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(kg: f64) -> DecodedReading {
        DecodedReading::from_weight(kg)
    }

    fn at(gate: &mut MeasurementGate, kg: f64, now: Instant) -> GateOutcome {
        gate.evaluate(&reading(kg), now, OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let now = Instant::now();
        for (kg, accepted) in [(2.0, true), (300.0, true), (1.99, false), (300.01, false)] {
            let mut gate = MeasurementGate::default();
            let outcome = at(&mut gate, kg, now);
            assert_eq!(
                matches!(outcome, GateOutcome::Accepted(_)),
                accepted,
                "weight {kg}"
            );
        }
    }

    #[test]
    fn test_out_of_range_does_not_arm_debounce() {
        let now = Instant::now();
        let mut gate = MeasurementGate::default();
        assert!(matches!(
            at(&mut gate, 0.5, now),
            GateOutcome::OutOfRange { .. }
        ));
        assert!(gate.last_accepted().is_none());
        assert!(matches!(at(&mut gate, 70.0, now), GateOutcome::Accepted(_)));
    }

    #[test]
    fn test_nan_is_out_of_range() {
        let mut gate = MeasurementGate::default();
        assert!(matches!(
            at(&mut gate, f64::NAN, Instant::now()),
            GateOutcome::OutOfRange { .. }
        ));
    }

    #[test]
    fn test_debounce_boundaries() {
        let t = Instant::now();
        for (offset_ms, accepted) in [(4999, false), (5000, true), (5001, true)] {
            let mut gate = MeasurementGate::default();
            assert!(matches!(at(&mut gate, 70.0, t), GateOutcome::Accepted(_)));
            let outcome = at(&mut gate, 70.0, t + Duration::from_millis(offset_ms));
            assert_eq!(
                matches!(outcome, GateOutcome::Accepted(_)),
                accepted,
                "T+{offset_ms}"
            );
        }
    }

    #[test]
    fn test_debounced_reports_elapsed() {
        let t = Instant::now();
        let mut gate = MeasurementGate::default();
        at(&mut gate, 70.0, t);
        assert_eq!(
            at(&mut gate, 70.0, t + Duration::from_millis(1200)),
            GateOutcome::Debounced {
                since_last: Duration::from_millis(1200)
            }
        );
    }

    #[test]
    fn test_debounced_reading_does_not_extend_window() {
        let t = Instant::now();
        let mut gate = MeasurementGate::default();
        at(&mut gate, 70.0, t);
        at(&mut gate, 70.0, t + Duration::from_millis(4000));
        assert!(matches!(
            at(&mut gate, 70.0, t + Duration::from_millis(5000)),
            GateOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_accepted_weight_is_rounded() {
        let mut gate = MeasurementGate::default();
        let measurement = gate
            .evaluate(
                &reading(71.004_9).with_impedance(512.3),
                Instant::now(),
                OffsetDateTime::UNIX_EPOCH,
            )
            .accepted()
            .unwrap();
        assert_eq!(measurement.weight_kg, 71.0);
        assert_eq!(measurement.impedance_ohm, Some(512.3));
        assert_eq!(measurement.timestamp, OffsetDateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_config_validation() {
        assert!(GateConfig::default().validate().is_ok());
        assert!(GateConfig::default().weight_range(10.0, 5.0).validate().is_err());
        assert!(GateConfig::default().weight_range(-1.0, 5.0).validate().is_err());
        assert!(
            GateConfig::default()
                .weight_range(0.0, f64::INFINITY)
                .validate()
                .is_err()
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn accepted_weights_are_in_range(weights in proptest::collection::vec(-50.0f64..500.0, 1..40)) {
            let mut gate = MeasurementGate::new(GateConfig::default().debounce(Duration::ZERO));
            let start = Instant::now();
            for (i, kg) in weights.into_iter().enumerate() {
                let now = start + Duration::from_millis(i as u64);
                let outcome = gate.evaluate(&DecodedReading::from_weight(kg), now, OffsetDateTime::UNIX_EPOCH);
                if let Some(measurement) = outcome.accepted() {
                    prop_assert!((MIN_PLAUSIBLE_WEIGHT_KG..=MAX_PLAUSIBLE_WEIGHT_KG).contains(&measurement.weight_kg));
                }
            }
        }

        #[test]
        fn accepts_are_spaced_by_debounce(gaps in proptest::collection::vec(0u64..8_000, 1..40)) {
            let debounce = Duration::from_millis(5_000);
            let mut gate = MeasurementGate::new(GateConfig::default().debounce(debounce));
            let mut now = Instant::now();
            let mut last: Option<Instant> = None;
            for gap in gaps {
                now += Duration::from_millis(gap);
                let outcome = gate.evaluate(&DecodedReading::from_weight(70.0), now, OffsetDateTime::UNIX_EPOCH);
                if outcome.accepted().is_some() {
                    if let Some(previous) = last {
                        prop_assert!(now - previous >= debounce);
                    }
                    last = Some(now);
                }
            }
        }
    }
}
