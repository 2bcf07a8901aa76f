//! Heatmap Tile Sizing
//!
//! Maps windowed volume to a display scalar. The square root compresses
//! volumes spanning several orders of magnitude into a usable visual range.

use super::aggregation::WindowedAggregate;

/// Size returned when there is no usable volume.
pub const BASELINE_SIZE: f64 = 1.0;

/// Default multiplier applied to `sqrt(volume)`.
pub const DEFAULT_SCALE_FACTOR: f64 = 0.1;

/// Errors raised when configuring a sizer.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum SizingError {
    /// Scale factor must be finite and strictly positive.
    #[error("scale factor must be finite and positive, got {0}")]
    InvalidScaleFactor(f64),
}

/// Volume -> tile size transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sizer {
    scale_factor: f64,
}

impl Default for Sizer {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
        }
    }
}

impl Sizer {
    /// Create a sizer with a custom scale factor.
    ///
    /// # Errors
    ///
    /// Returns [`SizingError::InvalidScaleFactor`] unless the factor is
    /// finite and greater than zero.
    pub fn new(scale_factor: f64) -> Result<Self, SizingError> {
        if scale_factor.is_finite() && scale_factor > 0.0 {
            Ok(Self { scale_factor })
        } else {
            Err(SizingError::InvalidScaleFactor(scale_factor))
        }
    }

    /// Configured scale factor.
    #[must_use]
    pub const fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Display size for a volume.
    ///
    /// Absent, zero, negative or non-finite volume maps to [`BASELINE_SIZE`].
    #[must_use]
    pub fn size(&self, volume: Option<f64>) -> f64 {
        let Some(volume) = volume.filter(|v| v.is_finite() && *v > 0.0) else {
            return BASELINE_SIZE;
        };

        let scaled = volume.sqrt() * self.scale_factor;
        if scaled.is_finite() && scaled > 0.0 {
            scaled
        } else {
            BASELINE_SIZE
        }
    }

    /// Display size for an optional aggregate.
    #[must_use]
    pub fn size_of(&self, aggregate: Option<&WindowedAggregate>) -> f64 {
        self.size(aggregate.map(|a| a.volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_for_missing_volume() {
        let sizer = Sizer::default();
        assert!((sizer.size(None) - BASELINE_SIZE).abs() < f64::EPSILON);
        assert!((sizer.size(Some(0.0)) - BASELINE_SIZE).abs() < f64::EPSILON);
        assert!((sizer.size(Some(f64::NAN)) - BASELINE_SIZE).abs() < f64::EPSILON);
        assert!((sizer.size(Some(f64::INFINITY)) - BASELINE_SIZE).abs() < f64::EPSILON);
        assert!((sizer.size(Some(-4.0)) - BASELINE_SIZE).abs() < f64::EPSILON);
    }

    #[test]
    fn sqrt_scaled() {
        let sizer = Sizer::default();
        assert!((sizer.size(Some(10_000.0)) - 10.0).abs() < 1e-9);
        assert!((sizer.size(Some(100.0)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn monotonic_in_volume() {
        let sizer = Sizer::default();
        assert!(sizer.size(Some(1_000_000.0)) > sizer.size(Some(10_000.0)));
        assert!(sizer.size(Some(10_000.0)) > sizer.size(Some(100.0)));
    }

    #[test]
    fn custom_scale_factor() {
        let sizer = Sizer::new(2.0).unwrap();
        assert!((sizer.size(Some(25.0)) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_scale_factor() {
        assert!(Sizer::new(0.0).is_err());
        assert!(Sizer::new(-0.1).is_err());
        assert!(Sizer::new(f64::NAN).is_err());
        assert!(Sizer::new(f64::INFINITY).is_err());
    }

    #[test]
    fn tiny_volume_stays_positive() {
        let sizer = Sizer::default();
        assert!(sizer.size(Some(f64::MIN_POSITIVE)) > 0.0);
    }

    #[test]
    fn size_of_aggregate() {
        let sizer = Sizer::default();
        let aggregate = WindowedAggregate {
            volume: 400.0,
            trade_count: 3,
            last_update: 0,
        };
        assert!((sizer.size_of(Some(&aggregate)) - 2.0).abs() < 1e-9);
        assert!((sizer.size_of(None) - BASELINE_SIZE).abs() < f64::EPSILON);
    }
}
