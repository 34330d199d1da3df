//! One-dimensional coordinate axes.
//!
//! An axis maps a coordinate value to the index of the nearest sample
//! along one horizontal dimension of a source grid. Axes are built once
//! when a layer's metadata is loaded, are immutable afterwards, and are
//! shared read-only across request threads.

use tracing::debug;

use crate::error::{GridExtractError, Result};

/// Relative tolerance used when deciding whether raw samples are evenly
/// spaced, and when accepting values at the half-step domain boundary.
const SPACING_TOLERANCE: f64 = 1e-5;
const BOUNDARY_EPSILON: f64 = 1e-6;

/// Evenly spaced axis: index by direct arithmetic.
#[derive(Debug, Clone)]
pub struct RegularAxis {
    origin: f64,
    step: f64,
    count: usize,
    is_longitude: bool,
    wraps: bool,
}

impl RegularAxis {
    /// Create a regular axis from its origin, step and sample count.
    pub fn new(origin: f64, step: f64, count: usize, is_longitude: bool) -> Result<Self> {
        if count == 0 {
            return Err(GridExtractError::unsupported_axis("axis has no samples"));
        }
        if step == 0.0 || !step.is_finite() || !origin.is_finite() {
            return Err(GridExtractError::unsupported_axis(format!(
                "invalid regular axis parameters: origin={}, step={}",
                origin, step
            )));
        }
        // A longitude axis wraps if one more step past the last sample
        // reaches the first sample modulo 360.
        let wraps = is_longitude && count as f64 * step.abs() >= 360.0 - BOUNDARY_EPSILON;
        Ok(Self {
            origin,
            step,
            count,
            is_longitude,
            wraps,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn wraps(&self) -> bool {
        self.wraps
    }

    /// Index of the sample nearest to `value`, or `None` if the value
    /// lies more than half a step outside the sampled range.
    pub fn index(&self, value: f64) -> Option<usize> {
        if !value.is_finite() {
            return None;
        }
        if self.wraps {
            // Normalize before rounding so equivalent longitudes on
            // either side of zero round identically.
            let t = ((value - self.origin) / self.step).rem_euclid(self.count as f64);
            return Some(t.round() as usize % self.count);
        }
        match self.index_direct(value) {
            Some(i) => Some(i),
            None if self.is_longitude => self
                .index_direct(value + 360.0)
                .or_else(|| self.index_direct(value - 360.0)),
            None => None,
        }
    }

    fn index_direct(&self, value: f64) -> Option<usize> {
        let t = (value - self.origin) / self.step;
        if t < -0.5 - BOUNDARY_EPSILON || t > self.count as f64 - 0.5 + BOUNDARY_EPSILON {
            return None;
        }
        let k = t.round() as i64;
        let k = k.clamp(0, self.count as i64 - 1);
        Some(k as usize)
    }
}

/// Unevenly spaced axis: index by binary search over sorted samples.
///
/// Samples are stored as (value, original index) pairs sorted by value,
/// because source files may carry unsorted or partially invalid axes.
/// Non-finite samples (e.g. projected latitudes outside [-90, 90]) are
/// excluded at construction, never mapped to an index.
#[derive(Debug, Clone)]
pub struct IrregularAxis {
    /// Sorted by value; `.1` is the index into the source storage.
    samples: Vec<(f64, usize)>,
    is_longitude: bool,
    wraps: bool,
}

impl IrregularAxis {
    /// Build from raw axis samples in storage order.
    ///
    /// Longitude samples are normalized into [0, 360) before sorting.
    /// If the axis wraps (the implied sample after the last one reaches
    /// or passes the first sample going eastwards), a synthetic copy of
    /// the first sample, offset by +360 and carrying the original's
    /// index, is appended so it participates in the binary search.
    pub fn from_values(values: &[f64], is_longitude: bool) -> Result<Self> {
        let mut samples: Vec<(f64, usize)> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, &v)| {
                let v = if is_longitude { v.rem_euclid(360.0) } else { v };
                (v, i)
            })
            .collect();

        if samples.len() < 2 {
            return Err(GridExtractError::unsupported_axis(format!(
                "axis needs at least 2 finite samples, found {}",
                samples.len()
            )));
        }

        samples.sort_by(|a, b| a.0.total_cmp(&b.0));
        samples.dedup_by_key(|s| s.0);
        // Normalization can collapse distinct inputs (longitudes
        // congruent modulo 360) onto one sample.
        if samples.len() < 2 {
            return Err(GridExtractError::unsupported_axis(
                "axis has fewer than 2 distinct samples after normalization",
            ));
        }

        let mut wraps = false;
        if is_longitude {
            let (first_val, first_idx) = samples[0];
            let last_val = samples[samples.len() - 1].0;
            let dx = last_val - samples[samples.len() - 2].0;
            // Position of the imaginary next sample along the axis.
            let next_val = last_val + dx;
            // The axis wraps if the imaginary next sample is at or past
            // the first sample going eastwards, or is angularly closer
            // to the first sample than the last sample is to it.
            wraps = clockwise_distance(last_val, first_val) <= clockwise_distance(last_val, next_val)
                || clockwise_distance(last_val, next_val) > clockwise_distance(next_val, first_val);
            if wraps {
                debug!(lon = first_val + 360.0, "longitude axis wraps, appending synthetic sample");
                samples.push((first_val + 360.0, first_idx));
            }
        }

        Ok(Self {
            samples,
            is_longitude,
            wraps,
        })
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn wraps(&self) -> bool {
        self.wraps
    }

    /// Index of the nearest sample, or `None` if `value` is outside
    /// \[min, max\]. Wrapping longitude axes retry at `value + 360`.
    pub fn index(&self, value: f64) -> Option<usize> {
        match self.find_nearest(value) {
            Some(i) => Some(i),
            None if self.is_longitude => self.find_nearest(value + 360.0),
            None => None,
        }
    }

    /// Binary search for the sample nearest to `target`. Ties between
    /// two equidistant neighbours resolve to the lower position.
    fn find_nearest(&self, target: f64) -> Option<usize> {
        let first = self.samples[0].0;
        let last = self.samples[self.samples.len() - 1].0;
        if target < first || target > last {
            return None;
        }

        let mut low = 0usize;
        let mut high = self.samples.len() - 1;
        while high > low + 1 {
            let mid = (low + high) / 2;
            let mid_val = self.samples[mid].0;
            if mid_val == target {
                return Some(self.samples[mid].1);
            } else if mid_val < target {
                low = mid;
            } else {
                high = mid;
            }
        }

        let (low_val, low_idx) = self.samples[low];
        let (high_val, high_idx) = self.samples[high];
        if (target - low_val).abs() <= (high_val - target).abs() {
            Some(low_idx)
        } else {
            Some(high_idx)
        }
    }
}

/// Eastward (increasing-longitude) angular distance from `from` to
/// `to`, in [0, 360).
fn clockwise_distance(from: f64, to: f64) -> f64 {
    (to - from).rem_euclid(360.0)
}

/// A one-dimensional coordinate axis of either spacing class.
///
/// Closed set: readers dispatch on the variant, and classification
/// failures are configuration errors fatal to the layer.
#[derive(Debug, Clone)]
pub enum CoordAxis1d {
    Regular(RegularAxis),
    Irregular(IrregularAxis),
}

impl CoordAxis1d {
    /// Classify raw axis samples as regular or irregular.
    ///
    /// Samples are regular when consecutive spacings agree within a
    /// small relative tolerance; anything else falls back to the
    /// binary-search axis.
    pub fn from_values(values: &[f64], is_longitude: bool) -> Result<Self> {
        let finite = values.iter().filter(|v| v.is_finite()).count();
        if finite < 2 {
            return Err(GridExtractError::unsupported_axis(format!(
                "axis needs at least 2 finite samples, found {}",
                finite
            )));
        }

        if finite == values.len() && Self::is_evenly_spaced(values) {
            let step = (values[values.len() - 1] - values[0]) / (values.len() - 1) as f64;
            let axis = RegularAxis::new(values[0], step, values.len(), is_longitude)?;
            debug!(
                origin = values[0],
                step,
                count = values.len(),
                "classified regular axis"
            );
            return Ok(CoordAxis1d::Regular(axis));
        }

        debug!(count = finite, "classified irregular axis");
        Ok(CoordAxis1d::Irregular(IrregularAxis::from_values(
            values,
            is_longitude,
        )?))
    }

    fn is_evenly_spaced(values: &[f64]) -> bool {
        let step = values[1] - values[0];
        if step == 0.0 {
            return false;
        }
        values
            .windows(2)
            .all(|w| ((w[1] - w[0]) - step).abs() <= SPACING_TOLERANCE * step.abs())
    }

    /// Index of the sample nearest `value`, or `None` outside the
    /// axis domain.
    pub fn index(&self, value: f64) -> Option<usize> {
        match self {
            CoordAxis1d::Regular(axis) => axis.index(value),
            CoordAxis1d::Irregular(axis) => axis.index(value),
        }
    }

    /// Number of stored samples.
    pub fn count(&self) -> usize {
        match self {
            CoordAxis1d::Regular(axis) => axis.count(),
            CoordAxis1d::Irregular(axis) => axis.count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_round_trip() {
        let axis = RegularAxis::new(-180.0, 0.5, 720, true).unwrap();
        for k in [0usize, 1, 359, 719] {
            let value = -180.0 + k as f64 * 0.5;
            assert_eq!(axis.index(value), Some(k), "k = {}", k);
        }
    }

    #[test]
    fn test_regular_boundary_epsilon() {
        // Non-longitude axis: no wrap effects.
        let axis = RegularAxis::new(0.0, 10.0, 4, false).unwrap();
        // Half a step outside each end still resolves to the end index.
        assert_eq!(axis.index(-5.0), Some(0));
        assert_eq!(axis.index(35.0), Some(3));
        // Strictly beyond the half-step boundary resolves to nothing.
        assert_eq!(axis.index(-5.1), None);
        assert_eq!(axis.index(35.1), None);
    }

    #[test]
    fn test_regular_longitude_wrap_modulo() {
        // 0, 10, ..., 350: full circle.
        let axis = RegularAxis::new(0.0, 10.0, 36, true).unwrap();
        assert!(axis.wraps());
        assert_eq!(axis.index(355.0), Some(0));
        assert_eq!(axis.index(-45.0), axis.index(315.0));
    }

    #[test]
    fn test_regular_partial_longitude_retries_360() {
        // 100..250: no wrap, but queries shifted by 360 still resolve.
        let axis = RegularAxis::new(100.0, 10.0, 16, true).unwrap();
        assert!(!axis.wraps());
        assert_eq!(axis.index(-230.0), Some(3)); // -230 + 360 = 130
        assert_eq!(axis.index(490.0), Some(3)); // 490 - 360 = 130
        assert_eq!(axis.index(0.0), None);
    }

    #[test]
    fn test_irregular_nearest_with_tie_to_lower() {
        let axis = IrregularAxis::from_values(&[0.0, 1.0, 4.0, 9.0], false).unwrap();
        assert_eq!(axis.index(0.4), Some(0));
        assert_eq!(axis.index(0.6), Some(1));
        // 2.5 is equidistant from 1.0 and 4.0: lower position wins.
        assert_eq!(axis.index(2.5), Some(1));
        assert_eq!(axis.index(9.0), Some(3));
        assert_eq!(axis.index(-0.1), None);
        assert_eq!(axis.index(9.1), None);
    }

    #[test]
    fn test_irregular_skips_nan_samples() {
        // Model latitudes can fall outside [-90, 90] and appear as NaN.
        let axis =
            IrregularAxis::from_values(&[f64::NAN, -60.0, -30.0, 0.0, f64::NAN], false).unwrap();
        assert_eq!(axis.count(), 3);
        // Original indices survive the filtering.
        assert_eq!(axis.index(-59.0), Some(1));
        assert_eq!(axis.index(0.0), Some(3));
    }

    #[test]
    fn test_longitude_wrap_round_trip() {
        let axis = IrregularAxis::from_values(&[0.0, 90.0, 180.0, 270.0], true).unwrap();
        assert!(axis.wraps());
        // -45 and 315 are the same longitude and must agree.
        assert_eq!(axis.index(-45.0), axis.index(315.0));
        assert!(axis.index(-45.0).is_some());
        // The synthetic 360 sample carries the first sample's index.
        assert_eq!(axis.index(359.0), Some(0));
    }

    #[test]
    fn test_congruent_longitudes_are_rejected() {
        // All three are the same longitude modulo 360; normalization
        // leaves one distinct sample, which cannot form an axis.
        assert!(IrregularAxis::from_values(&[0.0, 360.0, 1080.0], true).is_err());
    }

    #[test]
    fn test_non_wrapping_longitude_range() {
        let axis = IrregularAxis::from_values(&[100.0, 110.0, 125.0, 150.0], true).unwrap();
        assert!(!axis.wraps());
        assert_eq!(axis.index(111.0), Some(1));
        assert_eq!(axis.index(10.0), None);
    }

    #[test]
    fn test_classification() {
        let regular = CoordAxis1d::from_values(&[0.0, 10.0, 20.0, 30.0], false).unwrap();
        assert!(matches!(regular, CoordAxis1d::Regular(_)));

        let irregular = CoordAxis1d::from_values(&[0.0, 1.0, 4.0, 9.0], false).unwrap();
        assert!(matches!(irregular, CoordAxis1d::Irregular(_)));

        assert!(CoordAxis1d::from_values(&[1.0], false).is_err());
        assert!(CoordAxis1d::from_values(&[f64::NAN, f64::NAN], false).is_err());
    }

    #[test]
    fn test_descending_regular_axis() {
        // Latitude stored north to south.
        let axis = CoordAxis1d::from_values(&[60.0, 50.0, 40.0, 30.0], false).unwrap();
        assert_eq!(axis.index(60.0), Some(0));
        assert_eq!(axis.index(31.0), Some(3));
        assert_eq!(axis.index(20.0), None);
    }
}
