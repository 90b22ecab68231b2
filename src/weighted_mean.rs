use crate::error::{HeatmapError, Result};

/// Incremental weighted mean over `(value, weight)` observations.
///
/// Only the running sums are kept, so adding is O(1) and the
/// accumulator never grows with the number of tiles in a cycle.
#[derive(Debug, Clone, Default)]
pub struct WeightedMean {
    weighted_sum: f64,
    weight_sum: f64,
    count: usize,
}

impl WeightedMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero weight is counted but leaves both sums untouched.
    pub fn add(&mut self, value: f64, weight: f64) {
        self.count += 1;
        if weight == 0.0 {
            return;
        }
        self.weighted_sum += value * weight;
        self.weight_sum += weight;
    }

    /// Σ(value·weight) / Σ(weight).
    pub fn mean(&self) -> Result<f64> {
        if self.count == 0 || self.weight_sum == 0.0 {
            return Err(HeatmapError::EmptyAccumulator);
        }
        Ok(self.weighted_sum / self.weight_sum)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Extend<(f64, f64)> for WeightedMean {
    fn extend<I: IntoIterator<Item = (f64, f64)>>(&mut self, iter: I) {
        for (value, weight) in iter {
            self.add(value, weight);
        }
    }
}

impl FromIterator<(f64, f64)> for WeightedMean {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut acc = Self::new();
        acc.extend(iter);
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mean_matches_weighted_formula() {
        let pairs = [(0.2, 10.0), (0.8, 20.0), (0.5, 5.0), (0.9, 1.0)];
        let acc: WeightedMean = pairs.iter().copied().collect();

        let num: f64 = pairs.iter().map(|(v, w)| v * w).sum();
        let den: f64 = pairs.iter().map(|(_, w)| w).sum();
        assert_relative_eq!(acc.mean().unwrap(), num / den, epsilon = 1e-12);
        assert_eq!(acc.len(), 4);
    }

    #[test]
    fn empty_accumulator_is_an_error() {
        let acc = WeightedMean::new();
        assert_eq!(acc.mean(), Err(HeatmapError::EmptyAccumulator));
    }

    #[test]
    fn zero_weight_is_ignored_for_the_mean() {
        let mut acc = WeightedMean::new();
        acc.add(0.4, 2.0);
        acc.add(1.0, 0.0);
        assert_relative_eq!(acc.mean().unwrap(), 0.4);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn only_zero_weights_is_still_empty() {
        let mut acc = WeightedMean::new();
        acc.add(0.7, 0.0);
        assert!(!acc.is_empty());
        assert_eq!(acc.mean(), Err(HeatmapError::EmptyAccumulator));
    }

    #[test]
    fn reset_discards_observations() {
        let mut acc = WeightedMean::new();
        acc.add(0.3, 3.0);
        acc.reset();
        assert!(acc.is_empty());
        assert!(acc.mean().is_err());

        acc.add(0.6, 1.0);
        assert_relative_eq!(acc.mean().unwrap(), 0.6);
    }
}
