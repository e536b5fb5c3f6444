//! Weighted RMS distance between embeddings and its 0–100 similarity mapping.

use crate::config::{FeatureLayout, MatchConfig, SegmentWeights};

/// Outcome of one distance computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distance {
    pub value: f32,
    /// Number of dimensions actually compared.
    pub compared: usize,
    /// True when the inputs had different lengths and were truncated.
    pub truncated: bool,
}

/// Computes distances and similarities under fixed weights and scale.
#[derive(Debug, Clone)]
pub struct Scorer {
    weights: SegmentWeights,
    layout: FeatureLayout,
    scale: f32,
}

impl Scorer {
    /// `layout` decides which weight applies at each position; indices beyond
    /// the layout take the ratio weight.
    ///
    /// `scale` and the weights must be positive. [`MatchConfig::validate`]
    /// checks this; a non-positive scale makes every similarity 0.
    pub fn new(weights: SegmentWeights, layout: FeatureLayout, scale: f32) -> Self {
        Self {
            weights,
            layout,
            scale,
        }
    }

    pub fn from_config(config: &MatchConfig, layout: FeatureLayout) -> Self {
        Self::new(config.weights, layout, config.scale)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    fn weight_at(&self, i: usize) -> f32 {
        if i < self.layout.coordinates {
            self.weights.coordinate
        } else if i < self.layout.coordinates + self.layout.distances {
            self.weights.distance
        } else {
            self.weights.ratio
        }
    }

    /// `sqrt(sum(w_i * (a_i - b_i)^2) / sum(w_i))` over the common prefix.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Distance {
        let compared = a.len().min(b.len());
        let truncated = a.len() != b.len();
        if truncated {
            tracing::warn!(
                left = a.len(),
                right = b.len(),
                compared,
                "embedding length mismatch; comparing common prefix"
            );
        }

        let mut sum = 0.0f32;
        let mut total_weight = 0.0f32;
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            let w = self.weight_at(i);
            sum += w * (x - y).powi(2);
            total_weight += w;
        }

        let value = if total_weight > 0.0 {
            (sum / total_weight).sqrt()
        } else {
            0.0
        };

        Distance {
            value,
            compared,
            truncated,
        }
    }

    /// Map a distance to [0, 100]: `clamp((1 - d / scale) * 100, 0, 100)`.
    pub fn similarity(&self, distance: f32) -> f32 {
        let similarity = (1.0 - distance / self.scale) * 100.0;
        if similarity.is_nan() {
            return 0.0;
        }
        similarity.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(coordinates: usize, distances: usize, ratios: usize) -> FeatureLayout {
        FeatureLayout {
            coordinates,
            distances,
            ratios,
        }
    }

    fn uniform(n: usize) -> Scorer {
        Scorer::new(SegmentWeights::uniform(), layout(n, 0, 0), 2.5)
    }

    #[test]
    fn test_identity() {
        let scorer = Scorer::new(SegmentWeights::default(), layout(4, 2, 2), 2.5);
        let e = [0.1, -0.3, 0.25, 0.0, 0.7, 0.2, 1.1, 0.9];
        let d = scorer.distance(&e, &e);
        assert_eq!(d.value, 0.0);
        assert_eq!(d.compared, 8);
        assert!(!d.truncated);
        assert_eq!(scorer.similarity(d.value), 100.0);
    }

    #[test]
    fn test_symmetry() {
        let scorer = Scorer::new(SegmentWeights::default(), layout(4, 2, 2), 2.5);
        let a = [0.1, -0.3, 0.25, 0.0, 0.7, 0.2, 1.1, 0.9];
        let b = [0.2, -0.1, 0.05, 0.3, 0.6, 0.4, 1.3, 0.5];
        assert_eq!(scorer.distance(&a, &b).value, scorer.distance(&b, &a).value);
    }

    #[test]
    fn test_uniform_weights_reduce_to_rms() {
        let d = uniform(3).distance(&[0.0, 0.0, 0.0], &[0.0, 0.0, 0.01]);
        let expected = (0.0001f32 / 3.0).sqrt();
        assert!((d.value - expected).abs() < 1e-7, "got {}", d.value);
        assert!((d.value - 0.005_773_5).abs() < 1e-6);
    }

    #[test]
    fn test_segment_weights() {
        // one coordinate (w=1), one distance (w=3), one ratio (w=5)
        let scorer = Scorer::new(SegmentWeights::default(), layout(1, 1, 1), 2.5);
        let d = scorer.distance(&[0.0, 0.0, 0.0], &[0.0, 0.0, 1.0]);
        let expected = (5.0f32 / 9.0).sqrt();
        assert!((d.value - expected).abs() < 1e-6, "got {}, expected {expected}", d.value);

        let d = scorer.distance(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0]);
        let expected = (1.0f32 / 9.0).sqrt();
        assert!((d.value - expected).abs() < 1e-6, "got {}, expected {expected}", d.value);
    }

    #[test]
    fn test_dimension_mismatch_truncates() {
        let scorer = Scorer::new(SegmentWeights::default(), layout(144, 6, 50), 2.5);
        let a: Vec<f32> = (0..200).map(|i| i as f32 * 0.01).collect();
        let mut b: Vec<f32> = a[..150].to_vec();
        b[10] += 0.5;

        let d = scorer.distance(&a, &b);
        assert!(d.truncated);
        assert_eq!(d.compared, 150);

        let reference = scorer.distance(&a[..150], &b);
        assert!(!reference.truncated);
        assert_eq!(d.value, reference.value);
    }

    #[test]
    fn test_empty_inputs() {
        let d = uniform(0).distance(&[], &[]);
        assert_eq!(d.value, 0.0);
        assert_eq!(d.compared, 0);
    }

    #[test]
    fn test_similarity_is_monotone_and_clamped() {
        let scorer = uniform(1);
        let mut prev = f32::INFINITY;
        for step in 0..=40 {
            let s = scorer.similarity(step as f32 * 0.1);
            assert!(s <= prev, "similarity rose at step {step}");
            assert!((0.0..=100.0).contains(&s));
            prev = s;
        }
        assert_eq!(scorer.similarity(2.5), 0.0);
        assert_eq!(scorer.similarity(10.0), 0.0);
        assert!((scorer.similarity(1.25) - 50.0).abs() < 1e-4);
        assert_eq!(scorer.similarity(f32::NAN), 0.0);
    }

    #[test]
    fn test_zero_scale_yields_zero_similarity() {
        let scorer = Scorer::new(SegmentWeights::uniform(), layout(2, 0, 0), 0.0);
        assert_eq!(scorer.similarity(0.0), 0.0);
        assert_eq!(scorer.similarity(1.0), 0.0);
    }
}
