//! Nearest-neighbour matching against an enrolled gallery.

use crate::config::{ConfigError, ExtractorConfig, FeatureLayout, MatchConfig, VersionPolicy};
use crate::scorer::Scorer;
use crate::types::{Embedding, GalleryEntry, MatchResult};

/// Why a gallery entry was left out of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    EmptyEmbedding,
    NonFiniteValues,
    VersionMismatch { probe: String, entry: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub id: String,
    pub reason: SkipReason,
}

/// Everything the matcher learned about one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    /// Accepted best candidate, if any.
    pub result: Option<MatchResult>,
    /// Similarity of the best candidate whether accepted or not.
    pub best_similarity: Option<f32>,
    /// Effective threshold fraction after dynamic adjustment.
    pub threshold: f32,
    /// Entries actually scored.
    pub candidates: usize,
    pub skipped: Vec<SkippedEntry>,
    /// Comparisons that ran over a truncated common prefix.
    pub truncated: usize,
}

impl MatchReport {
    fn empty(threshold: f32) -> Self {
        Self {
            result: None,
            best_similarity: None,
            threshold,
            candidates: 0,
            skipped: Vec::new(),
            truncated: 0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.result.is_some()
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], base_threshold: f32) -> MatchReport;
}

/// Weighted-distance matcher with a threshold that relaxes when the
/// decision is unambiguous.
///
/// Gallery order is significant: on equal distances the earlier entry wins.
#[derive(Debug, Clone)]
pub struct DynamicThresholdMatcher {
    scorer: Scorer,
    config: MatchConfig,
}

impl Default for DynamicThresholdMatcher {
    fn default() -> Self {
        let config = MatchConfig::default();
        Self {
            scorer: Scorer::from_config(&config, ExtractorConfig::default().layout()),
            config,
        }
    }
}

impl DynamicThresholdMatcher {
    /// Build a matcher from a validated configuration.
    pub fn new(config: MatchConfig, layout: FeatureLayout) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            scorer: Scorer::from_config(&config, layout),
            config,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Apply the single-candidate and separation relaxations to `base`.
    pub fn effective_threshold(&self, base: f32, candidates: usize, best: f32, second: f32) -> f32 {
        if candidates == 1 {
            base * self.config.single_candidate_factor
        } else if second - best > self.config.separation_margin {
            base * self.config.separation_factor
        } else {
            base
        }
    }

    fn check_entry(&self, probe: &Embedding, entry: &GalleryEntry) -> Result<(), SkipReason> {
        let emb = &entry.embedding;
        if emb.is_empty() {
            return Err(SkipReason::EmptyEmbedding);
        }
        if !emb.is_finite() {
            return Err(SkipReason::NonFiniteValues);
        }
        match (&probe.extractor_version, &emb.extractor_version) {
            (Some(p), Some(e)) if p != e => {
                if self.config.version_policy == VersionPolicy::Strict {
                    return Err(SkipReason::VersionMismatch {
                        probe: p.clone(),
                        entry: e.clone(),
                    });
                }
                tracing::warn!(id = %entry.id, probe = %p, entry_version = %e, "comparing across extractor versions");
            }
            (Some(_), None) | (None, Some(_)) => {
                tracing::debug!(id = %entry.id, "comparing against untagged embedding");
            }
            _ => {}
        }
        Ok(())
    }
}

impl Matcher for DynamicThresholdMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], base_threshold: f32) -> MatchReport {
        if probe.is_empty() || !probe.is_finite() {
            tracing::warn!(len = probe.len(), "probe embedding is not comparable");
            return MatchReport::empty(base_threshold);
        }

        let mut report = MatchReport::empty(base_threshold);
        let mut best: Option<(usize, f32)> = None;
        let mut second_best = f32::INFINITY;

        for (i, entry) in gallery.iter().enumerate() {
            if let Err(reason) = self.check_entry(probe, entry) {
                tracing::debug!(id = %entry.id, ?reason, "skipping gallery entry");
                report.skipped.push(SkippedEntry {
                    id: entry.id.clone(),
                    reason,
                });
                continue;
            }

            let distance = self.scorer.distance(&probe.values, &entry.embedding.values);
            report.candidates += 1;
            if distance.truncated {
                report.truncated += 1;
            }

            match best {
                Some((_, best_distance)) if distance.value >= best_distance => {
                    if distance.value < second_best {
                        second_best = distance.value;
                    }
                }
                _ => {
                    if let Some((_, prev)) = best {
                        second_best = prev;
                    }
                    best = Some((i, distance.value));
                }
            }
        }

        let Some((best_idx, best_distance)) = best else {
            return report;
        };

        let similarity = self.scorer.similarity(best_distance);
        let threshold =
            self.effective_threshold(base_threshold, report.candidates, best_distance, second_best);
        let entry = &gallery[best_idx];

        report.best_similarity = Some(similarity);
        report.threshold = threshold;

        tracing::debug!(
            name = %entry.name,
            similarity,
            distance = best_distance,
            threshold = threshold * 100.0,
            candidates = report.candidates,
            skipped = report.skipped.len(),
            "best gallery candidate"
        );

        if similarity >= threshold * 100.0 {
            report.result = Some(MatchResult {
                person_id: entry.id.clone(),
                name: entry.name.clone(),
                similarity: (similarity * 10.0).round() / 10.0,
                distance: best_distance,
            });
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentWeights;

    fn entry(id: &str, name: &str, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            id: id.into(),
            name: name.into(),
            embedding: Embedding::untagged(values),
        }
    }

    fn tagged(id: &str, values: Vec<f32>, version: &str) -> GalleryEntry {
        GalleryEntry {
            id: id.into(),
            name: id.into(),
            embedding: Embedding {
                values,
                extractor_version: Some(version.into()),
            },
        }
    }

    /// Uniform weights over short test vectors.
    fn matcher() -> DynamicThresholdMatcher {
        let config = MatchConfig {
            weights: SegmentWeights::uniform(),
            ..MatchConfig::default()
        };
        DynamicThresholdMatcher::new(config, ExtractorConfig::default().layout()).unwrap()
    }

    #[test]
    fn test_empty_gallery() {
        let probe = Embedding::untagged(vec![0.3, 0.1]);
        let report = matcher().compare(&probe, &[], 0.35);
        assert!(report.result.is_none());
        assert_eq!(report.candidates, 0);
        assert!(report.best_similarity.is_none());
    }

    #[test]
    fn test_exact_single_match() {
        let values = vec![0.2, -0.4, 0.9];
        let probe = Embedding::untagged(values.clone());
        let report = matcher().compare(&probe, &[entry("7", "Bob", values)], 0.35);
        let result = report.result.expect("exact match must be accepted");
        assert_eq!(result.person_id, "7");
        assert!((result.similarity - 100.0).abs() < 1e-4);
        assert!((report.threshold - 0.35 * 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_alice_scenario() {
        let gallery = [entry("1", "Alice", vec![0.0, 0.0, 0.0])];
        let probe = Embedding::untagged(vec![0.0, 0.0, 0.01]);
        // default segment weights are uniform across the coordinate segment
        let report = DynamicThresholdMatcher::default().compare(&probe, &gallery, 0.35);

        let result = report.result.expect("Alice should match");
        assert_eq!(result.person_id, "1");
        assert_eq!(result.name, "Alice");
        assert!((result.distance - 0.005_773_5).abs() < 1e-6, "distance {}", result.distance);
        assert!((result.similarity - 99.8).abs() < 1e-4, "similarity {}", result.similarity);
        assert!((report.threshold - 0.21).abs() < 1e-6);
    }

    #[test]
    fn test_separation_relaxes_threshold() {
        // A at distance 1.375 -> similarity 45; B at 2.0 -> gap 0.625 > 0.3.
        // Base 0.5 (50%) alone would reject A; relaxed 0.4 (40%) accepts it.
        let gallery = [entry("a", "A", vec![1.375]), entry("b", "B", vec![2.0])];
        let probe = Embedding::untagged(vec![0.0]);
        let m = matcher();

        assert!(m.scorer().similarity(1.375) < 50.0);
        let report = m.compare(&probe, &gallery, 0.5);
        assert!((report.threshold - 0.4).abs() < 1e-6);
        assert_eq!(report.result.map(|r| r.person_id).as_deref(), Some("a"));
    }

    #[test]
    fn test_ambiguous_candidates_use_base_threshold() {
        let gallery = [entry("a", "A", vec![1.375]), entry("b", "B", vec![1.5])];
        let probe = Embedding::untagged(vec![0.0]);
        let report = matcher().compare(&probe, &gallery, 0.5);
        assert!((report.threshold - 0.5).abs() < 1e-6);
        assert!(report.result.is_none());
        assert!((report.best_similarity.unwrap() - 45.0).abs() < 1e-3);
    }

    #[test]
    fn test_best_candidate_wins_regardless_of_position() {
        let gallery = [
            entry("1", "decoy1", vec![0.9, 0.9]),
            entry("2", "decoy2", vec![0.5, 0.5]),
            entry("3", "match", vec![0.1, 0.0]),
        ];
        let probe = Embedding::untagged(vec![0.1, 0.0]);
        let report = matcher().compare(&probe, &gallery, 0.35);
        assert_eq!(report.result.unwrap().name, "match");
        assert_eq!(report.candidates, 3);
    }

    #[test]
    fn test_tie_first_entry_wins() {
        let gallery = [entry("first", "F", vec![0.5]), entry("second", "S", vec![0.5])];
        let probe = Embedding::untagged(vec![0.4]);
        let report = matcher().compare(&probe, &gallery, 0.35);
        assert_eq!(report.result.unwrap().person_id, "first");
        // zero gap between best and runner-up: no relaxation
        assert!((report.threshold - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_entries_are_skipped_and_reported() {
        let gallery = [
            entry("empty", "E", vec![]),
            entry("nan", "N", vec![f32::NAN, 0.0]),
            entry("ok", "OK", vec![0.1, 0.1]),
        ];
        let probe = Embedding::untagged(vec![0.1, 0.1]);
        let report = matcher().compare(&probe, &gallery, 0.35);

        assert_eq!(report.result.unwrap().person_id, "ok");
        assert_eq!(report.candidates, 1);
        assert_eq!(
            report.skipped,
            vec![
                SkippedEntry { id: "empty".into(), reason: SkipReason::EmptyEmbedding },
                SkippedEntry { id: "nan".into(), reason: SkipReason::NonFiniteValues },
            ]
        );
        // only one comparable candidate -> single-candidate relaxation
        assert!((report.threshold - 0.35 * 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_version_mismatch_strict_skips() {
        let probe = Embedding {
            values: vec![0.1, 0.2],
            extractor_version: Some("geo1-aaaa".into()),
        };
        let gallery = [tagged("old", vec![0.1, 0.2], "geo1-bbbb")];
        let report = matcher().compare(&probe, &gallery, 0.35);
        assert!(report.result.is_none());
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::VersionMismatch { .. }
        ));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let layout = ExtractorConfig::default().layout();
        let zero_scale = MatchConfig {
            scale: 0.0,
            ..MatchConfig::default()
        };
        assert!(matches!(
            DynamicThresholdMatcher::new(zero_scale, layout),
            Err(ConfigError::NonPositive { field: "scale", .. })
        ));

        let nan_threshold = MatchConfig {
            base_threshold: f32::NAN,
            ..MatchConfig::default()
        };
        assert!(matches!(
            DynamicThresholdMatcher::new(nan_threshold, layout),
            Err(ConfigError::Negative { field: "base_threshold", .. })
        ));
    }

    #[test]
    fn test_version_mismatch_lenient_compares_with_truncation() {
        let config = MatchConfig {
            weights: SegmentWeights::uniform(),
            version_policy: VersionPolicy::Lenient,
            ..MatchConfig::default()
        };
        let m = DynamicThresholdMatcher::new(config, ExtractorConfig::default().layout()).unwrap();
        let probe = Embedding {
            values: vec![0.1; 200],
            extractor_version: Some("geo1-aaaa".into()),
        };
        let gallery = [tagged("old", vec![0.1; 150], "geo1-bbbb")];
        let report = m.compare(&probe, &gallery, 0.35);
        assert_eq!(report.truncated, 1);
        assert!(report.skipped.is_empty());
        assert!((report.result.unwrap().similarity - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_untagged_entries_are_compared() {
        let probe = Embedding {
            values: vec![0.3],
            extractor_version: Some("geo1-aaaa".into()),
        };
        let report = matcher().compare(&probe, &[entry("legacy", "L", vec![0.3])], 0.35);
        assert!(report.is_match());
    }

    #[test]
    fn test_below_threshold_reports_similarity() {
        let probe = Embedding::untagged(vec![0.0]);
        // distance 2.4 -> similarity 4%, threshold 21%
        let report = matcher().compare(&probe, &[entry("far", "F", vec![2.4])], 0.35);
        assert!(report.result.is_none());
        assert!((report.best_similarity.unwrap() - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_extracted_faces_match_their_enrollment() {
        use crate::extractor::test_faces::{synthetic_face, transformed};
        use crate::extractor::FeatureExtractor;

        let extractor = FeatureExtractor::default();
        let gallery: Vec<GalleryEntry> = (0..4)
            .map(|seed| GalleryEntry {
                id: seed.to_string(),
                name: format!("person-{seed}"),
                embedding: extractor.extract(&synthetic_face(seed)).unwrap(),
            })
            .collect();

        // same face, moved and zoomed in the frame
        let probe = extractor
            .extract(&transformed(&synthetic_face(2), 1.7, 25.0, -10.0))
            .unwrap();
        let report = DynamicThresholdMatcher::default().compare(&probe, &gallery, 0.35);

        let result = report.result.expect("enrolled face should match");
        assert_eq!(result.person_id, "2");
        assert!(result.similarity > 99.0, "similarity {}", result.similarity);
        assert!(report.skipped.is_empty());
        assert_eq!(report.truncated, 0);
    }

    #[test]
    fn test_non_finite_probe() {
        let probe = Embedding::untagged(vec![f32::INFINITY]);
        let report = matcher().compare(&probe, &[entry("x", "X", vec![0.0])], 0.35);
        assert!(report.result.is_none());
        assert_eq!(report.candidates, 0);
    }
}
