//! Tunable extraction and matching parameters.
//!
//! Every constant that shapes an embedding or a match decision lives here with
//! its default. A TOML tuning file may override any subset of them:
//!
//! ```toml
//! [matcher]
//! scale = 2.0
//! base_threshold = 0.4
//!
//! [[extractor.ratios]]
//! name = "aspect"
//! numerator = "box_width"
//! denominator = "box_height"
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

const VERSION_TAG_PREFIX: &str = "geo1-";
const VERSION_TAG_HEX_BYTES: usize = 8;

// MediaPipe FaceMesh indices.
const LEFT_EYE: [usize; 7] = [33, 133, 160, 159, 158, 157, 173];
const RIGHT_EYE: [usize; 7] = [362, 263, 387, 386, 385, 384, 398];
const NOSE: [usize; 7] = [1, 4, 5, 6, 168, 197, 195];
const MOUTH: [usize; 9] = [61, 291, 0, 17, 269, 405, 314, 84, 181];
const CHEEKS_AND_JAW: [usize; 6] = [234, 454, 132, 361, 152, 377];

const DEFAULT_PAIRS: [(&str, usize, usize); 7] = [
    ("eye_distance", 33, 263),
    ("left_eye_to_nose", 33, 1),
    ("right_eye_to_nose", 263, 1),
    ("nose_to_mouth", 1, 0),
    ("mouth_width", 61, 291),
    ("cheek_width", 234, 454),
    ("brow_to_chin", 10, 152),
];

const DEFAULT_SCALE: f32 = 2.5;
const DEFAULT_BASE_THRESHOLD: f32 = 0.35;
const DEFAULT_SINGLE_CANDIDATE_FACTOR: f32 = 0.6;
const DEFAULT_SEPARATION_MARGIN: f32 = 0.3;
const DEFAULT_SEPARATION_FACTOR: f32 = 0.8;

const COORDINATE_WEIGHT: f32 = 1.0;
const DISTANCE_WEIGHT: f32 = 3.0;
const RATIO_WEIGHT: f32 = 5.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read tuning file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tuning TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("extractor keypoint list is empty")]
    EmptyKeypoints,
    #[error("duplicate feature name: {0}")]
    DuplicateName(String),
    #[error("ratio {ratio} references unknown pair {pair}")]
    UnknownPair { ratio: String, pair: String },
    #[error("ratio {0} mixes box and pair terms")]
    MixedRatioTerms(String),
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f32 },
    #[error("{field} must be finite and non-negative, got {value}")]
    Negative { field: &'static str, value: f32 },
}

/// A named distance between two keypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointPair {
    pub name: String,
    pub from: usize,
    pub to: usize,
}

/// One side of a geometric ratio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioTerm {
    BoxWidth,
    BoxHeight,
    /// Normalized distance of the named pair.
    Pair(String),
}

impl RatioTerm {
    fn is_box(&self) -> bool {
        matches!(self, RatioTerm::BoxWidth | RatioTerm::BoxHeight)
    }
}

/// A dimensionless quotient of two like-kind terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSpec {
    pub name: String,
    pub numerator: RatioTerm,
    pub denominator: RatioTerm,
}

/// Segment sizes of an embedding, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureLayout {
    pub coordinates: usize,
    pub distances: usize,
    pub ratios: usize,
}

impl FeatureLayout {
    pub fn dimension(&self) -> usize {
        self.coordinates + self.distances + self.ratios
    }
}

/// Which keypoints, pairs, and ratios make up an embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub keypoints: Vec<usize>,
    pub pairs: Vec<KeypointPair>,
    pub ratios: Vec<RatioSpec>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        let keypoints = LEFT_EYE
            .iter()
            .chain(&RIGHT_EYE)
            .chain(&NOSE)
            .chain(&MOUTH)
            .chain(&CHEEKS_AND_JAW)
            .copied()
            .collect();

        let pairs = DEFAULT_PAIRS
            .iter()
            .map(|&(name, from, to)| KeypointPair {
                name: name.to_string(),
                from,
                to,
            })
            .collect();

        let pair = |name: &str| RatioTerm::Pair(name.to_string());
        let ratios = vec![
            RatioSpec {
                name: "aspect".into(),
                numerator: RatioTerm::BoxWidth,
                denominator: RatioTerm::BoxHeight,
            },
            RatioSpec {
                name: "eye_to_cheek".into(),
                numerator: pair("eye_distance"),
                denominator: pair("cheek_width"),
            },
            RatioSpec {
                name: "mouth_to_eye".into(),
                numerator: pair("mouth_width"),
                denominator: pair("eye_distance"),
            },
            RatioSpec {
                name: "nose_mouth_to_face".into(),
                numerator: pair("nose_to_mouth"),
                denominator: pair("brow_to_chin"),
            },
        ];

        Self {
            keypoints,
            pairs,
            ratios,
        }
    }
}

impl ExtractorConfig {
    /// Check internal consistency: names unique, ratio terms resolvable and like-kind.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keypoints.is_empty() {
            return Err(ConfigError::EmptyKeypoints);
        }

        let mut names = HashSet::new();
        for name in self
            .pairs
            .iter()
            .map(|p| &p.name)
            .chain(self.ratios.iter().map(|r| &r.name))
        {
            if !names.insert(name.as_str()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
        }

        for ratio in &self.ratios {
            if ratio.numerator.is_box() != ratio.denominator.is_box() {
                return Err(ConfigError::MixedRatioTerms(ratio.name.clone()));
            }
            for term in [&ratio.numerator, &ratio.denominator] {
                if let RatioTerm::Pair(pair) = term {
                    if self.pair_position(pair).is_none() {
                        return Err(ConfigError::UnknownPair {
                            ratio: ratio.name.clone(),
                            pair: pair.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn layout(&self) -> FeatureLayout {
        FeatureLayout {
            coordinates: self.keypoints.len() * 2,
            distances: self.pairs.len(),
            ratios: self.ratios.len(),
        }
    }

    /// Smallest face length that covers every referenced keypoint.
    pub fn required_keypoints(&self) -> usize {
        self.keypoints
            .iter()
            .copied()
            .chain(self.pairs.iter().flat_map(|p| [p.from, p.to]))
            .max()
            .map_or(0, |m| m + 1)
    }

    pub(crate) fn pair_position(&self, name: &str) -> Option<usize> {
        self.pairs.iter().position(|p| p.name == name)
    }

    /// Stable identifier of this configuration, stamped onto every embedding.
    ///
    /// Two configurations share a tag iff their canonical JSON is identical.
    pub fn version_tag(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        let hex: String = digest
            .iter()
            .take(VERSION_TAG_HEX_BYTES)
            .map(|b| format!("{b:02x}"))
            .collect();
        format!("{VERSION_TAG_PREFIX}{hex}")
    }
}

/// Per-segment weights for the distance computation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentWeights {
    pub coordinate: f32,
    pub distance: f32,
    pub ratio: f32,
}

impl Default for SegmentWeights {
    fn default() -> Self {
        Self {
            coordinate: COORDINATE_WEIGHT,
            distance: DISTANCE_WEIGHT,
            ratio: RATIO_WEIGHT,
        }
    }
}

impl SegmentWeights {
    /// Equal weights; the distance reduces to a plain RMS difference.
    pub fn uniform() -> Self {
        Self {
            coordinate: 1.0,
            distance: 1.0,
            ratio: 1.0,
        }
    }
}

/// How the matcher treats gallery embeddings tagged with a different extractor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Skip the entry and report it.
    #[default]
    Strict,
    /// Compare anyway (truncating on length mismatch) and log a warning.
    Lenient,
}

/// Scoring and acceptance parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Distance that maps to similarity 0 (`D`).
    pub scale: f32,
    pub base_threshold: f32,
    /// Threshold multiplier when there is exactly one comparable candidate.
    pub single_candidate_factor: f32,
    /// Minimum `second_best - best` distance gap that counts as unambiguous.
    pub separation_margin: f32,
    /// Threshold multiplier for an unambiguous best candidate.
    pub separation_factor: f32,
    pub weights: SegmentWeights,
    pub version_policy: VersionPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            base_threshold: DEFAULT_BASE_THRESHOLD,
            single_candidate_factor: DEFAULT_SINGLE_CANDIDATE_FACTOR,
            separation_margin: DEFAULT_SEPARATION_MARGIN,
            separation_factor: DEFAULT_SEPARATION_FACTOR,
            weights: SegmentWeights::default(),
            version_policy: VersionPolicy::default(),
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("scale", self.scale),
            ("single_candidate_factor", self.single_candidate_factor),
            ("separation_factor", self.separation_factor),
            ("weights.coordinate", self.weights.coordinate),
            ("weights.distance", self.weights.distance),
            ("weights.ratio", self.weights.ratio),
        ];
        for (field, value) in positive {
            // `!(v > 0)` also rejects NaN
            if !(value > 0.0) {
                return Err(ConfigError::NonPositive { field, value });
            }
        }
        let non_negative = [
            ("base_threshold", self.base_threshold),
            ("separation_margin", self.separation_margin),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Negative { field, value });
            }
        }
        Ok(())
    }
}

/// Full tuning set, as loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub extractor: ExtractorConfig,
    pub matcher: MatchConfig,
}

impl Tuning {
    /// Parse and validate a tuning document.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let tuning: Tuning = toml::from_str(src)?;
        tuning.extractor.validate()?;
        tuning.matcher.validate()?;
        Ok(tuning)
    }

    /// Load a tuning file from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let tuning = Self::from_toml_str(&src)?;
        tracing::info!(
            path = %path.display(),
            version = %tuning.extractor.version_tag(),
            dimension = tuning.extractor.layout().dimension(),
            "loaded tuning file"
        );
        Ok(tuning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_extractor_is_valid() {
        let config = ExtractorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.keypoints.len(), 36);
        assert_eq!(config.layout().dimension(), 72 + 7 + 4);
        // brow_to_chin reaches index 10, cheeks reach 454
        assert_eq!(config.required_keypoints(), 455);
    }

    #[test]
    fn test_version_tag_is_stable_and_config_sensitive() {
        let a = ExtractorConfig::default();
        let mut b = ExtractorConfig::default();
        assert_eq!(a.version_tag(), b.version_tag());
        assert!(a.version_tag().starts_with("geo1-"));
        assert_eq!(a.version_tag().len(), "geo1-".len() + 16);

        b.keypoints.pop();
        assert_ne!(a.version_tag(), b.version_tag());
    }

    #[test]
    fn test_validate_rejects_unknown_pair() {
        let mut config = ExtractorConfig::default();
        config.ratios.push(RatioSpec {
            name: "bogus".into(),
            numerator: RatioTerm::Pair("nope".into()),
            denominator: RatioTerm::Pair("eye_distance".into()),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownPair { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_mixed_terms() {
        let mut config = ExtractorConfig::default();
        config.ratios.push(RatioSpec {
            name: "mixed".into(),
            numerator: RatioTerm::BoxWidth,
            denominator: RatioTerm::Pair("eye_distance".into()),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MixedRatioTerms(name)) if name == "mixed"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = ExtractorConfig::default();
        let dup = config.pairs[0].clone();
        config.pairs.push(dup);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_tuning_partial_override() {
        let tuning = Tuning::from_toml_str(
            r#"
            [matcher]
            scale = 2.0
            version_policy = "lenient"

            [matcher.weights]
            ratio = 8.0
            "#,
        )
        .unwrap();
        assert_eq!(tuning.matcher.scale, 2.0);
        assert_eq!(tuning.matcher.base_threshold, DEFAULT_BASE_THRESHOLD);
        assert_eq!(tuning.matcher.version_policy, VersionPolicy::Lenient);
        assert_eq!(tuning.matcher.weights.ratio, 8.0);
        assert_eq!(tuning.matcher.weights.distance, DISTANCE_WEIGHT);
        assert_eq!(tuning.extractor, ExtractorConfig::default());
    }

    #[test]
    fn test_tuning_custom_ratios() {
        let tuning = Tuning::from_toml_str(
            r#"
            [extractor]
            keypoints = [33, 263]

            [[extractor.pairs]]
            name = "eyes"
            from = 33
            to = 263

            [[extractor.ratios]]
            name = "aspect"
            numerator = "box_width"
            denominator = "box_height"

            [[extractor.ratios]]
            name = "eyes_to_eyes"
            numerator = { pair = "eyes" }
            denominator = { pair = "eyes" }
            "#,
        )
        .unwrap();
        assert_eq!(tuning.extractor.layout().dimension(), 4 + 1 + 2);
        assert_eq!(
            tuning.extractor.ratios[1].numerator,
            RatioTerm::Pair("eyes".into())
        );
    }

    #[test]
    fn test_tuning_rejects_non_positive_scale() {
        let err = Tuning::from_toml_str("[matcher]\nscale = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::NonPositive { field: "scale", .. }));
    }

    #[test]
    fn test_tuning_rejects_bad_threshold_and_margin() {
        let err = Tuning::from_toml_str("[matcher]\nbase_threshold = nan\n").unwrap_err();
        assert!(matches!(err, ConfigError::Negative { field: "base_threshold", .. }));

        let err = Tuning::from_toml_str("[matcher]\nseparation_margin = -0.1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Negative { field: "separation_margin", .. }));

        let tuning = Tuning::from_toml_str("[matcher]\nbase_threshold = 0.0\n").unwrap();
        assert_eq!(tuning.matcher.base_threshold, 0.0);
    }
}
