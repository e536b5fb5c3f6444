//! Geometric feature extraction from facial landmarks.
//!
//! An embedding is three segments concatenated in a fixed order:
//!
//! 1. normalized coordinates of each configured keypoint, `(x, y)` interleaved,
//!    relative to the face's bounding-box center and divided by its size;
//! 2. Euclidean distances between configured keypoint pairs, measured in
//!    normalized coordinates;
//! 3. dimensionless ratios of box dimensions or pair distances.
//!
//! Normalization removes translation and scale but not rotation.

use crate::config::{ConfigError, ExtractorConfig, FeatureLayout, RatioTerm};
use crate::types::{BoundingBox, Embedding, Face};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    #[error("face has no keypoints")]
    EmptyFace,
    #[error("face has {available} keypoints, index {index} is required")]
    MissingKeypoint { index: usize, available: usize },
    #[error("degenerate face geometry: {0}")]
    DegenerateGeometry(String),
}

/// Converts faces into embeddings under one fixed configuration.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
    version: String,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        let config = ExtractorConfig::default();
        let version = config.version_tag();
        Self { config, version }
    }
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let version = config.version_tag();
        tracing::debug!(
            %version,
            dimension = config.layout().dimension(),
            "feature extractor configured"
        );
        Ok(Self { config, version })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Version tag stamped onto every embedding this extractor produces.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn layout(&self) -> FeatureLayout {
        self.config.layout()
    }

    pub fn dimension(&self) -> usize {
        self.layout().dimension()
    }

    /// Extract an embedding from one face.
    pub fn extract(&self, face: &Face) -> Result<Embedding, ExtractError> {
        let required = self.config.required_keypoints();
        if face.keypoints.is_empty() {
            return Err(ExtractError::EmptyFace);
        }
        if face.keypoints.len() < required {
            return Err(ExtractError::MissingKeypoint {
                index: required - 1,
                available: face.keypoints.len(),
            });
        }
        if let Some(i) = face
            .keypoints
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(ExtractError::DegenerateGeometry(format!(
                "keypoint {i} is not finite"
            )));
        }

        let bbox = face.bounding_box().ok_or(ExtractError::EmptyFace)?;
        let frame = NormalizedFrame::new(&bbox)?;

        let layout = self.layout();
        let mut values = Vec::with_capacity(layout.dimension());

        for &idx in &self.config.keypoints {
            let (nx, ny) = frame.normalize(face, idx);
            values.push(nx);
            values.push(ny);
        }

        let distances: Vec<f32> = self
            .config
            .pairs
            .iter()
            .map(|pair| frame.distance(face, pair.from, pair.to))
            .collect();
        values.extend_from_slice(&distances);

        for ratio in &self.config.ratios {
            let numerator = self.term_value(&ratio.numerator, &bbox, &distances);
            let denominator = self.term_value(&ratio.denominator, &bbox, &distances);
            if !(denominator.abs() > f32::EPSILON) {
                return Err(ExtractError::DegenerateGeometry(format!(
                    "ratio {} has zero denominator",
                    ratio.name
                )));
            }
            values.push(numerator / denominator);
        }

        if !values.iter().all(|v| v.is_finite()) {
            return Err(ExtractError::DegenerateGeometry(
                "non-finite feature value".into(),
            ));
        }

        Ok(Embedding {
            values,
            extractor_version: Some(self.version.clone()),
        })
    }

    fn term_value(&self, term: &RatioTerm, bbox: &BoundingBox, distances: &[f32]) -> f32 {
        match term {
            RatioTerm::BoxWidth => bbox.width(),
            RatioTerm::BoxHeight => bbox.height(),
            // validate() guarantees the pair exists
            RatioTerm::Pair(name) => self
                .config
                .pair_position(name)
                .and_then(|i| distances.get(i).copied())
                .unwrap_or(0.0),
        }
    }
}

/// Bounding-box frame used to normalize coordinates.
struct NormalizedFrame {
    center_x: f32,
    center_y: f32,
    width: f32,
    height: f32,
}

impl NormalizedFrame {
    fn new(bbox: &BoundingBox) -> Result<Self, ExtractError> {
        let width = bbox.width();
        let height = bbox.height();
        if !(width > 0.0) || !(height > 0.0) {
            return Err(ExtractError::DegenerateGeometry(format!(
                "bounding box is {width}x{height}"
            )));
        }
        let (center_x, center_y) = bbox.center();
        Ok(Self {
            center_x,
            center_y,
            width,
            height,
        })
    }

    fn normalize(&self, face: &Face, idx: usize) -> (f32, f32) {
        let p = face.keypoints[idx];
        (
            (p.x - self.center_x) / self.width,
            (p.y - self.center_y) / self.height,
        )
    }

    fn distance(&self, face: &Face, a: usize, b: usize) -> f32 {
        let (ax, ay) = self.normalize(face, a);
        let (bx, by) = self.normalize(face, b);
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}
