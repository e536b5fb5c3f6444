//! facemark-core: Landmark-based face recognition engine.
//!
//! Turns facial landmarks from an external model into geometric embeddings
//! and matches them against a gallery of enrolled persons.

pub mod config;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod provider;
pub mod quality;
pub mod scorer;
pub mod types;

pub use config::{ExtractorConfig, MatchConfig, SegmentWeights, Tuning, VersionPolicy};
pub use extractor::{ExtractError, FeatureExtractor};
pub use matcher::{DynamicThresholdMatcher, MatchReport, Matcher, SkipReason, SkippedEntry};
pub use provider::{Frame, LandmarkProvider, ProviderError, ProviderHandle};
pub use scorer::{Distance, Scorer};
pub use types::{BoundingBox, Embedding, Face, GalleryEntry, Keypoint, MatchResult};
