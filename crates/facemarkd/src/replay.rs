//! Replay provider: serves pre-recorded landmark frames.
//!
//! Stands in for a live landmark model in headless runs. The recording is a
//! JSON document `{"frames": [[face, ...], ...]}` where each face is an array
//! of `{x, y}` keypoints; frame `n` of the loop receives recorded frame
//! `n % frames.len()`.

use facemark_core::{Face, Frame, LandmarkProvider, ProviderError};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Recording {
    pub frames: Vec<Vec<Face>>,
}

pub struct ReplayProvider {
    recording: Recording,
}

impl ReplayProvider {
    pub fn new(recording: Recording) -> Self {
        Self { recording }
    }

    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        if !path.exists() {
            return Err(ProviderError::ModelUnavailable(format!(
                "recording not found: {}",
                path.display()
            )));
        }
        let src = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::InitFailed(format!("{}: {e}", path.display())))?;
        let recording: Recording = serde_json::from_str(&src)
            .map_err(|e| ProviderError::InitFailed(format!("{}: {e}", path.display())))?;
        tracing::info!(
            path = %path.display(),
            frames = recording.frames.len(),
            "loaded landmark recording"
        );
        Ok(Self::new(recording))
    }
}

impl LandmarkProvider for ReplayProvider {
    fn estimate_faces(&self, frame: &Frame) -> Result<Vec<Face>, ProviderError> {
        let frames = &self.recording.frames;
        if frames.is_empty() {
            return Ok(Vec::new());
        }
        let idx = (frame.sequence % frames.len() as u64) as usize;
        Ok(frames[idx].clone())
    }
}
