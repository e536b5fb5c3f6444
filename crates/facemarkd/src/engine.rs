use facemark_core::config::ConfigError;
use facemark_core::types::OverlayBox;
use facemark_core::{
    DynamicThresholdMatcher, ExtractError, Face, FeatureExtractor, Frame, GalleryEntry,
    LandmarkProvider, MatchReport, Matcher, ProviderError, ProviderHandle, Tuning,
};
use facemark_store::{FaceStore, NewDetectionLog, StoreError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Overlay boxes are enlarged so the whole head fits inside.
const OVERLAY_SCALE: f32 = 1.5;

/// Lower bound on the tick period; a zero period would spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("store lock poisoned")]
    StorePoisoned,
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Extraction + matching pipeline shared by every frame.
#[derive(Debug, Clone)]
pub struct Recognizer {
    extractor: FeatureExtractor,
    matcher: DynamicThresholdMatcher,
}

/// Outcome for one face in one frame.
#[derive(Debug)]
pub struct FaceRecognition {
    pub overlay: Option<OverlayBox>,
    pub outcome: Result<MatchReport, ExtractError>,
}

impl FaceRecognition {
    /// Display name: the matched person, or "unknown".
    pub fn label(&self) -> &str {
        match &self.outcome {
            Ok(MatchReport { result: Some(m), .. }) => &m.name,
            _ => "unknown",
        }
    }
}

impl Recognizer {
    pub fn new(tuning: &Tuning) -> Result<Self, ConfigError> {
        let extractor = FeatureExtractor::new(tuning.extractor.clone())?;
        let matcher = DynamicThresholdMatcher::new(tuning.matcher.clone(), extractor.layout())?;
        Ok(Self { extractor, matcher })
    }

    pub fn recognize(&self, faces: &[Face], gallery: &[GalleryEntry], threshold: f32) -> Vec<FaceRecognition> {
        faces
            .iter()
            .map(|face| FaceRecognition {
                overlay: face.overlay_box(OVERLAY_SCALE),
                outcome: self
                    .extractor
                    .extract(face)
                    .map(|embedding| self.matcher.compare(&embedding, gallery, threshold)),
            })
            .collect()
    }
}

/// Timing and thresholds for the detection loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub log_interval: Duration,
    pub match_threshold: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Counters accumulated over the life of a detection loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    pub frames: u64,
    pub faces: u64,
    pub matches: u64,
    pub extraction_failures: u64,
    pub skipped_entries: u64,
    pub logs_written: u64,
    pub errors: u64,
}

/// Handle to a running detection loop.
pub struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<LoopStats>,
}

impl LoopHandle {
    /// Ask the loop to stop after the current iteration and wait for it.
    ///
    /// An in-flight inference call is allowed to finish; it is simply not
    /// followed by another one.
    pub async fn stop(self) -> LoopStats {
        let _ = self.stop_tx.send(true);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "detection loop task failed");
                LoopStats::default()
            }
        }
    }
}

/// Spawn the polled detection loop on the current runtime.
///
/// Dropping the returned handle also stops the loop.
pub fn spawn_detection_loop<P: LandmarkProvider + 'static>(
    provider: Arc<ProviderHandle<P>>,
    store: Arc<Mutex<FaceStore>>,
    recognizer: Recognizer,
    settings: LoopSettings,
) -> LoopHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let detection = DetectionLoop {
        provider,
        store,
        recognizer,
        settings,
        stats: LoopStats::default(),
        last_log: None,
    };
    let task = tokio::spawn(detection.run(stop_rx));
    LoopHandle { stop_tx, task }
}

struct DetectionLoop<P> {
    provider: Arc<ProviderHandle<P>>,
    store: Arc<Mutex<FaceStore>>,
    recognizer: Recognizer,
    settings: LoopSettings,
    stats: LoopStats,
    last_log: Option<Instant>,
}

impl<P: LandmarkProvider + 'static> DetectionLoop<P> {
    async fn run(mut self, mut stop_rx: watch::Receiver<bool>) -> LoopStats {
        let period = self.settings.poll_interval.max(MIN_POLL_INTERVAL);
        if period != self.settings.poll_interval {
            tracing::warn!(
                requested_ms = self.settings.poll_interval.as_millis() as u64,
                "poll interval too small, clamping"
            );
        }
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            poll_ms = period.as_millis() as u64,
            threshold = self.settings.match_threshold,
            "detection loop started"
        );

        let mut sequence = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.iteration(sequence).await {
                self.stats.errors += 1;
                tracing::warn!(error = %e, sequence, "detection pass failed");
            }
            sequence += 1;
        }

        tracing::info!(stats = ?self.stats, "detection loop stopped");
        self.stats
    }

    async fn iteration(&mut self, sequence: u64) -> Result<(), EngineError> {
        let provider = self.provider.get().await?;
        let frame = Frame {
            sequence,
            width: self.settings.frame_width,
            height: self.settings.frame_height,
            data: Vec::new(),
        };
        let faces = tokio::task::spawn_blocking(move || provider.estimate_faces(&frame)).await??;
        self.stats.frames += 1;

        if faces.is_empty() {
            tracing::trace!(sequence, "no face detected");
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        let snapshot = tokio::task::spawn_blocking(move || {
            let store = store.lock().map_err(|_| EngineError::StorePoisoned)?;
            Ok::<_, EngineError>(store.gallery()?)
        })
        .await??;

        let recognitions =
            self.recognizer
                .recognize(&faces, &snapshot.entries, self.settings.match_threshold);

        for (i, rec) in recognitions.iter().enumerate() {
            self.stats.faces += 1;
            match &rec.outcome {
                Ok(report) => {
                    self.stats.skipped_entries += report.skipped.len() as u64;
                    if let Some(m) = &report.result {
                        self.stats.matches += 1;
                        tracing::info!(
                            sequence,
                            face = i,
                            name = %m.name,
                            similarity = m.similarity,
                            overlay = ?rec.overlay,
                            "face recognized"
                        );
                    } else {
                        tracing::debug!(
                            sequence,
                            face = i,
                            best = ?report.best_similarity,
                            overlay = ?rec.overlay,
                            "face not recognized"
                        );
                    }
                }
                Err(e) => {
                    self.stats.extraction_failures += 1;
                    tracing::debug!(sequence, face = i, error = %e, "feature extraction failed");
                }
            }
        }

        let due = self
            .last_log
            .map_or(true, |t| t.elapsed() >= self.settings.log_interval);
        if due {
            self.last_log = Some(Instant::now());
            self.write_log(&recognitions).await?;
        }

        Ok(())
    }

    /// Persist the first face's outcome as a detection log entry.
    async fn write_log(&mut self, recognitions: &[FaceRecognition]) -> Result<(), EngineError> {
        let first = recognitions
            .first()
            .and_then(|r| r.outcome.as_ref().ok())
            .and_then(|report| report.result.as_ref());
        let log = NewDetectionLog {
            person_id: first.map(|m| m.person_id.clone()),
            person_name: first.map(|m| m.name.clone()),
            confidence: first.map(|m| m.similarity.round() as u32),
            face_count: recognitions.len() as u32,
        };

        let store = Arc::clone(&self.store);
        let id = tokio::task::spawn_blocking(move || {
            let store = store.lock().map_err(|_| EngineError::StorePoisoned)?;
            Ok::<_, EngineError>(store.log_detection(&log)?)
        })
        .await??;

        self.stats.logs_written += 1;
        tracing::debug!(log_id = id, label = ?recognitions.first().map(|r| r.label()), "detection logged");
        Ok(())
    }
}
