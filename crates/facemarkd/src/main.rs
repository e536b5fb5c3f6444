use anyhow::{Context, Result};
use facemark_core::{ProviderHandle, Tuning};
use facemark_store::FaceStore;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod replay;

use engine::{LoopSettings, Recognizer};
use replay::ReplayProvider;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facemarkd starting");

    let config = config::Config::from_env();

    let tuning = match &config.tuning_file {
        Some(path) => Tuning::load(path)?,
        None => Tuning::default(),
    };
    let recognizer = Recognizer::new(&tuning).context("invalid tuning")?;

    tracing::info!(path = %config.db_path.display(), "opening face store");
    let store = FaceStore::open(&config.db_path)?;
    let snapshot = store.gallery()?;
    tracing::info!(
        enrolled = snapshot.entries.len(),
        rejected = snapshot.rejected.len(),
        "gallery loaded"
    );
    let store = Arc::new(Mutex::new(store));

    // Provider loads lazily on the first detection pass.
    let recording_path = config.recording_path.clone();
    let provider = Arc::new(ProviderHandle::new(move || {
        ReplayProvider::load(&recording_path)
    }));

    let settings = LoopSettings {
        poll_interval: config.poll_interval,
        log_interval: config.log_interval,
        match_threshold: config.match_threshold,
        frame_width: config.frame_width,
        frame_height: config.frame_height,
    };
    let detection = engine::spawn_detection_loop(provider, store, recognizer, settings);

    tracing::info!("facemarkd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facemarkd shutting down");

    let stats = detection.stop().await;
    tracing::info!(
        frames = stats.frames,
        faces = stats.faces,
        matches = stats.matches,
        logs = stats.logs_written,
        errors = stats.errors,
        "detection loop summary"
    );

    Ok(())
}
