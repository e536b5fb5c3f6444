use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Recorded landmark frames served by the replay provider.
    pub recording_path: PathBuf,
    /// Optional TOML file overriding extractor and matcher constants.
    pub tuning_file: Option<PathBuf>,
    /// Minimum time between two detection passes.
    pub poll_interval: Duration,
    /// Minimum time between two detection log writes.
    pub log_interval: Duration,
    /// Base similarity threshold (fraction of 100) for a positive match.
    pub match_threshold: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Config {
    /// Load configuration from `FACEMARK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let db_path = facemark_store::default_db_path();

        let recording_path = std::env::var("FACEMARK_RECORDING")
            .map(PathBuf::from)
            .unwrap_or_else(|_| db_path.with_file_name("recording.json"));

        Self {
            db_path,
            recording_path,
            tuning_file: std::env::var("FACEMARK_TUNING_FILE").ok().map(PathBuf::from),
            poll_interval: Duration::from_millis(env_u64("FACEMARK_POLL_INTERVAL_MS", 300)),
            log_interval: Duration::from_secs(env_u64("FACEMARK_LOG_INTERVAL_SECS", 5)),
            match_threshold: env_f32("FACEMARK_MATCH_THRESHOLD", 0.5),
            frame_width: env_u32("FACEMARK_FRAME_WIDTH", 640),
            frame_height: env_u32("FACEMARK_FRAME_HEIGHT", 480),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
