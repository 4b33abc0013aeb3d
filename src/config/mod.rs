use std::env;
use std::path::PathBuf;

/// Configuration for chunk reception and assembly
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Root directory holding one staging subdirectory per logical file (default: "temp")
    pub staging_root: PathBuf,

    /// Root directory receiving assembled artifacts (default: "assembled")
    pub output_root: PathBuf,

    /// Maximum size of a single chunk payload in bytes (default: 1 MB)
    pub max_chunk_size: usize,

    /// Maximum total size of one logical file in bytes (default: 1 GB)
    pub max_file_size: u64,

    /// Interval between staging sweeps in seconds (default: 60)
    pub sweep_interval_secs: u64,

    /// Staging areas untouched for this many hours are abandoned (default: 24)
    pub staging_cleanup_age_hours: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("temp"),
            output_root: PathBuf::from("assembled"),
            max_chunk_size: 1024 * 1024,       // 1 MB
            max_file_size: 1024 * 1024 * 1024, // 1 GB
            sweep_interval_secs: 60,
            staging_cleanup_age_hours: 24,
        }
    }
}

impl ReceiverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_root: env::var("STAGING_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.staging_root),

            output_root: env::var("OUTPUT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.output_root),

            max_chunk_size: env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunk_size),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.sweep_interval_secs),

            staging_cleanup_age_hours: env::var("STAGING_CLEANUP_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_cleanup_age_hours),
        }
    }

    /// Config rooted in a scratch directory, used by tests and local runs
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            staging_root: root.join("staging"),
            output_root: root.join("output"),
            max_chunk_size: 1024 * 1024,
            max_file_size: 256 * 1024 * 1024,
            sweep_interval_secs: 5,
            staging_cleanup_age_hours: 1,
        }
    }
}
