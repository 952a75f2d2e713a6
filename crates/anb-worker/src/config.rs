//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anb_models::{MAX_ATTEMPTS, RETRY_DELAY_SECS};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs (one ffmpeg pipeline each)
    pub max_concurrent_jobs: usize,
    /// Root of the per-attempt working directories
    pub work_dir: PathBuf,
    /// Directory caching the synthesized bumper clips
    pub assets_dir: PathBuf,
    /// How long a single receive waits for work
    pub poll_interval: Duration,
    /// How often the worker scans for deliveries abandoned by crashed consumers
    pub claim_interval: Duration,
    /// Minimum idle time before an abandoned delivery is claimed; must
    /// outlast the slowest attempt or live work gets stolen
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Total attempts per job before failure is terminal
    pub max_attempts: u32,
    /// Fixed delay before each retry
    pub retry_delay: Duration,
    /// Per-invocation ffmpeg timeout; None waits indefinitely
    pub ffmpeg_timeout: Option<Duration>,
    /// ffmpeg binary name or path
    pub ffmpeg_path: String,
    /// Prometheus listener address
    pub metrics_addr: SocketAddr,
    /// SQLite database file
    pub database_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 1,
            work_dir: PathBuf::from("/tmp/anb-worker"),
            assets_dir: PathBuf::from("assets"),
            poll_interval: Duration::from_millis(1000),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(60),
            max_attempts: MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
            ffmpeg_timeout: None,
            ffmpeg_path: "ffmpeg".to_string(),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9001)),
            database_path: PathBuf::from("data/anb.db"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(raw) => raw.parse().map_err(|e| {
                WorkerError::config_error(format!("Invalid METRICS_ADDR '{}': {}", raw, e))
            })?,
            Err(_) => defaults.metrics_addr,
        };

        let config = Self {
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(defaults.max_concurrent_jobs),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            assets_dir: std::env::var("WORKER_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
            poll_interval: env_parse("WORKER_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            claim_interval: env_parse("WORKER_CLAIM_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: env_parse("WORKER_CLAIM_MIN_IDLE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_delay: env_parse("WORKER_RETRY_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_delay),
            ffmpeg_timeout: env_parse("WORKER_FFMPEG_TIMEOUT_SECS").map(Duration::from_secs),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            metrics_addr,
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_ATTEMPTS must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.metrics_addr.port(), 9001);
        assert!(config.ffmpeg_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_is_rejected() {
        let config = WorkerConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
