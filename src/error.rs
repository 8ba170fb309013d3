//! Error types for radiocast
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types ([`RecordError`], [`FeedError`])
//! - Context information on variants (station, title, date, attempt counts)
//! - A [`Result`] alias used throughout the crate

use thiserror::Error;

/// Result type alias for radiocast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for radiocast
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues without re-running the job.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "programs[0].path")
        key: Option<String>,
    },

    /// Broadcast service error (authentication, schedule lookup, playlist resolution)
    #[error("broadcast service error: {0}")]
    Broadcast(String),

    /// Recording job error
    #[error("recording error: {0}")]
    Record(#[from] RecordError),

    /// Feed synthesis error
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// Invalid cron expression during scheduler registration
    #[error("invalid cron expression \"{expression}\": {reason}")]
    Cron {
        /// The expression that failed to parse
        expression: String,
        /// Parser error message
        reason: String,
    },

    /// External audio tool execution failed (concatenation or transcoding)
    #[error("audio tool error: {0}")]
    AudioTool(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization error (sidecar metadata, config API)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error (config store)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem watching error
    #[error("watch error: {0}")]
    Watch(String),

    /// Requested entity not found (feed path, station, config file)
    #[error("not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Recording-job errors
///
/// Every variant carries enough identifying context (station, title, date)
/// that a failed job can be diagnosed from the log line alone.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Failed to resolve the broadcast occurrence for a scheduled program
    #[error("failed to resolve program: station={station_id} start={start}: {reason}")]
    ProgramResolution {
        /// Station the lookup ran against
        station_id: String,
        /// Formatted local start timestamp of the occurrence
        start: String,
        /// Underlying failure
        reason: String,
    },

    /// Failed to resolve the timeshift playlist for an occurrence
    #[error("failed to get playlist: station={station_id} title={title} date={date}: {reason}")]
    Playlist {
        /// Station identifier
        station_id: String,
        /// Program title being recorded
        title: String,
        /// Formatted local date of the occurrence
        date: String,
        /// Underlying failure
        reason: String,
    },

    /// One or more segment downloads failed permanently
    #[error("{} segment download(s) failed: {}", failures.len(), summarize_failures(failures))]
    SegmentDownload {
        /// Failed downloads as (index, error message) pairs
        failures: Vec<(usize, String)>,
    },

    /// Concatenation retries exhausted
    #[error("failed to concatenate segments after {attempts} attempts: {reason}")]
    ConcatExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Last failure
        reason: String,
    },

    /// Transcode retries exhausted
    #[error("failed to transcode after {attempts} attempts: {reason}")]
    TranscodeExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Last failure
        reason: String,
    },

    /// Sidecar metadata write failed after the audio file was finalized
    #[error("failed to write metadata sidecar for {path}: {reason}")]
    MetadataWrite {
        /// Audio file the sidecar belongs to
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// One or more independent sub-jobs failed (weekday sub-jobs or blanket stations)
    #[error("{failed} sub-job(s) failed: {detail}")]
    SubJobs {
        /// Number of failed sub-jobs
        failed: usize,
        /// Joined failure messages
        detail: String,
    },
}

/// Feed synthesis errors
///
/// A resync is all-or-nothing: any of these aborts the whole rebuild and
/// leaves the previous snapshot in place.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Filesystem walk over the episode directory failed
    #[error("failed to walk episode directory {path}: {reason}")]
    Walk {
        /// Path that could not be read
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// Rendering one feed document failed
    #[error("failed to render feed \"{path}\": {reason}")]
    Render {
        /// Feed path key whose rendering failed
        path: String,
        /// Underlying failure
        reason: String,
    },
}

fn summarize_failures(failures: &[(usize, String)]) -> String {
    // Cap the summary so a thousand-segment batch doesn't flood the log
    const MAX_SHOWN: usize = 5;
    let mut parts: Vec<String> = failures
        .iter()
        .take(MAX_SHOWN)
        .map(|(i, e)| format!("#{i}: {e}"))
        .collect();
    if failures.len() > MAX_SHOWN {
        parts.push(format!("... and {} more", failures.len() - MAX_SHOWN));
    }
    parts.join("; ")
}
