//! Configuration types for radiocast
//!
//! Configuration is an immutable snapshot: it is loaded (from a YAML file, a
//! URL, or the API), validated, and then replaced wholesale on refresh. Jobs
//! capture the snapshot they need at trigger time and never read through to
//! live mutable state.

use crate::error::{Error, Result};
use crate::timeutil::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Cron expression used for the blanket recording job when none is configured
const DEFAULT_BLANKET_CRON: &str = "0 3 * * *";

/// Feed path reserved for the synthetic feed containing every episode
pub const RESERVED_ALL_PATH: &str = "all";

/// Target audio encoding for a finished episode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// Keep the stream's native AAC (no transcode, concatenated file is moved as-is)
    #[default]
    Aac,
    /// Transcode the concatenated file to MP3
    Mp3,
}

impl AudioFormat {
    /// File extension for this format (without dot)
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Aac => "aac",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// MIME type used for feed enclosures
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Aac => "audio/aac",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }
}

/// One configured program: a logical show definition
///
/// Immutable once loaded; replaced wholesale on config refresh.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Program {
    /// Display title of the podcast this program publishes to
    #[serde(default)]
    pub title: String,

    /// Weekdays the program airs on (weekly recurrence); empty for none
    #[serde(default)]
    pub weekdays: Vec<Weekday>,

    /// Cron expression controlling when the recording job fires
    #[serde(default)]
    pub cron: String,

    /// Station identifier at the broadcast service
    #[serde(default)]
    pub station: String,

    /// Local start time of day, "HHMM" (e.g. "0100")
    #[serde(default)]
    pub start: String,

    /// Target audio encoding (default: aac)
    #[serde(default)]
    pub encoding: AudioFormat,

    /// Podcast artwork URL
    #[serde(default)]
    pub image_url: String,

    /// Publish path grouping this program's episodes into one feed
    #[serde(default)]
    pub path: String,
}

/// Per-station settings for blanket recording
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StationConfig {
    /// Podcast artwork URL for this station's feed
    #[serde(default)]
    pub image_url: String,
}

/// Blanket ("record everything enabled") mode configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlanketConfig {
    /// Whether the blanket recording job is scheduled at all
    #[serde(default)]
    pub enable: bool,

    /// Cron expression for the blanket job (default: "0 3 * * *")
    #[serde(default = "default_blanket_cron")]
    pub cron: String,

    /// Target encoding for blanket episodes (default: aac)
    #[serde(default)]
    pub encoding: AudioFormat,

    /// Per-station settings, keyed by lowercase station id
    #[serde(default)]
    pub stations: HashMap<String, StationConfig>,

    /// Stations to record; everything else is skipped
    #[serde(default)]
    pub enable_stations: Vec<String>,
}

fn default_blanket_cron() -> String {
    DEFAULT_BLANKET_CRON.to_string()
}

impl Default for BlanketConfig {
    fn default() -> Self {
        Self {
            enable: false,
            cron: default_blanket_cron(),
            encoding: AudioFormat::default(),
            stations: HashMap::new(),
            enable_stations: Vec::new(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Configured programs, one scheduled recording job each
    #[serde(default)]
    pub programs: Vec<Program>,

    /// Blanket recording mode
    #[serde(default)]
    pub blanket: BlanketConfig,
}

impl Config {
    /// Parse a YAML document, applying defaults and normalizing station keys
    pub fn from_yaml(s: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(s)?;
        config.normalize();
        Ok(config)
    }

    /// Load from a YAML file, creating an empty config file if none exists
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Fetch and parse a YAML config from a URL (HTTP 200 required)
    pub async fn fetch(url: &str) -> Result<Self> {
        let response = reqwest::get(url).await?;
        if !response.status().is_success() {
            return Err(Error::Config {
                message: format!(
                    "failed to fetch config from {url}: status {}",
                    response.status()
                ),
                key: None,
            });
        }
        let raw = response.text().await?;
        Self::from_yaml(&raw)
    }

    /// Persist as YAML to the given path
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_yaml::to_string(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// The publish path `"all"` is reserved for the synthetic feed of every
    /// episode and is rejected case-insensitively, with or without a leading
    /// slash.
    pub fn validate(&self) -> Result<()> {
        for (i, program) in self.programs.iter().enumerate() {
            if normalize_feed_path(&program.path) == RESERVED_ALL_PATH {
                return Err(Error::Config {
                    message: format!(
                        "path \"{}\" is reserved (program \"{}\")",
                        RESERVED_ALL_PATH, program.title
                    ),
                    key: Some(format!("programs[{i}].path")),
                });
            }
        }
        Ok(())
    }

    /// Station ids enabled for blanket recording, lowercased for matching
    pub fn enabled_station_ids(&self) -> Vec<String> {
        self.blanket
            .enable_stations
            .iter()
            .map(|id| id.to_lowercase())
            .collect()
    }

    fn normalize(&mut self) {
        if self.blanket.cron.is_empty() {
            self.blanket.cron = default_blanket_cron();
        }
        // Station settings are looked up by lowercase id
        let stations = std::mem::take(&mut self.blanket.stations);
        self.blanket.stations = stations
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
    }
}

/// Normalize a publish path into a feed map key
///
/// Lowercases and trims one leading slash, so `/Ann` and `ann` group into the
/// same feed. The empty string is the default feed.
pub fn normalize_feed_path(path: &str) -> String {
    path.trim_start_matches('/').to_lowercase()
}
