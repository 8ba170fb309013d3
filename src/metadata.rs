//! Episode sidecar metadata
//!
//! Every finished episode is an audio file plus a JSON sidecar with the same
//! base name and a `.json` suffix. The sidecar is the single source of truth
//! for feed placement and display fields; when it is absent the feed builder
//! falls back to filename-derived values and the default feed. Sidecars are
//! written once by the recording job and never mutated afterwards.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Authoritative display and grouping fields for one episode
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    /// Episode title (the broadcast program's title)
    pub title: String,
    /// Episode description
    #[serde(default)]
    pub description: String,
    /// Broadcast start used as the publish timestamp
    pub published_at: DateTime<FixedOffset>,
    /// Artwork URL
    #[serde(default)]
    pub image_url: String,
    /// Publish path grouping this episode into a feed (normalized at read time)
    #[serde(default)]
    pub path: String,
    /// Display title of the podcast the episode belongs to
    #[serde(default)]
    pub podcast_title: String,
    /// Whether the episode was produced by blanket recording
    #[serde(default)]
    pub blanket_mode: bool,
}

/// Sidecar path for an audio file: `<audio>.json`
pub fn sidecar_path(audio_path: &Path) -> PathBuf {
    let mut os = audio_path.as_os_str().to_owned();
    os.push(".json");
    PathBuf::from(os)
}

/// Write the sidecar next to a finished audio file
///
/// This is the recording job's durability boundary: a crash before this write
/// leaves no trace at the destination, a crash after leaves a complete
/// episode.
pub fn write_for_audio(audio_path: &Path, metadata: &EpisodeMetadata) -> Result<()> {
    let raw = serde_json::to_vec_pretty(metadata)?;
    std::fs::write(sidecar_path(audio_path), raw)?;
    Ok(())
}

/// Read the sidecar for an audio file, if any
pub fn read_for_audio(audio_path: &Path) -> Result<EpisodeMetadata> {
    let raw = std::fs::read(sidecar_path(audio_path))?;
    let metadata = serde_json::from_slice(&raw)?;
    Ok(metadata)
}
