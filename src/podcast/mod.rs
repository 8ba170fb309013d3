//! Podcast feed synthesis
//!
//! Rebuilds every RSS feed from the episode directory on demand. The
//! directory is the source of truth: a resync scans it from scratch, groups
//! episodes into feeds by their sidecar's publish path, renders one RSS
//! document per feed, and atomically swaps the full set of rendered feeds.
//! Readers always see either the previous complete snapshot or the new one.
//!
//! Episodes without a sidecar are still published (into the default feed)
//! when their content sniffs as audio; anything else in the directory is
//! ignored.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use rss::{ChannelBuilder, EnclosureBuilder, GuidBuilder, ImageBuilder, ItemBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use url::Url;

use crate::config::{RESERVED_ALL_PATH, normalize_feed_path};
use crate::error::{Error, FeedError, Result};
use crate::metadata;
use crate::timeutil::service_tz;

/// One publishable episode, resolved from an audio file and its sidecar
#[derive(Clone, Debug)]
struct Episode {
    file_name: String,
    title: String,
    description: String,
    published_at: DateTime<FixedOffset>,
    image_url: String,
    podcast_title: String,
    feed_path: String,
    blanket_mode: bool,
    size: u64,
    mime_type: &'static str,
}

/// Counts reported by a completed resync
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SyncStats {
    /// Episodes published across all feeds
    pub episodes: usize,
    /// Rendered feed documents (including the synthetic all-episodes feed)
    pub feeds: usize,
}

/// Display fields used where episodes supply none
///
/// Mostly relevant for the default feed, whose episodes arrived without a
/// sidecar and carry no podcast title or artwork of their own.
#[derive(Clone, Debug, Default)]
pub struct FeedDefaults {
    /// Fallback channel title
    pub title: String,
    /// Fallback channel description
    pub description: String,
    /// Fallback channel artwork URL
    pub image_url: String,
}

/// Builds and serves RSS documents for the episode directory
///
/// Holds the rendered feeds as an immutable snapshot behind a lock; a resync
/// replaces the whole snapshot in one store, never mutating it in place.
pub struct Podcaster {
    episode_dir: PathBuf,
    base_url: Url,
    defaults: FeedDefaults,
    feeds: RwLock<Arc<HashMap<String, String>>>,
}

impl Podcaster {
    /// Create a synthesizer over an episode directory
    ///
    /// `base_url` is the externally reachable address episodes and feeds are
    /// served under.
    pub fn new(episode_dir: PathBuf, base_url: Url) -> Self {
        Self {
            episode_dir,
            base_url,
            defaults: FeedDefaults::default(),
            feeds: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Set the fallback display fields
    pub fn with_defaults(mut self, defaults: FeedDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Rendered RSS document for a normalized feed path, if the feed exists
    ///
    /// Blanket feeds live under `blanket/<path>`; the synthetic all-episodes
    /// feed under `all`; the default feed under the empty string.
    pub fn feed(&self, path: &str) -> Option<String> {
        let snapshot = read_guard(&self.feeds).clone();
        snapshot.get(&normalize_feed_path(path)).cloned()
    }

    /// Rendered RSS document for the default feed, if it exists
    pub fn default_feed(&self) -> Option<String> {
        self.feed("")
    }

    /// Feed paths present in the current snapshot, sorted
    pub fn feed_paths(&self) -> Vec<String> {
        let snapshot = read_guard(&self.feeds).clone();
        let mut paths: Vec<String> = snapshot.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Rebuild every feed from the episode directory and swap the snapshot
    ///
    /// All-or-nothing: any scan or render failure leaves the previous
    /// snapshot serving unchanged.
    pub fn sync(&self) -> Result<SyncStats> {
        let episodes = self.scan_episodes()?;
        let groups = group_episodes(&episodes);

        let mut feeds: HashMap<String, String> = HashMap::with_capacity(groups.len());
        for (feed_path, group) in &groups {
            let document = self.render_feed(feed_path, group)?;
            feeds.insert(feed_path.clone(), document);
        }

        let stats = SyncStats {
            episodes: episodes.len(),
            feeds: feeds.len(),
        };
        *write_guard(&self.feeds) = Arc::new(feeds);
        tracing::info!(
            episodes = stats.episodes,
            feeds = stats.feeds,
            "feeds rebuilt"
        );
        Ok(stats)
    }

    /// Scan the episode directory into episode records
    ///
    /// Sidecar-less files are sniffed; audio content falls back to
    /// filename-derived fields and the default feed, everything else is
    /// skipped.
    fn scan_episodes(&self) -> Result<Vec<Episode>> {
        let walk_err = |e: &dyn std::fmt::Display| {
            Error::Feed(FeedError::Walk {
                path: self.episode_dir.display().to_string(),
                reason: e.to_string(),
            })
        };

        let mut entries: Vec<(PathBuf, String)> = Vec::new();
        let mut pending = vec![self.episode_dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir).map_err(|e| walk_err(&e))? {
                let entry = entry.map_err(|e| walk_err(&e))?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.episode_dir) else {
                    continue;
                };
                let Some(rel_name) = rel_path_name(rel) else {
                    continue;
                };
                entries.push((path, rel_name));
            }
        }
        // Deterministic scan order regardless of directory iteration order
        entries.sort_by(|a, b| a.1.cmp(&b.1));

        let mut episodes = Vec::new();
        for (path, rel_name) in entries {
            // Sidecars and in-flight staging files are never episodes
            if rel_name.ends_with(".json") || rel_name.ends_with(".part") {
                continue;
            }
            match self.resolve_episode(&path, &rel_name) {
                Ok(Some(episode)) => episodes.push(episode),
                Ok(None) => {
                    tracing::debug!(file = %rel_name, "skipping non-audio file");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(episodes)
    }

    fn resolve_episode(&self, path: &Path, file_name: &str) -> Result<Option<Episode>> {
        let meta = std::fs::metadata(path).map_err(|e| FeedError::Walk {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let size = meta.len();
        let mime_type = mime_for_extension(file_name);

        if let Ok(sidecar) = metadata::read_for_audio(path) {
            return Ok(Some(Episode {
                file_name: file_name.to_string(),
                title: sidecar.title,
                description: sidecar.description,
                published_at: sidecar.published_at,
                image_url: sidecar.image_url,
                podcast_title: sidecar.podcast_title,
                feed_path: sidecar.path,
                blanket_mode: sidecar.blanket_mode,
                size,
                mime_type,
            }));
        }

        // No sidecar: only publish files whose leading bytes look like audio
        let head = read_head(path, 16).map_err(|e| FeedError::Walk {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !looks_like_audio(&head) {
            return Ok(None);
        }

        let base_name = file_name.rsplit('/').next().unwrap_or(file_name);
        let (title, published_at) = fields_from_file_name(base_name)
            .unwrap_or_else(|| (base_name.to_string(), fallback_publish_time(&meta)));
        tracing::debug!(file = %file_name, "no sidecar, publishing to the default feed");
        Ok(Some(Episode {
            file_name: file_name.to_string(),
            title,
            description: String::new(),
            published_at,
            image_url: String::new(),
            podcast_title: String::new(),
            feed_path: String::new(),
            blanket_mode: false,
            size,
            mime_type,
        }))
    }

    /// Render one RSS document for a group of episodes
    fn render_feed(&self, feed_path: &str, episodes: &[Episode]) -> Result<String> {
        let render_err = |reason: String| {
            Error::Feed(FeedError::Render {
                path: feed_path.to_string(),
                reason,
            })
        };

        let mut items = Vec::with_capacity(episodes.len());
        for episode in episodes {
            let enclosure_url = self
                .base_url
                .join(&format!("static/{}", episode.file_name))
                .map_err(|e| render_err(format!("bad enclosure URL: {e}")))?;

            let item = ItemBuilder::default()
                .title(Some(episode.title.clone()))
                .description(Some(episode.description.clone()))
                .pub_date(Some(episode.published_at.to_rfc2822()))
                .guid(Some(
                    GuidBuilder::default()
                        .value(enclosure_url.to_string())
                        .permalink(false)
                        .build(),
                ))
                .enclosure(Some(
                    EnclosureBuilder::default()
                        .url(enclosure_url.to_string())
                        .length(episode.size.to_string())
                        .mime_type(episode.mime_type.to_string())
                        .build(),
                ))
                .build();
            items.push(item);
        }

        let title = channel_title(feed_path, episodes, &self.defaults);
        let description = if self.defaults.description.is_empty() {
            title.clone()
        } else {
            self.defaults.description.clone()
        };
        let mut channel = ChannelBuilder::default()
            .title(title)
            .link(self.base_url.to_string())
            .description(description)
            .items(items)
            .build();

        // Channel timestamps track the newest episode so a rebuild over
        // unchanged content renders byte-identical output
        if let Some(newest) = episodes.first() {
            channel.set_pub_date(Some(newest.published_at.to_rfc2822()));
            channel.set_last_build_date(Some(newest.published_at.to_rfc2822()));
        }
        let image_url = episodes
            .iter()
            .map(|e| e.image_url.as_str())
            .find(|u| !u.is_empty())
            .unwrap_or(&self.defaults.image_url);
        if !image_url.is_empty() {
            channel.set_image(Some(
                ImageBuilder::default()
                    .url(image_url.to_string())
                    .title(channel.title().to_string())
                    .link(self.base_url.to_string())
                    .build(),
            ));
        }

        Ok(channel.to_string())
    }
}

/// Group episodes into feeds keyed by normalized publish path
///
/// Every episode also lands in the synthetic all-episodes feed, which exists
/// even when the directory is empty. Within a group, episodes are newest
/// first with the file name as a stable tie-break.
fn group_episodes(episodes: &[Episode]) -> BTreeMap<String, Vec<Episode>> {
    let mut groups: BTreeMap<String, Vec<Episode>> = BTreeMap::new();
    groups.insert(RESERVED_ALL_PATH.to_string(), Vec::new());

    for episode in episodes {
        let normalized = normalize_feed_path(&episode.feed_path);
        let key = if episode.blanket_mode {
            format!("blanket/{normalized}")
        } else {
            normalized
        };
        groups.entry(key).or_default().push(episode.clone());
        groups
            .entry(RESERVED_ALL_PATH.to_string())
            .or_default()
            .push(episode.clone());
    }

    for group in groups.values_mut() {
        group.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
    }
    groups
}

/// Display title for a feed's channel
///
/// The newest episode with a podcast title wins; otherwise the configured
/// default, the feed path itself, or a fixed name for the synthetic feed.
fn channel_title(feed_path: &str, episodes: &[Episode], defaults: &FeedDefaults) -> String {
    if feed_path == RESERVED_ALL_PATH {
        return "All Episodes".to_string();
    }
    if let Some(title) = episodes
        .iter()
        .map(|e| &e.podcast_title)
        .find(|t| !t.is_empty())
    {
        return title.clone();
    }
    if !defaults.title.is_empty() {
        return defaults.title.clone();
    }
    if feed_path.is_empty() {
        "Episodes".to_string()
    } else {
        feed_path.to_string()
    }
}

/// Recover title and publish time from a `<title>_<YYYYMMDDHHMM>_<mode>.<ext>`
/// file name
fn fields_from_file_name(file_name: &str) -> Option<(String, DateTime<FixedOffset>)> {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(s, _)| s);
    let mut parts = stem.split('_');
    let title = parts.next()?;
    let stamp = parts.next()?;
    if title.is_empty() || stamp.len() < 12 {
        return None;
    }
    let digits = &stamp.as_bytes()[..12];
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(&stamp[..12], "%Y%m%d%H%M").ok()?;
    let published = service_tz().from_local_datetime(&naive).single()?;
    Some((title.to_string(), published))
}

fn fallback_publish_time(meta: &std::fs::Metadata) -> DateTime<FixedOffset> {
    meta.modified()
        .map(|t| DateTime::<chrono::Utc>::from(t).with_timezone(&service_tz()))
        .unwrap_or_else(|_| chrono::Utc::now().with_timezone(&service_tz()))
}

/// Whether a file's leading bytes carry a known audio container signature
///
/// Covers the formats the recorder can produce plus common hand-dropped
/// files: ADTS/raw AAC, MP3 (with or without ID3), MP4 audio, Ogg, FLAC, and
/// WAV.
fn looks_like_audio(head: &[u8]) -> bool {
    if head.len() >= 3 && &head[..3] == b"ID3" {
        return true;
    }
    // ADTS AAC or a bare MPEG audio frame: sync word 0xFFFx / 0xFFEx
    if head.len() >= 2 && head[0] == 0xFF && head[1] & 0xE0 == 0xE0 {
        return true;
    }
    if head.len() >= 8 && &head[4..8] == b"ftyp" {
        return true;
    }
    if head.len() >= 4 && (&head[..4] == b"OggS" || &head[..4] == b"fLaC") {
        return true;
    }
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WAVE" {
        return true;
    }
    false
}

fn mime_for_extension(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp3") => "audio/mpeg",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "audio/aac",
    }
}

/// Relative path rendered with forward slashes, for use in enclosure URLs
fn rel_path_name(rel: &Path) -> Option<String> {
    let parts: Vec<&str> = rel.iter().map(|c| c.to_str()).collect::<Option<_>>()?;
    Some(parts.join("/"))
}

fn read_head(path: &Path, n: usize) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; n];
    let mut read = 0;
    while read < n {
        let got = file.read(&mut buf[read..])?;
        if got == 0 {
            break;
        }
        read += got;
    }
    buf.truncate(read);
    Ok(buf)
}

fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    // A poisoned lock only means a panicked reader; the snapshot is still valid
    lock.read().unwrap_or_else(|p| p.into_inner())
}

fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}
