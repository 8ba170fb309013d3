//! # radiocast
//!
//! Time-shifted radio recording and podcast publishing.
//!
//! radiocast records programs from a time-shift streaming service on a cron
//! schedule, assembles the downloaded segments into one audio file per
//! episode, and publishes the episode directory as a set of RSS podcast
//! feeds over HTTP.
//!
//! ## Features
//!
//! - Cron-scheduled recording of configured programs, resolved against the
//!   service's published schedule in its own timezone
//! - Blanket mode: record everything the enabled stations aired yesterday
//! - Parallel segment downloads with retries, batched lossless
//!   concatenation, and optional MP3 transcoding
//! - One RSS feed per publish path, per blanket station, and a synthetic
//!   feed of every episode, rebuilt atomically from the directory contents
//! - HTTP API serving feeds, episode files, a resync trigger, and live
//!   configuration replacement
//! - Episode directory watching, so externally added or removed files show
//!   up in the feeds without a manual resync
//!
//! ## Example
//!
//! ```no_run
//! use radiocast::config::Config;
//! use radiocast::podcast::Podcaster;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! fn main() -> radiocast::Result<()> {
//!     let config = Config::load(Path::new("config.yaml"))?;
//!     config.validate()?;
//!
//!     let base_url = url::Url::parse("http://localhost:8080/")
//!         .map_err(|e| radiocast::Error::Other(e.to_string()))?;
//!     let podcaster = Arc::new(Podcaster::new("output".into(), base_url));
//!     let stats = podcaster.sync()?;
//!     println!("published {} episodes in {} feeds", stats.episodes, stats.feeds);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod api;
pub mod assembler;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod metadata;
pub mod podcast;
pub mod recorder;
pub mod retry;
pub mod scheduler;
pub mod timeutil;
pub mod watcher;

pub use config::Config;
pub use error::{Error, Result};
pub use podcast::Podcaster;
pub use recorder::Recorder;
pub use watcher::OutputWatcher;
