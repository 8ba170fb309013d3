//! Broadcast service interface
//!
//! The streaming service itself is an external collaborator; this module
//! defines the trait seam the recorder talks through plus the schedule data
//! types. Sessions are treated as non-reusable across job boundaries: the
//! recorder asks the [`BroadcastConnector`] for a freshly authenticated
//! client immediately before each use, which avoids stale-auth failures.
//!
//! No deadline is applied to individual service calls; broadcasts can be
//! long-running and retry counts are the only bound. A hung upstream call can
//! block a job indefinitely (known limitation).

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::error::Result;

/// One program in a station's published schedule
#[derive(Clone, Debug, PartialEq)]
pub struct BroadcastProgram {
    /// Program title as published by the service
    pub title: String,
    /// Program description
    pub description: String,
    /// Broadcast start, in the service's local timezone
    pub start: DateTime<FixedOffset>,
    /// Broadcast end, in the service's local timezone
    pub end: DateTime<FixedOffset>,
}

/// A station and its schedule for one day
#[derive(Clone, Debug, PartialEq)]
pub struct Station {
    /// Station identifier
    pub id: String,
    /// Human-readable station name
    pub name: String,
    /// Programs the station aired (or will air) on the queried date
    pub programs: Vec<BroadcastProgram>,
}

/// Resolved timeshift playlist location for one occurrence
#[derive(Clone, Debug, PartialEq)]
pub struct PlaylistUri(pub String);

/// An authenticated session with the broadcast service
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    /// Published schedules for every station on the given date
    async fn stations(&self, date: NaiveDate) -> Result<Vec<Station>>;

    /// The program airing on `station_id` at the given local time
    async fn program_at(
        &self,
        station_id: &str,
        at: DateTime<FixedOffset>,
    ) -> Result<BroadcastProgram>;

    /// Timeshift playlist for the broadcast starting at the given local time
    async fn timeshift_playlist(
        &self,
        station_id: &str,
        at: DateTime<FixedOffset>,
    ) -> Result<PlaylistUri>;

    /// Ordered segment URLs extracted from a playlist document
    async fn segment_urls(&self, playlist: &PlaylistUri) -> Result<Vec<String>>;
}

/// Factory producing a freshly authenticated [`BroadcastClient`]
///
/// `connect` performs authentication; implementations must not hand out a
/// cached session, since the service invalidates sessions between jobs.
#[async_trait]
pub trait BroadcastConnector: Send + Sync {
    /// Authenticate and return a new client session
    async fn connect(&self) -> Result<Box<dyn BroadcastClient>>;
}
