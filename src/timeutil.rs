//! Service-timezone helpers and weekday handling
//!
//! The broadcast service publishes all schedules in its own fixed timezone
//! (UTC+9). Occurrence resolution always happens in that zone regardless of
//! where the process runs.

use chrono::{DateTime, Datelike, Duration, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Offset of the broadcast service's local timezone, in hours east of UTC.
const SERVICE_UTC_OFFSET_HOURS: i32 = 9;

/// The broadcast service's fixed local timezone (UTC+9)
pub fn service_tz() -> FixedOffset {
    // Offset is within chrono's valid range, so this cannot fail
    #[allow(clippy::unwrap_used)]
    FixedOffset::east_opt(SERVICE_UTC_OFFSET_HOURS * 3600).unwrap()
}

/// Day of week for weekly program recurrence
///
/// Wraps [`chrono::Weekday`] to add lenient parsing ("mon" or "monday",
/// any case) and serde round-tripping as the lowercase long name, which is
/// how weekdays appear in the YAML config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Weekday(pub chrono::Weekday);

impl Weekday {
    /// Lowercase long name ("monday"), used for serialization and logging
    pub fn name(&self) -> &'static str {
        match self.0 {
            chrono::Weekday::Mon => "monday",
            chrono::Weekday::Tue => "tuesday",
            chrono::Weekday::Wed => "wednesday",
            chrono::Weekday::Thu => "thursday",
            chrono::Weekday::Fri => "friday",
            chrono::Weekday::Sat => "saturday",
            chrono::Weekday::Sun => "sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Weekday {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let day = match s.trim().to_lowercase().as_str() {
            "monday" | "mon" => chrono::Weekday::Mon,
            "tuesday" | "tue" => chrono::Weekday::Tue,
            "wednesday" | "wed" => chrono::Weekday::Wed,
            "thursday" | "thu" => chrono::Weekday::Thu,
            "friday" | "fri" => chrono::Weekday::Fri,
            "saturday" | "sat" => chrono::Weekday::Sat,
            "sunday" | "sun" => chrono::Weekday::Sun,
            other => return Err(format!("invalid weekday: {other}")),
        };
        Ok(Weekday(day))
    }
}

impl Serialize for Weekday {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Weekday {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Most recent timestamp at or before `now` falling on `weekday`
///
/// Walks back at most six days, so the result is always within one week of
/// `now` and carries `now`'s time of day. The caller combines the returned
/// date with the program's configured start time.
pub fn last_weekday_on_or_before(
    weekday: Weekday,
    now: DateTime<FixedOffset>,
) -> DateTime<FixedOffset> {
    let days_back = (7 + now.weekday().num_days_from_monday() as i64
        - weekday.0.num_days_from_monday() as i64)
        % 7;
    now - Duration::days(days_back)
}
