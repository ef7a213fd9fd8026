use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Visit,
    Review,
    Click,
    Mention,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Visit,
        EventKind::Review,
        EventKind::Click,
        EventKind::Mention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Visit => "visit",
            EventKind::Review => "review",
            EventKind::Click => "click",
            EventKind::Mention => "mention",
        }
    }

    /// Path segment and heading used for a collection of this kind.
    pub fn plural(self) -> &'static str {
        match self {
            EventKind::Visit => "visits",
            EventKind::Review => "reviews",
            EventKind::Click => "clicks",
            EventKind::Mention => "mentions",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OwnerKind {
    Vendor,
    Market,
}

impl OwnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OwnerKind::Vendor => "vendor",
            OwnerKind::Market => "market",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            OwnerKind::Vendor => "vendors",
            OwnerKind::Market => "markets",
        }
    }
}

/// The vendor or market whose event logs are being reported on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: OwnerKind,
    pub id: String,
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.id)
    }
}

/// Event log entry as the backend serves it. Unknown fields are ignored.
/// The event time is `timestamp`, falling back to `created_at` then `createdAt`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawEventLog {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at_camel: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

impl RawEventLog {
    pub fn event_time(self) -> Option<String> {
        self.timestamp.or(self.created_at).or(self.created_at_camel)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    MissingTimestamp,
    MalformedTimestamp(String),
    MissingRating,
    RatingOutOfRange(f64),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingTimestamp => f.write_str("missing timestamp"),
            RejectReason::MalformedTimestamp(raw) => write!(f, "malformed timestamp {raw:?}"),
            RejectReason::MissingRating => f.write_str("review without rating"),
            RejectReason::RatingOutOfRange(rating) => write!(f, "rating {rating} outside 1-5"),
        }
    }
}

/// A raw log that never reached a bucket. `index` is its position in the
/// list of logs of the same kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: EventKind,
    pub index: usize,
    pub reason: RejectReason,
}

/// Accepts RFC 3339, offset-less date-times and bare dates. Anything without
/// an offset is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn validate_logs(kind: EventKind, raw: Vec<RawEventLog>) -> (Vec<EventRecord>, Vec<Rejection>) {
    let mut records = Vec::with_capacity(raw.len());
    let mut rejections = Vec::new();

    for (index, log) in raw.into_iter().enumerate() {
        match validate_one(kind, log) {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!(kind = %kind, index, reason = %reason, "rejecting event log");
                rejections.push(Rejection {
                    kind,
                    index,
                    reason,
                });
            }
        }
    }

    (records, rejections)
}

fn validate_one(kind: EventKind, log: RawEventLog) -> Result<EventRecord, RejectReason> {
    let rating = log.rating;
    let raw_ts = log.event_time().ok_or(RejectReason::MissingTimestamp)?;
    let timestamp =
        parse_timestamp(&raw_ts).ok_or_else(move || RejectReason::MalformedTimestamp(raw_ts))?;

    let rating = match kind {
        EventKind::Review => {
            let rating = rating.ok_or(RejectReason::MissingRating)?;
            if !rating.is_finite() || !(1.0..=5.0).contains(&rating) {
                return Err(RejectReason::RatingOutOfRange(rating));
            }
            Some(rating)
        }
        _ => None,
    };

    Ok(EventRecord {
        kind,
        timestamp,
        rating,
    })
}

/// Validated logs of every kind for one owner. Kinds whose fetch failed are
/// kept in `unavailable` so they are never mistaken for zero activity.
#[derive(Debug, Clone, Default)]
pub struct LogSet {
    pub records: Vec<EventRecord>,
    pub rejections: Vec<Rejection>,
    pub unavailable: BTreeMap<EventKind, String>,
}

impl LogSet {
    pub fn absorb(&mut self, kind: EventKind, raw: Vec<RawEventLog>) {
        let (records, rejections) = validate_logs(kind, raw);
        self.records.extend(records);
        self.rejections.extend(rejections);
    }

    pub fn mark_unavailable(&mut self, kind: EventKind, reason: impl Into<String>) {
        self.unavailable.insert(kind, reason.into());
    }

    pub fn is_available(&self, kind: EventKind) -> bool {
        !self.unavailable.contains_key(&kind)
    }

    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &EventRecord> + '_ {
        self.records.iter().filter(move |record| record.kind == kind)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn rejected(&self, kind: EventKind) -> usize {
        self.rejections
            .iter()
            .filter(|rejection| rejection.kind == kind)
            .count()
    }

    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) {
        self.records.retain(|record| record.timestamp >= cutoff);
    }
}
