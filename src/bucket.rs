use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc,
};
use clap::ValueEnum;
use thiserror::Error;

use crate::models::{EventKind, EventRecord, LogSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Granularity {
    Hour,
    Weekday,
    Date,
    Month,
    Year,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Hour => "hour",
            Granularity::Weekday => "weekday",
            Granularity::Date => "date",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calendar used to turn an instant into hour/day/month keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalendarZone {
    Utc,
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl CalendarZone {
    pub fn civil(&self, ts: DateTime<Utc>) -> NaiveDateTime {
        match self {
            CalendarZone::Utc => ts.naive_utc(),
            CalendarZone::Local => ts.with_timezone(&Local).naive_local(),
            CalendarZone::Fixed(offset) => ts.with_timezone(offset).naive_local(),
        }
    }
}

impl fmt::Display for CalendarZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarZone::Utc => f.write_str("UTC"),
            CalendarZone::Local => f.write_str("local time"),
            CalendarZone::Fixed(offset) => write!(f, "UTC{offset}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid time zone {0:?}: expected local, utc or an offset like +08:00")]
pub struct ParseZoneError(String);

impl FromStr for CalendarZone {
    type Err = ParseZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "utc" | "z" => return Ok(CalendarZone::Utc),
            "local" => return Ok(CalendarZone::Local),
            _ => {}
        }

        let invalid = || ParseZoneError(s.to_string());
        let (sign, rest) = match value.as_bytes().first() {
            Some(b'+') => (1, &value[1..]),
            Some(b'-') => (-1, &value[1..]),
            _ => return Err(invalid()),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
        let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(CalendarZone::Fixed)
            .ok_or_else(invalid)
    }
}

/// Histogram key. Weekdays count from Sunday = 0, months from January = 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BucketKey {
    Hour(u32),
    Weekday(u32),
    Date(NaiveDate),
    Month(u32),
    Year(i32),
}

impl BucketKey {
    pub fn from_timestamp(ts: DateTime<Utc>, granularity: Granularity, zone: CalendarZone) -> Self {
        let civil = zone.civil(ts);
        match granularity {
            Granularity::Hour => BucketKey::Hour(civil.hour()),
            Granularity::Weekday => BucketKey::Weekday(civil.weekday().num_days_from_sunday()),
            Granularity::Date => BucketKey::Date(civil.date()),
            Granularity::Month => BucketKey::Month(civil.month()),
            Granularity::Year => BucketKey::Year(civil.year()),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Hour(value) | BucketKey::Weekday(value) | BucketKey::Month(value) => {
                write!(f, "{value}")
            }
            BucketKey::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            BucketKey::Year(year) => write!(f, "{year:04}"),
        }
    }
}

/// Event counts per bucket. Keys that never occurred are implicitly zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    granularity: Granularity,
    counts: BTreeMap<BucketKey, u64>,
}

impl Histogram {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            counts: BTreeMap::new(),
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn count(&self, key: BucketKey) -> u64 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BucketKey, u64)> + '_ {
        self.counts.iter().map(|(key, count)| (*key, *count))
    }

    fn increment(&mut self, key: BucketKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }
}

pub fn bucket_events<'a, I>(records: I, granularity: Granularity, zone: CalendarZone) -> Histogram
where
    I: IntoIterator<Item = &'a EventRecord>,
{
    let mut histogram = Histogram::new(granularity);
    for record in records {
        histogram.increment(BucketKey::from_timestamp(record.timestamp, granularity, zone));
    }
    histogram
}

pub fn bucket_by_kind(
    logs: &LogSet,
    granularity: Granularity,
    zone: CalendarZone,
) -> BTreeMap<EventKind, Histogram> {
    EventKind::ALL
        .into_iter()
        .map(|kind| (kind, bucket_events(logs.of_kind(kind), granularity, zone)))
        .collect()
}

pub fn cutoff_time(since_days: i64) -> Option<DateTime<Utc>> {
    cutoff_from(Utc::now(), since_days)
}

/// Start of a window of `since_days` (at least 1) ending at `now`. `None` when
/// the window reaches past the earliest representable instant.
pub fn cutoff_from(now: DateTime<Utc>, since_days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(since_days.max(1)).and_then(|window| now.checked_sub_signed(window))
}
