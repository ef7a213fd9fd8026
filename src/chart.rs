use chrono::NaiveDate;

use crate::bucket::{BucketKey, Granularity, Histogram};

pub const WEEKDAY_LABELS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Counts aligned to chart labels; `labels[i]` describes `values[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub granularity: Granularity,
    pub labels: Vec<String>,
    pub values: Vec<u64>,
}

impl Series {
    pub fn total(&self) -> u64 {
        self.values.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Busiest label; ties go to the earliest one.
    pub fn peak(&self) -> Option<(&str, u64)> {
        let mut best: Option<(&str, u64)> = None;
        for (label, value) in self.iter() {
            if value > best.map_or(0, |(_, count)| count) {
                best = Some((label, value));
            }
        }
        best
    }
}

pub fn series(histogram: &Histogram) -> Series {
    let granularity = histogram.granularity();
    let (labels, values): (Vec<String>, Vec<u64>) = match granularity {
        Granularity::Hour => (0..24u32)
            .map(|hour| (format!("{hour:02}:00"), histogram.count(BucketKey::Hour(hour))))
            .unzip(),
        Granularity::Weekday => WEEKDAY_LABELS
            .iter()
            .zip(0u32..)
            .map(|(label, day)| (label.to_string(), histogram.count(BucketKey::Weekday(day))))
            .unzip(),
        Granularity::Month => MONTH_LABELS
            .iter()
            .zip(1u32..)
            .map(|(label, month)| (label.to_string(), histogram.count(BucketKey::Month(month))))
            .unzip(),
        Granularity::Date => date_range(histogram)
            .map(|date| {
                (
                    date.format("%Y-%m-%d").to_string(),
                    histogram.count(BucketKey::Date(date)),
                )
            })
            .unzip(),
        Granularity::Year => year_range(histogram)
            .map(|year| (format!("{year:04}"), histogram.count(BucketKey::Year(year))))
            .unzip(),
    };

    Series {
        granularity,
        labels,
        values,
    }
}

fn date_range(histogram: &Histogram) -> impl Iterator<Item = NaiveDate> {
    let mut dates = histogram.iter().filter_map(|(key, _)| match key {
        BucketKey::Date(date) => Some(date),
        _ => None,
    });
    let first = dates.next();
    let last = dates.last().or(first);

    first
        .zip(last)
        .into_iter()
        .flat_map(|(start, end)| start.iter_days().take_while(move |date| *date <= end))
}

fn year_range(histogram: &Histogram) -> impl Iterator<Item = i32> {
    let mut years = histogram.iter().filter_map(|(key, _)| match key {
        BucketKey::Year(year) => Some(year),
        _ => None,
    });
    let first = years.next();
    let last = years.last().or(first);

    first.zip(last).into_iter().flat_map(|(start, end)| start..=end)
}
