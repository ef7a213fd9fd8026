use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::bucket::{bucket_by_kind, bucket_events, CalendarZone, Granularity, Histogram};
use crate::chart::{self, Series};
use crate::models::{EventKind, LogSet};
use crate::rating::{self, RatingSummary};

const REPORT_SECTIONS: [(Granularity, &str); 5] = [
    (Granularity::Hour, "By Hour"),
    (Granularity::Weekday, "By Weekday"),
    (Granularity::Month, "By Month"),
    (Granularity::Year, "By Year"),
    (Granularity::Date, "Daily Trend"),
];

const MAX_LISTED_REJECTIONS: usize = 10;

pub fn kind_series(
    logs: &LogSet,
    kind: EventKind,
    granularity: Granularity,
    zone: CalendarZone,
) -> Series {
    chart::series(&bucket_events(logs.of_kind(kind), granularity, zone))
}

pub fn rating_summary(logs: &LogSet) -> RatingSummary {
    rating::summarize_ratings(logs.of_kind(EventKind::Review))
}

pub fn build_report(
    subject: &str,
    zone: CalendarZone,
    cutoff: Option<DateTime<Utc>>,
    logs: &LogSet,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Market Statistics Report");
    let window = match cutoff {
        Some(cutoff) => format!("events since {}", cutoff.format("%Y-%m-%d %H:%M UTC")),
        None => "all recorded events".to_string(),
    };
    let _ = writeln!(output, "Generated for {subject} ({window}, bucketed in {zone})");
    let _ = writeln!(output);

    let _ = writeln!(output, "## Totals");
    let _ = writeln!(output, "| Kind | Events | Rejected |");
    let _ = writeln!(output, "| --- | ---: | ---: |");
    for kind in EventKind::ALL {
        if logs.is_available(kind) {
            let _ = writeln!(
                output,
                "| {} | {} | {} |",
                kind.plural(),
                logs.count(kind),
                logs.rejected(kind)
            );
        } else {
            let _ = writeln!(output, "| {} | unavailable | - |", kind.plural());
        }
    }

    let sections: Vec<(&str, BTreeMap<EventKind, Histogram>)> = REPORT_SECTIONS
        .iter()
        .map(|(granularity, title)| (*title, bucket_by_kind(logs, *granularity, zone)))
        .collect();

    for kind in EventKind::ALL {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", title_case(kind.plural()));

        if let Some(reason) = logs.unavailable.get(&kind) {
            let _ = writeln!(output, "Unavailable: {reason}");
            continue;
        }
        if logs.count(kind) == 0 {
            let _ = writeln!(output, "No {} recorded for this window.", kind.plural());
            continue;
        }

        if kind == EventKind::Review {
            write_ratings(&mut output, &rating_summary(logs));
        }

        for (title, by_kind) in &sections {
            if let Some(histogram) = by_kind.get(&kind) {
                write_series(&mut output, title, &chart::series(histogram));
            }
        }
    }

    if !logs.rejections.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Rejected Records");
        for rejection in logs.rejections.iter().take(MAX_LISTED_REJECTIONS) {
            let _ = writeln!(
                output,
                "- {} #{}: {}",
                rejection.kind, rejection.index, rejection.reason
            );
        }
        if logs.rejections.len() > MAX_LISTED_REJECTIONS {
            let _ = writeln!(
                output,
                "- ... and {} more",
                logs.rejections.len() - MAX_LISTED_REJECTIONS
            );
        }
    }

    output
}

fn write_ratings(output: &mut String, summary: &RatingSummary) {
    let _ = writeln!(output);
    let _ = writeln!(output, "### Ratings");
    let _ = writeln!(
        output,
        "Average {:.2} across {} reviews",
        summary.average, summary.count
    );
    for (star, count) in summary.distribution.iter().rev() {
        let _ = writeln!(output, "- {star} stars: {count}");
    }
}

fn write_series(output: &mut String, title: &str, series: &Series) {
    let _ = writeln!(output);
    let _ = writeln!(output, "### {title}");
    if let Some((label, count)) = series.peak() {
        let _ = writeln!(output, "Peak: {label} ({count})");
    }
    let _ = writeln!(output, "| {} | Count |", title_case(series.granularity.as_str()));
    let _ = writeln!(output, "| --- | ---: |");
    for (label, count) in series.iter() {
        let _ = writeln!(output, "| {label} | {count} |");
    }
}

pub fn write_series_csv<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    series: &Series,
) -> csv::Result<()> {
    writer.write_record(["label", "count"])?;
    for (label, count) in series.iter() {
        writer.write_record([label, count.to_string().as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawEventLog;
    use chrono::TimeZone;

    fn raw(ts: &str, rating: Option<f64>) -> RawEventLog {
        RawEventLog {
            timestamp: Some(ts.to_string()),
            rating,
            ..Default::default()
        }
    }

    fn sample_logs() -> LogSet {
        let mut logs = LogSet::default();
        logs.absorb(
            EventKind::Visit,
            vec![
                raw("2024-01-01T08:00:00Z", None),
                raw("2024-01-01T08:30:00Z", None),
                raw("2024-06-15T23:00:00Z", None),
            ],
        );
        logs.absorb(
            EventKind::Review,
            vec![
                raw("2024-01-02T10:00:00Z", Some(5.0)),
                raw("2024-01-03T10:00:00Z", Some(4.0)),
                raw("2024-01-04T10:00:00Z", Some(3.0)),
                raw("Invalid Date", Some(5.0)),
            ],
        );
        logs.mark_unavailable(
            EventKind::Click,
            "http://backend/vendors/1/clicks returned HTTP 502",
        );
        logs
    }

    #[test]
    fn report_covers_totals_series_and_ratings() {
        let report = build_report("vendor 1", CalendarZone::Utc, None, &sample_logs());

        assert!(report.contains("Generated for vendor 1 (all recorded events, bucketed in UTC)"));
        assert!(report.contains("| visits | 3 | 0 |"));
        assert!(report.contains("| reviews | 3 | 1 |"));
        assert!(report.contains("| clicks | unavailable | - |"));
        assert!(report.contains("| mentions | 0 | 0 |"));
        assert!(report.contains("Peak: 08:00 (2)"));
        assert!(report.contains("| 23:00 | 1 |"));
        assert!(report.contains("Average 4.00 across 3 reviews"));
        assert!(report.contains("- 5 stars: 1"));
        assert!(report.contains("- 1 stars: 0"));
        assert!(report.contains("Unavailable: http://backend/vendors/1/clicks returned HTTP 502"));
        assert!(report.contains("No mentions recorded for this window."));
        assert!(report.contains("- review #3: malformed timestamp \"Invalid Date\""));
    }

    #[test]
    fn report_names_the_window() {
        let cutoff = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let report = build_report("market 7", CalendarZone::Utc, Some(cutoff), &LogSet::default());
        assert!(report.contains("events since 2024-06-01 00:00 UTC"));
        assert!(!report.contains("## Rejected Records"));
    }

    #[test]
    fn exports_series_as_label_count_rows() {
        let series = kind_series(
            &sample_logs(),
            EventKind::Visit,
            Granularity::Weekday,
            CalendarZone::Utc,
        );
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_series_csv(&mut writer, &series).unwrap();
        let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "label,count");
        assert_eq!(lines[1], "Sun,0");
        assert_eq!(lines[2], "Mon,2");
        assert_eq!(lines[7], "Sat,1");
    }

    #[test]
    fn exported_csv_survives_a_file_round_trip() {
        let path = std::env::temp_dir().join(format!("tamu-series-{}.csv", uuid::Uuid::new_v4()));
        let series = kind_series(
            &sample_logs(),
            EventKind::Visit,
            Granularity::Hour,
            CalendarZone::Utc,
        );
        {
            let mut writer = csv::Writer::from_path(&path).unwrap();
            write_series_csv(&mut writer, &series).unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<(String, u64)> = reader.deserialize().map(|row| row.unwrap()).collect();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(rows.len(), 24);
        assert_eq!(rows[8], ("08:00".to_string(), 2));
        assert_eq!(rows.iter().map(|(_, count)| count).sum::<u64>(), 3);
    }

    #[test]
    fn title_case_capitalizes_first_letter() {
        assert_eq!(title_case("visits"), "Visits");
        assert_eq!(title_case(""), "");
    }
}
