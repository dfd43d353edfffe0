use crate::models::{BatchResult, Outcome, ScanRecord};
use crate::track::TrackDuration;

/// Format a duration as "M:SS".
pub fn format_duration(duration: &TrackDuration) -> String {
    format!("{}:{:02}", duration.minutes, duration.seconds)
}

fn format_row(record: &ScanRecord) -> String {
    match &record.outcome {
        Outcome::Success(report) => format!(
            "DR{:<8} {:>7.2} dB {:>7.2} dB {:>10}  {}\n",
            report.dr_value,
            report.peak_db,
            report.rms_db,
            format_duration(&report.duration),
            record.file_name,
        ),
        Outcome::Failure => format!(
            "{:<10} {:>10} {:>10} {:>10}  {} (skipped)\n",
            "-", "-", "-", "-", record.file_name,
        ),
    }
}

/// Format a single file result.
pub fn format_single(record: &ScanRecord) -> String {
    match record.report() {
        Some(report) => format!(
            "{} :\nDR      = {}\nPeak dB = {:.2}\nRms dB  = {:.2}\nDuration = {}",
            record.file_name,
            report.dr_value,
            report.peak_db,
            report.rms_db,
            format_duration(&report.duration),
        ),
        None => format!("{} : invalid audio file", record.file_name),
    }
}

/// Format a batch as a DR table.
pub fn format_table(result: &BatchResult) -> String {
    let separator = "\u{2500}".repeat(58);
    let mut output = String::new();

    output.push_str(&format!(
        "{:<10} {:>10} {:>10} {:>10}  {}\n",
        "DR", "Peak", "RMS", "Duration", "File"
    ));
    output.push_str(&separator);
    output.push('\n');

    for record in result.records() {
        output.push_str(&format_row(record));
    }

    output.push_str(&separator);
    output.push('\n');

    let official = if result.successful_count() > 0 {
        format!("DR{}", result.aggregate_dr())
    } else {
        "n/a".to_string()
    };
    output.push_str(&format!(
        "Number of files:   {}\n\
         Failed:            {}\n\
         Official DR value: {}",
        result.records().len(),
        result.failure_count(),
        official,
    ));

    output
}

/// Format a batch as pretty-printed JSON.
pub fn format_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
