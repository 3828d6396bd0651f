use std::io::Write;

use csv::WriterBuilder;

use crate::store::ContentAnalyticsRow;

pub const CSV_HEADER: [&str; 8] = [
    "Title",
    "Category",
    "Total Plays",
    "Unique Viewers",
    "Average Rating",
    "Total Watch Time (min)",
    "Completion Rate",
    "Release Date",
];

/// Writes one row per content with a header row. Returns the number of data
/// rows written.
pub fn write_csv<W: Write>(rows: &[ContentAnalyticsRow], writer: W) -> csv::Result<usize> {
    let mut wtr = WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    wtr.write_record(CSV_HEADER)?;
    for row in rows {
        wtr.write_record([
            harden(&row.title),
            row.category.to_string(),
            row.total_plays.to_string(),
            row.unique_viewers.to_string(),
            format!("{:.2}", row.average_rating),
            row.total_watch_minutes.to_string(),
            format!("{:.2}", row.completion_rate),
            row.release_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Spreadsheet formula injection guard for free-text cells.
fn harden(value: &str) -> String {
    match value.chars().next() {
        Some('=' | '+' | '-' | '@') => format!("'{value}"),
        _ => value.to_string(),
    }
}
