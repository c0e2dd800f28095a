use crate::pipeline::{ArchiveReport, CrawlReport};
use chrono::DateTime;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

pub fn format_timestamp(ts_ms: i64) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

fn base_table(detail_header: &str) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Pair").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new(detail_header)
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Right),
        ]);
    table
}

fn status_cell(ok: bool) -> Cell {
    if ok {
        Cell::new("ok").fg(Color::Green)
    } else {
        Cell::new("failed").fg(Color::Red)
    }
}

pub fn crawl_table(report: &CrawlReport) -> Table {
    let mut table = base_table("Rows / Error");
    for outcome in &report.outcomes {
        let detail = match &outcome.result {
            Ok(saved) => format!("{} -> {}", saved.rows, saved.path.display()),
            Err(e) => e.to_string(),
        };
        table.add_row(vec![
            Cell::new(&outcome.key).fg(Color::Cyan),
            status_cell(outcome.is_ok()),
            Cell::new(detail).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn archive_table(report: &ArchiveReport) -> Table {
    let mut table = base_table("Downloaded / Failed");
    for outcome in &report.pairs {
        let (ok, detail) = match &outcome.result {
            Ok(pair) => (
                pair.failed() == 0,
                format!("{} / {}", pair.downloaded(), pair.failed()),
            ),
            Err(e) => (false, e.to_string()),
        };
        table.add_row(vec![
            Cell::new(&outcome.key).fg(Color::Cyan),
            status_cell(ok),
            Cell::new(detail).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}

pub fn print_crawl(report: &CrawlReport, end_time: i64) {
    let title = format!(
        "(Klines up to {} UTC: {} saved, {} failed)",
        format_timestamp(end_time),
        report.succeeded(),
        report.failed()
    );
    println!("\n{}\n{}", title, crawl_table(report));
}

pub fn print_archive(report: &ArchiveReport) {
    let title = format!(
        "(Archive files: {} downloaded, {} failed, {} pairs aborted)",
        report.files_downloaded(),
        report.files_failed(),
        report.pairs_failed()
    );
    println!("\n{}\n{}", title, archive_table(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::TaskOutcome;
    use crate::error::FetchError;
    use crate::pipeline::SavedSeries;
    use std::path::PathBuf;

    #[test]
    fn formats_millisecond_timestamps() {
        assert_eq!(format_timestamp(1_609_459_200_000), "01-01-2021 00:00:00");
        assert_eq!(format_timestamp(i64::MAX), "Unknown Time");
    }

    #[test]
    fn crawl_table_lists_every_pair() {
        let report = CrawlReport {
            outcomes: vec![
                TaskOutcome {
                    key: "BTCUSDT/1d".to_string(),
                    result: Ok(SavedSeries {
                        path: PathBuf::from("csv/BTCUSDT_1d.csv"),
                        rows: 42,
                    }),
                },
                TaskOutcome {
                    key: "NOPE/1d".to_string(),
                    result: Err(FetchError::Config("boom".to_string())),
                },
            ],
        };

        let rendered = crawl_table(&report).to_string();
        assert!(rendered.contains("BTCUSDT/1d"));
        assert!(rendered.contains("42"));
        assert!(rendered.contains("NOPE/1d"));
        assert!(rendered.contains("failed"));
    }
}
