//! Terminal output: sizes, tables, the copy progress bar and prompts.

use ds_common::{DirStats, ProgressEvent, ProgressSink, Snapshot};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use tabled::{settings::Style, Table, Tabled};

const UNITS: &[&str] = &["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "Zi"];

/// Binary units with one decimal place, e.g. `1.5KiB`.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in UNITS {
        if value.abs() < 1024.0 {
            return format!("{value:.1}{unit}B");
        }
        value /= 1024.0;
    }
    format!("{value:.1}YiB")
}

pub fn pluralize(word: &str, n: usize) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "File count")]
    file_count: u64,
}

/// Stored snapshots, oldest first, followed by a `present` row describing
/// the live directory.
pub fn snapshot_table(snapshots: &[Snapshot], present: DirStats) -> String {
    let mut rows: Vec<SnapshotRow> = snapshots
        .iter()
        .map(|s| SnapshotRow {
            created: s.created_local().format("%Y-%m-%d %H:%M:%S").to_string(),
            name: s.name.clone(),
            size: format_size(s.size_bytes),
            uuid: s.id.to_string(),
            file_count: s.file_count,
        })
        .collect();

    rows.push(SnapshotRow {
        created: "present".to_string(),
        name: String::new(),
        size: format_size(present.size_bytes),
        uuid: String::new(),
        file_count: present.file_count,
    });

    let mut table = Table::new(rows);
    table.with(Style::modern());
    table.to_string()
}

/// Renders copy progress as a percentage bar.
pub struct CopyProgress {
    bar: ProgressBar,
}

impl CopyProgress {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos:>3}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        bar.set_message(message.into());
        Self { bar }
    }
}

impl ProgressSink for CopyProgress {
    fn report(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Advanced { percent, .. } => self.bar.set_position(percent.into()),
            ProgressEvent::Completed => {
                self.bar.set_position(100);
                self.bar.finish();
            }
        }
    }
}

impl Drop for CopyProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}

/// Asks a yes/no question on stdin. Anything but `y`/`yes` declines.
pub fn confirm(question: &str) -> io::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let answer = input.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}
