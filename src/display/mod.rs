use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use ferry::protocol::FileEntry;
use ferry::transfer::Progress;

/// Terminal progress bar fed by polling a transfer's byte counter.
pub struct TransferBar {
    bar: ProgressBar,
    poller: JoinHandle<()>,
}

impl TransferBar {
    pub fn attach(label: &str, progress: Arc<Progress>, enabled: bool) -> Self {
        let bar = if enabled {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        bar.set_message(label.to_string());

        let shown = bar.clone();
        let poller = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(100));
            loop {
                tick.tick().await;
                if let Some(total) = progress.expected() {
                    shown.set_length(total);
                }
                shown.set_position(progress.transferred());
            }
        });

        Self { bar, poller }
    }

    pub fn finish(self) {
        self.poller.abort();
        self.bar.finish_and_clear();
    }
}

/// Human-readable size: bytes below 1 KB, two decimals above.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn print_listing(entries: &[FileEntry]) {
    if entries.is_empty() {
        println!("No files available.");
        return;
    }
    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!("Total: {} files ({})", entries.len(), format_size(total));
    println!("{}", "─".repeat(60));
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>3}. {:<28} {:>10}  {}",
            i + 1,
            entry.name,
            format_size(entry.size),
            format_modified(entry)
        );
    }
}

pub fn print_info(entry: &FileEntry) {
    println!("File:     {}", entry.name);
    println!("Size:     {} ({} bytes)", format_size(entry.size), entry.size);
    println!("Modified: {}", format_modified(entry));
}

/// Last second RFC 3339 can express (9999-12-31T23:59:59Z).
const LAST_RFC3339_SECOND: u64 = 253_402_300_799;

/// RFC 3339 timestamp, or raw epoch seconds when the server sent something out of range.
pub fn format_modified(entry: &FileEntry) -> String {
    match entry.modified_at() {
        Some(at) if entry.modified <= LAST_RFC3339_SECOND => {
            humantime::format_rfc3339_seconds(at).to_string()
        }
        _ => format!("{} s since epoch", entry.modified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.50 MB");
    }

    #[test]
    fn test_format_modified_survives_hostile_timestamps() {
        let mut entry = FileEntry {
            name: "a.bin".to_string(),
            size: 1,
            modified: 0,
        };
        assert_eq!(format_modified(&entry), "1970-01-01T00:00:00Z");

        entry.modified = LAST_RFC3339_SECOND;
        assert_eq!(format_modified(&entry), "9999-12-31T23:59:59Z");

        for modified in [LAST_RFC3339_SECOND + 1, u64::MAX] {
            entry.modified = modified;
            assert_eq!(format_modified(&entry), format!("{} s since epoch", modified));
        }
    }
}
