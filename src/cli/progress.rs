//! CLI-specific progress handling for trident-dl
//!
//! One progress bar per download, stacked in a `MultiProgress`.

use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use trident_dl::{Download, Snapshot, Status};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {bytes_per_sec} {msg}";

/// Creates a progress bar for CLI display; the length is set once known
pub fn create_progress_bar(prefix: String) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_prefix(prefix);
    pb
}

/// Progress bars keyed by download id
pub struct ProgressBoard {
    multi: MultiProgress,
    bars: HashMap<u64, ProgressBar>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    pub fn add(&mut self, download: &Download) {
        let prefix = format!("#{} {}", download.id(), download.source().filename);
        let pb = self.multi.add(create_progress_bar(prefix));
        self.bars.insert(download.id(), pb);
    }

    pub fn update(&self, snapshot: &Snapshot) {
        let Some(pb) = self.bars.get(&snapshot.id) else {
            return;
        };
        if let Some(size) = snapshot.size {
            if pb.length() != Some(size) {
                pb.set_length(size);
            }
        }
        pb.set_position(snapshot.transferred);

        match snapshot.status {
            Status::Downloading => pb.set_message(""),
            Status::Complete => pb.finish_with_message("✅ done"),
            Status::Paused => pb.abandon_with_message("⏸️  paused"),
            Status::Cancelled => pb.abandon_with_message("🚫 cancelled"),
            Status::Error => pb.abandon_with_message(format!(
                "❌ {}",
                snapshot.last_error.as_deref().unwrap_or("failed")
            )),
        }
    }

    /// Stop drawing; bars keep their last state on screen
    pub fn finish(&self) {
        for pb in self.bars.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar_template() {
        let pb = create_progress_bar("#1 file.bin".to_string());
        assert_eq!(pb.length(), Some(0));
        assert_eq!(pb.prefix(), "#1 file.bin");

        // The template must be valid for the bar to render
        pb.set_length(1000);
        pb.set_position(100);
        pb.finish();
    }

    #[test]
    fn test_update_ignores_unknown_download() {
        let board = ProgressBoard::new();
        let snapshot = Snapshot {
            id: 99,
            url: "http://example.com/a.bin".to_string(),
            protocol: trident_dl::Protocol::Http,
            local_path: "a.bin".into(),
            size: Some(10),
            transferred: 5,
            status: Status::Downloading,
            last_error: None,
        };
        board.update(&snapshot);
        board.finish();
    }
}
