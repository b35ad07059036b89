//! Final status table printed when the CLI exits

use tabled::settings::Style;
use tabled::{Table, Tabled};
use trident_dl::Snapshot;

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "PROGRESS")]
    progress: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "ERROR")]
    error: String,
}

impl From<&Snapshot> for Row {
    fn from(s: &Snapshot) -> Self {
        Self {
            id: s.id,
            url: s.url.clone(),
            size: s.size_display(),
            progress: s.progress().map(|p| format!("{p:.0}%")).unwrap_or_default(),
            status: s.status.to_string(),
            error: s.last_error.clone().unwrap_or_default(),
        }
    }
}

/// Render snapshots as a borderless text table
pub fn render_table(snapshots: &[Snapshot]) -> String {
    let mut table = Table::new(snapshots.iter().map(Row::from));
    table.with(Style::blank());

    let mut out = table
        .to_string()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use trident_dl::{Protocol, Status};

    fn snapshot(id: u64, status: Status, error: Option<&str>) -> Snapshot {
        Snapshot {
            id,
            url: format!("ftp://ftp.example.com/pub/file{id}.bin"),
            protocol: Protocol::Ftp,
            local_path: format!("ftp_example_com/file{id}.bin").into(),
            size: Some(2048),
            transferred: 1024,
            status,
            last_error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_table_columns_align() {
        let table = render_table(&[
            snapshot(1, Status::Paused, None),
            snapshot(2, Status::Error, Some("Connection error: refused")),
        ]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        for column in ["ID", "URL", "SIZE", "PROGRESS", "STATUS", "ERROR"] {
            assert!(lines[0].contains(column), "missing {column}: {}", lines[0]);
        }
        assert!(lines[1].contains("2 KB"));
        assert!(lines[1].contains("50%"));
        assert!(lines[2].ends_with("Connection error: refused"));

        let status_col = lines[0].find("STATUS").unwrap();
        assert_eq!(&lines[1][status_col..status_col + 6], "Paused");
        assert_eq!(&lines[2][status_col..status_col + 5], "Error");
    }

    #[test]
    fn test_empty_table_has_header_only() {
        let table = render_table(&[]);
        assert_eq!(table.lines().count(), 1);
        assert!(table.contains("PROGRESS"));
        assert!(table.ends_with('\n'));
    }
}
