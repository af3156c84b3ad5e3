use std::time::Duration;

use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::StatusArgs;
use crate::core::{Dispatcher, StatusRow, VmStatus};
use crate::error::Result;

use super::display::{colorize, status_color};

pub fn handle_status(dispatcher: &Dispatcher<'_>, args: &StatusArgs, color: bool) -> Result<()> {
    let rows = dispatcher.status();
    if args.json {
        println!("{:#}", render_json(&rows));
    } else {
        print!("{}", render_table(&rows, color));
    }
    Ok(())
}

pub fn render_table(rows: &[StatusRow], color: bool) -> String {
    let mut out = String::from("VM Status:\n");
    for row in rows {
        let label = format!("{} {}: {}", row.status.icon(), row.name, row.status);
        out.push_str("  ");
        out.push_str(&colorize(&label, status_color(row.status), color));
        if row.status == VmStatus::Running {
            out.push_str(&format!(" ({})", running_detail(row)));
        }
        out.push('\n');
    }
    out
}

fn running_detail(row: &StatusRow) -> String {
    let mut parts = vec![format!("port {}", row.port)];
    if let Some(mode) = row.mode {
        parts.push(mode.to_string());
    }
    if let Some(uptime) = row.uptime() {
        parts.push(format!("up {}", format_uptime(uptime)));
    }
    parts.join(", ")
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

pub fn render_json(rows: &[StatusRow]) -> Value {
    Value::Array(
        rows.iter()
            .map(|row| {
                json!({
                    "name": row.name,
                    "status": row.status.as_str(),
                    "port": row.port,
                    "mode": row.mode.map(|mode| mode.as_str()),
                    "pid": row.pid,
                    "started_at": row
                        .started_at
                        .and_then(|at| OffsetDateTime::from(at).format(&Rfc3339).ok()),
                    "uptime_secs": row.uptime().map(|uptime| uptime.as_secs()),
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BootMode;
    use std::time::SystemTime;

    fn rows() -> Vec<StatusRow> {
        vec![
            StatusRow {
                name: "min".into(),
                status: VmStatus::Running,
                port: 3021,
                mode: Some(BootMode::LiveMedia),
                pid: Some(4242),
                started_at: None,
            },
            StatusRow {
                name: "full".into(),
                status: VmStatus::NotCreated,
                port: 3022,
                mode: None,
                pid: None,
                started_at: None,
            },
        ]
    }

    #[test]
    fn table_lists_every_vm_with_running_detail() {
        let table = render_table(&rows(), false);
        assert_eq!(
            table,
            "VM Status:\n  ● min: running (port 3021, live)\n  − full: not_created\n"
        );
    }

    #[test]
    fn table_colors_whole_label() {
        let table = render_table(&rows()[1..], true);
        assert!(table.contains("\u{1b}[90m− full: not_created\u{1b}[0m"));
    }

    #[test]
    fn uptime_is_shown_as_clock() {
        assert_eq!(format_uptime(Duration::from_secs(3_723)), "01:02:03");

        let mut row = rows().remove(0);
        row.started_at = Some(SystemTime::now() - Duration::from_secs(65));
        let detail = running_detail(&row);
        assert!(detail.starts_with("port 3021, live, up 00:01:0"), "{detail}");
    }

    #[test]
    fn json_uses_stable_tokens() {
        let value = render_json(&rows());
        assert_eq!(value[0]["status"], "running");
        assert_eq!(value[0]["mode"], "live");
        assert_eq!(value[0]["pid"], 4242);
        assert_eq!(value[1]["status"], "not_created");
        assert!(value[1]["mode"].is_null());
        assert!(value[1]["started_at"].is_null());
    }
}
