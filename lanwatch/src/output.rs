use anyhow::Result;
use clap::ValueEnum;
use lanwatch_core::{HistoryEvent, HostRecord, Snapshot};
use reconcile::RunReport;
use std::io::Write;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Jsonl,
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.unix_timestamp().to_string())
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

pub fn render_report(report: &RunReport, format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => out.push_str(&serde_json::to_string_pretty(report)?),
        OutputFormat::Jsonl => {
            for e in report.entries.values() {
                out.push_str(&serde_json::to_string(e)?);
                out.push('\n');
            }
        }
        OutputFormat::Text => {
            out.push_str(&format!(
                "{:<16} {:<18} {:<28} {:<16} {:<20} {}\n",
                "ADDRESS", "MAC", "VENDOR", "HOSTNAME", "STATUS", "PORTS"
            ));
            for e in report.entries.values() {
                out.push_str(&format!(
                    "{:<16} {:<18} {:<28} {:<16} {:<20} {}\n",
                    e.address,
                    or_dash(&e.mac),
                    e.vendor,
                    or_dash(&e.hostname),
                    e.status_label(),
                    or_dash(&e.ports)
                ));
            }
            out.push_str(&format!(
                "{} online, {} new, {} updated, {} offline, {} port scans{}\n",
                report.online(),
                report.counts.inserted,
                report.counts.updated,
                report.counts.marked_offline,
                report.counts.port_scans,
                if report.committed { "" } else { " (NOT SAVED)" }
            ));
        }
    }
    Ok(out)
}

pub fn render_hosts(hosts: &Snapshot, format: OutputFormat) -> Result<String> {
    let mut out = String::new();
    match format {
        OutputFormat::Json => {
            let all: Vec<&HostRecord> = hosts.values().collect();
            out.push_str(&serde_json::to_string_pretty(&all)?);
        }
        OutputFormat::Jsonl => {
            for h in hosts.values() {
                out.push_str(&serde_json::to_string(h)?);
                out.push('\n');
            }
        }
        OutputFormat::Text => {
            for h in hosts.values() {
                out.push_str(&format!(
                    "{:<16} {:<8} {:<18} {:<28} {:<16} known={} last_seen={} ports={} {}\n",
                    h.address,
                    h.status,
                    or_dash(&h.mac),
                    h.vendor,
                    or_dash(&h.hostname),
                    h.known,
                    rfc3339(h.last_seen_online),
                    or_dash(&h.ports),
                    h.note
                ));
            }
        }
    }
    Ok(out)
}

pub fn write_hosts_csv(hosts: &Snapshot, path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(std::fs::File::create(path)?);
    wtr.write_record(["address", "mac", "vendor", "hostname", "ports", "note", "status", "known", "first_seen", "last_seen_online"])?;
    for h in hosts.values() {
        wtr.write_record([
            h.address.to_string(),
            h.mac.clone(),
            h.vendor.clone(),
            h.hostname.clone(),
            h.ports.clone(),
            h.note.clone(),
            h.status.to_string(),
            h.known.to_string(),
            rfc3339(h.first_seen),
            rfc3339(h.last_seen_online),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

/// History grouped by host; events whose host row is gone are hidden.
pub fn render_history(events: &[HistoryEvent], hosts: &Snapshot, format: OutputFormat) -> Result<String> {
    let visible: Vec<&HistoryEvent> = events.iter().filter(|e| hosts.contains_key(&e.address)).collect();
    let mut out = String::new();
    match format {
        OutputFormat::Json => out.push_str(&serde_json::to_string_pretty(&visible)?),
        OutputFormat::Jsonl => {
            for e in &visible {
                out.push_str(&serde_json::to_string(e)?);
                out.push('\n');
            }
        }
        OutputFormat::Text => {
            let mut current = None;
            for e in visible {
                if current != Some(e.address) {
                    let name = hosts.get(&e.address).map(|h| h.hostname.as_str()).unwrap_or("");
                    let header = format!("{} {}", e.address, name);
                    out.push_str(header.trim_end());
                    out.push('\n');
                    current = Some(e.address);
                }
                out.push_str(&format!("  {}  {}\n", rfc3339(e.at), e.status));
            }
        }
    }
    Ok(out)
}

/// Print to stdout or overwrite `out`.
pub fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            let mut w = std::io::BufWriter::new(std::fs::File::create(path)?);
            w.write_all(text.as_bytes())?;
            w.flush()?;
        }
        None => print!("{text}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanwatch_core::HostStatus;
    use reconcile::{ReportEntry, Seen};
    use std::net::Ipv4Addr;
    use time::macros::datetime;

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    fn hosts() -> Snapshot {
        let mut h = HostRecord::discovered(A, "AA:BB:CC:11:22:33", "Acme Corp", "22", datetime!(2024-05-01 10:00 UTC));
        h.hostname = "nas".into();
        [(A, h)].into_iter().collect()
    }

    #[test]
    fn report_text_marks_failed_entries() {
        let mut r = RunReport::new(datetime!(2024-05-01 10:00 UTC), false);
        r.push(ReportEntry {
            address: A,
            mac: "AA:BB:CC:11:22:33".into(),
            vendor: "Acme Corp".into(),
            hostname: String::new(),
            ports: String::new(),
            status: HostStatus::Online,
            seen: Seen::Discovered,
            db_failed: false,
        });
        r.mark_db_failed();
        let text = render_report(&r, OutputFormat::Text).unwrap();
        assert!(text.contains("ONLINE (DB Fail)"));
        assert!(text.contains("(NOT SAVED)"));

        let json: serde_json::Value = serde_json::from_str(&render_report(&r, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json["entries"]["10.0.0.5"]["db_failed"], true);
        assert_eq!(json["entries"]["10.0.0.5"]["status"], "ONLINE");
    }

    #[test]
    fn history_hides_orphans_and_groups() {
        let orphan = Ipv4Addr::new(10, 0, 0, 99);
        let events = vec![
            HistoryEvent::new(A, HostStatus::Online, datetime!(2024-05-01 10:00 UTC)),
            HistoryEvent::new(A, HostStatus::Offline, datetime!(2024-05-02 10:00 UTC)),
            HistoryEvent::new(orphan, HostStatus::Online, datetime!(2024-05-01 10:00 UTC)),
        ];
        let text = render_history(&events, &hosts(), OutputFormat::Text).unwrap();
        assert_eq!(text, "10.0.0.5 nas\n  2024-05-01T10:00:00Z  ONLINE\n  2024-05-02T10:00:00Z  OFFLINE\n");
        let lines = render_history(&events, &hosts(), OutputFormat::Jsonl).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn hosts_csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.csv");
        write_hosts_csv(&hosts(), &path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert!(lines.next().unwrap().starts_with("address,mac,vendor"));
        assert!(lines.next().unwrap().starts_with("10.0.0.5,AA:BB:CC:11:22:33,Acme Corp,nas,22,"));
    }
}
