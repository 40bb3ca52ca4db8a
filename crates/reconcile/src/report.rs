use lanwatch_core::HostStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use time::OffsetDateTime;
use uuid::Uuid;

/// How a reported host was observed this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Seen {
    Discovered,
    ProbeAlive,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub address: Ipv4Addr,
    pub mac: String,
    pub vendor: String,
    pub hostname: String,
    pub ports: String,
    pub status: HostStatus,
    pub seen: Seen,
    /// Set when the run's batch could not be persisted.
    pub db_failed: bool,
}

impl ReportEntry {
    pub fn status_label(&self) -> String {
        if self.db_failed {
            format!("{} (DB Fail)", self.status)
        } else {
            self.status.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub inserted: usize,
    pub updated: usize,
    pub marked_offline: usize,
    pub port_scans: usize,
}

/// Outcome of one reconciliation pass, ordered by address.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub port_scan: bool,
    pub entries: BTreeMap<Ipv4Addr, ReportEntry>,
    pub counts: RunCounts,
    pub committed: bool,
}

impl RunReport {
    pub fn new(at: OffsetDateTime, port_scan: bool) -> Self {
        RunReport {
            run_id: Uuid::now_v7(),
            at,
            port_scan,
            entries: BTreeMap::new(),
            counts: RunCounts::default(),
            committed: false,
        }
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.insert(entry.address, entry);
    }

    /// Flag every entry after the batch was rolled back.
    pub fn mark_db_failed(&mut self) {
        self.committed = false;
        for e in self.entries.values_mut() {
            e.db_failed = true;
        }
    }

    pub fn online(&self) -> usize {
        self.entries.values().filter(|e| e.status == HostStatus::Online).count()
    }
}
