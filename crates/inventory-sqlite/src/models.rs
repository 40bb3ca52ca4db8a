use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Bookkeeping row for one reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub port_scan: bool,
    pub inserted: usize,
    pub updated: usize,
    pub marked_offline: usize,
    pub port_scans: usize,
    pub committed: bool,
}

/// Free-text host columns the operator may edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostField {
    Hostname,
    Note,
}

impl HostField {
    pub fn column(self) -> &'static str {
        match self {
            HostField::Hostname => "hostname",
            HostField::Note => "note",
        }
    }
}

impl FromStr for HostField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hostname" => Ok(HostField::Hostname),
            "note" => Ok(HostField::Note),
            other => anyhow::bail!("field '{other}' not updatable"),
        }
    }
}
