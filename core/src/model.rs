use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use time::OffsetDateTime;

/// Liveness state of an inventory host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostStatus {
    Online,
    Offline,
}

impl HostStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HostStatus::Online => "ONLINE",
            HostStatus::Offline => "OFFLINE",
        }
    }

    /// Integer form used by the history table (1 = online, 0 = offline).
    pub fn as_flag(self) -> i64 {
        match self {
            HostStatus::Online => 1,
            HostStatus::Offline => 0,
        }
    }

    pub fn from_flag(flag: i64) -> Option<Self> {
        match flag {
            1 => Some(HostStatus::Online),
            0 => Some(HostStatus::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown host status: {0:?}")]
pub struct ParseStatusError(String);

impl FromStr for HostStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(HostStatus::Online),
            "OFFLINE" => Ok(HostStatus::Offline),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// Addresses that answered the current broadcast pass, mapped to their hardware address.
pub type DiscoverySet = BTreeMap<Ipv4Addr, String>;

/// Inventory state as read once at the start of a run.
pub type Snapshot = BTreeMap<Ipv4Addr, HostRecord>;

/// One row of the host inventory.
///
/// `hostname`, `note` and `known` belong to the operator. The engine copies
/// them through untouched; only the editing surface writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRecord {
    pub address: Ipv4Addr,
    pub mac: String,
    pub vendor: String,
    pub hostname: String,
    pub ports: String,
    pub note: String,
    pub status: HostStatus,
    pub known: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub first_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_online: OffsetDateTime,
}

impl HostRecord {
    /// A freshly discovered host: online, unknown to the operator, no note.
    pub fn discovered(address: Ipv4Addr, mac: &str, vendor: &str, ports: &str, now: OffsetDateTime) -> Self {
        HostRecord {
            address,
            mac: mac.to_string(),
            vendor: vendor.to_string(),
            hostname: String::new(),
            ports: ports.to_string(),
            note: String::new(),
            status: HostStatus::Online,
            known: false,
            first_seen: now,
            last_seen_online: now,
        }
    }
}

/// An append-only status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEvent {
    pub address: Ipv4Addr,
    pub status: HostStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl HistoryEvent {
    pub fn new(address: Ipv4Addr, status: HostStatus, at: OffsetDateTime) -> Self {
        HistoryEvent { address, status, at }
    }
}

/// Engine-owned fields rewritten when a stored host is seen online again.
/// Status becomes ONLINE and last-seen-online becomes `seen_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRefresh {
    pub address: Ipv4Addr,
    pub mac: String,
    pub vendor: String,
    /// `None` leaves the stored ports value as it is.
    pub ports: Option<String>,
    pub seen_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMutation {
    Insert(HostRecord),
    Refresh(HostRefresh),
    MarkOffline { address: Ipv4Addr },
}

impl HostMutation {
    pub fn address(&self) -> Ipv4Addr {
        match self {
            HostMutation::Insert(r) => r.address,
            HostMutation::Refresh(r) => r.address,
            HostMutation::MarkOffline { address } => *address,
        }
    }
}

/// Everything one reconciliation pass writes. Applied as a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    pub hosts: Vec<HostMutation>,
    pub history: Vec<HistoryEvent>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.history.is_empty()
    }

    pub fn inserts(&self) -> usize {
        self.hosts.iter().filter(|m| matches!(m, HostMutation::Insert(_))).count()
    }

    pub fn refreshes(&self) -> usize {
        self.hosts.iter().filter(|m| matches!(m, HostMutation::Refresh(_))).count()
    }

    pub fn offlines(&self) -> usize {
        self.hosts.iter().filter(|m| matches!(m, HostMutation::MarkOffline { .. })).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn status_round_trips_through_text_and_flag() {
        assert_eq!("online".parse::<HostStatus>().unwrap(), HostStatus::Online);
        assert_eq!("OFFLINE".parse::<HostStatus>().unwrap(), HostStatus::Offline);
        assert!("UP".parse::<HostStatus>().is_err());
        assert_eq!(HostStatus::from_flag(HostStatus::Online.as_flag()), Some(HostStatus::Online));
        assert_eq!(HostStatus::from_flag(7), None);
    }

    #[test]
    fn discovered_record_is_online_and_unknown() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let r = HostRecord::discovered(Ipv4Addr::new(10, 0, 0, 1), "aa:bb:cc:00:11:22", "Acme", "", now);
        assert_eq!(r.status, HostStatus::Online);
        assert!(!r.known);
        assert!(r.hostname.is_empty() && r.note.is_empty());
        assert_eq!(r.first_seen, r.last_seen_online);
    }

    #[test]
    fn batch_counts_by_kind() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let batch = MutationBatch {
            hosts: vec![
                HostMutation::Insert(HostRecord::discovered(a, "", "", "", now)),
                HostMutation::MarkOffline { address: Ipv4Addr::new(10, 0, 0, 2) },
            ],
            history: vec![HistoryEvent::new(a, HostStatus::Online, now)],
        };
        assert!(!batch.is_empty());
        assert_eq!((batch.inserts(), batch.refreshes(), batch.offlines()), (1, 0, 1));
    }

    #[test]
    fn mutation_address_covers_every_kind() {
        let now = datetime!(2024-05-01 12:00 UTC);
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let refresh = HostRefresh { address: a, mac: String::new(), vendor: String::new(), ports: None, seen_at: now };
        assert_eq!(HostMutation::Insert(HostRecord::discovered(a, "", "", "", now)).address(), a);
        assert_eq!(HostMutation::Refresh(refresh).address(), a);
        assert_eq!(HostMutation::MarkOffline { address: a }.address(), a);
    }
}
