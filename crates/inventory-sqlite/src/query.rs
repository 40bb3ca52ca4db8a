use crate::Db;
use anyhow::Result;
use lanwatch_core::{HistoryEvent, HostRecord, HostStatus, Snapshot};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use std::net::Ipv4Addr;
use time::OffsetDateTime;
use tracing::warn;

const HOST_COLUMNS: &str =
    "address, mac_address, vendor, hostname, ports, note, status, known_host, first_seen, last_seen_online";

fn ts_at(row: &Row, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let secs: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn address_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Ipv4Addr>> {
    let raw: String = row.get(idx)?;
    match raw.parse() {
        Ok(a) => Ok(Some(a)),
        Err(_) => {
            warn!(address = %raw, "skipping row with unparsable address");
            Ok(None)
        }
    }
}

fn row_to_host(row: &Row) -> rusqlite::Result<Option<HostRecord>> {
    let Some(address) = address_at(row, 0)? else { return Ok(None) };
    let status: String = row.get(6)?;
    let status = status
        .parse::<HostStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(Some(HostRecord {
        address,
        mac: row.get(1)?,
        vendor: row.get(2)?,
        hostname: row.get(3)?,
        ports: row.get(4)?,
        note: row.get(5)?,
        status,
        known: row.get::<_, i64>(7)? != 0,
        first_seen: ts_at(row, 8)?,
        last_seen_online: ts_at(row, 9)?,
    }))
}

fn row_to_event(row: &Row) -> rusqlite::Result<Option<HistoryEvent>> {
    let Some(address) = address_at(row, 0)? else { return Ok(None) };
    let flag: i64 = row.get(1)?;
    let Some(status) = HostStatus::from_flag(flag) else {
        warn!(%address, flag, "skipping history row with unknown status");
        return Ok(None);
    };
    Ok(Some(HistoryEvent { address, status, at: ts_at(row, 2)? }))
}

impl Db {
    /// All host rows keyed (and therefore ordered) by address.
    pub fn hosts(&self) -> Result<Snapshot> {
        let mut stmt = self.conn.prepare(&format!("SELECT {HOST_COLUMNS} FROM hosts"))?;
        let rows = stmt.query_map([], row_to_host)?;
        let mut out = Snapshot::new();
        for row in rows {
            if let Some(h) = row? {
                out.insert(h.address, h);
            }
        }
        Ok(out)
    }

    pub fn host(&self, address: Ipv4Addr) -> Result<Option<HostRecord>> {
        let found = self
            .conn
            .query_row(
                &format!("SELECT {HOST_COLUMNS} FROM hosts WHERE address = ?"),
                [address.to_string()],
                row_to_host,
            )
            .optional()?;
        Ok(found.flatten())
    }

    /// History events ordered by address then time; optionally for one host.
    pub fn history(&self, address: Option<Ipv4Addr>) -> Result<Vec<HistoryEvent>> {
        let mut events = Vec::new();
        match address {
            Some(a) => {
                let mut stmt = self.conn.prepare(
                    "SELECT address, status, event_time FROM host_history WHERE address = ? ORDER BY event_time, history_id",
                )?;
                for row in stmt.query_map([a.to_string()], row_to_event)? {
                    events.extend(row?);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT address, status, event_time FROM host_history ORDER BY event_time, history_id")?;
                for row in stmt.query_map([], row_to_event)? {
                    events.extend(row?);
                }
            }
        }
        // stable: keeps time order within an address
        events.sort_by_key(|e| e.address);
        Ok(events)
    }
}
