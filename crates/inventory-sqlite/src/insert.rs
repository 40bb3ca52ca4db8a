use crate::{Db, HostField, RunRecord};
use anyhow::{bail, Context, Result};
use lanwatch_core::{HostMutation, HostStatus, InventoryStore, MutationBatch, Snapshot};
use rusqlite::{params, Transaction};
use std::net::Ipv4Addr;
use time::OffsetDateTime;
use tracing::{debug, warn};

fn write_host(tx: &Transaction<'_>, m: &HostMutation) -> Result<()> {
    let address = m.address();
    let changed = match m {
        HostMutation::Insert(r) => tx
            .execute(
                "INSERT INTO hosts(address,mac_address,vendor,hostname,ports,note,status,known_host,first_seen,last_seen_online)
                 VALUES (?,?,?,?,?,?,?,?,?,?)",
                params![
                    r.address.to_string(),
                    r.mac,
                    r.vendor,
                    r.hostname,
                    r.ports,
                    r.note,
                    r.status.as_str(),
                    r.known as i64,
                    r.first_seen.unix_timestamp(),
                    r.last_seen_online.unix_timestamp()
                ],
            )
            .with_context(|| format!("insert host {address}"))?,
        HostMutation::Refresh(r) => match &r.ports {
            Some(ports) => tx.execute(
                "UPDATE hosts SET mac_address=?, vendor=?, ports=?, status=?, last_seen_online=? WHERE address=?",
                params![
                    r.mac,
                    r.vendor,
                    ports,
                    HostStatus::Online.as_str(),
                    r.seen_at.unix_timestamp(),
                    address.to_string()
                ],
            ),
            None => tx.execute(
                "UPDATE hosts SET mac_address=?, vendor=?, status=?, last_seen_online=? WHERE address=?",
                params![
                    r.mac,
                    r.vendor,
                    HostStatus::Online.as_str(),
                    r.seen_at.unix_timestamp(),
                    address.to_string()
                ],
            ),
        }
        .with_context(|| format!("refresh host {address}"))?,
        HostMutation::MarkOffline { .. } => tx
            .execute(
                "UPDATE hosts SET status=? WHERE address=?",
                params![HostStatus::Offline.as_str(), address.to_string()],
            )
            .with_context(|| format!("mark host {address} offline"))?,
    };
    if changed == 0 {
        warn!(%address, "update matched no host row; skipped");
    }
    Ok(())
}

impl Db {
    /// Write a whole batch in one transaction. Any failure rolls everything back.
    pub fn apply_batch(&mut self, batch: &MutationBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for m in &batch.hosts {
            write_host(&tx, m)?;
        }
        {
            let mut stmt = tx.prepare("INSERT INTO host_history(address,status,event_time) VALUES (?,?,?)")?;
            for e in &batch.history {
                stmt.execute(params![e.address.to_string(), e.status.as_flag(), e.at.unix_timestamp()])
                    .with_context(|| format!("append history for {}", e.address))?;
            }
        }
        tx.commit().context("commit reconciliation batch")?;
        debug!(hosts = batch.hosts.len(), history = batch.history.len(), "batch committed");
        Ok(())
    }

    pub fn delete_history_before(&mut self, cutoff: OffsetDateTime) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let n = tx.execute("DELETE FROM host_history WHERE event_time < ?", [cutoff.unix_timestamp()])?;
        tx.commit()?;
        Ok(n)
    }

    pub fn set_known(&self, address: Ipv4Addr, known: bool) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE hosts SET known_host=? WHERE address=?",
            params![known as i64, address.to_string()],
        )?;
        if n == 0 {
            bail!("no host with address {address}");
        }
        Ok(())
    }

    pub fn set_field(&self, address: Ipv4Addr, field: HostField, value: &str) -> Result<()> {
        let sql = format!("UPDATE hosts SET {}=? WHERE address=?", field.column());
        let n = self.conn.execute(&sql, params![value, address.to_string()])?;
        if n == 0 {
            bail!("no host with address {address}");
        }
        Ok(())
    }

    /// Remove a host row. History rows are left in place; readers hide orphans.
    /// Returns whether a host row existed.
    pub fn forget_host(&self, address: Ipv4Addr) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM hosts WHERE address=?", [address.to_string()])?;
        Ok(n > 0)
    }

    pub fn delete_history_for(&self, address: Ipv4Addr) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM host_history WHERE address=?", [address.to_string()])?)
    }

    pub fn delete_all_history(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM host_history", [])?)
    }

    pub fn record_run(&self, run: &RunRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO runs(run_id,started_at,finished_at,port_scan,inserted,updated,marked_offline,port_scans,committed)
             VALUES (?,?,?,?,?,?,?,?,?)",
            params![
                run.run_id.to_string(),
                run.started_at.unix_timestamp(),
                run.finished_at.unix_timestamp(),
                run.port_scan as i64,
                run.inserted as i64,
                run.updated as i64,
                run.marked_offline as i64,
                run.port_scans as i64,
                run.committed as i64
            ],
        )?;
        Ok(())
    }
}

impl InventoryStore for Db {
    fn load_hosts(&self) -> Result<Snapshot> {
        self.hosts()
    }

    fn apply(&mut self, batch: &MutationBatch) -> Result<()> {
        self.apply_batch(batch)
    }

    fn purge_history_before(&mut self, cutoff: OffsetDateTime) -> Result<usize> {
        self.delete_history_before(cutoff)
    }
}
