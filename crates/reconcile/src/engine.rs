//! The reconciliation pass: discovery set + stored snapshot -> one mutation batch.

use crate::report::{ReportEntry, RunReport, Seen};
use crate::transition::{transition, Action, Trigger};
use async_trait::async_trait;
use lanwatch_core::{
    DiscoverySet, HistoryEvent, HostMutation, HostRecord, HostRefresh, HostStatus, InventoryStore, MutationBatch,
    Snapshot,
};
use std::net::Ipv4Addr;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use vendor_lookup::VendorResolver;

/// Network probes the engine calls into. Neither method may fail: every
/// error is a negative result.
#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Unicast liveness check for a host missing from the broadcast pass.
    async fn reachable(&self, address: Ipv4Addr) -> bool;

    /// Open ports among `ports`, ascending and comma-joined.
    async fn open_ports(&self, address: Ipv4Addr, ports: &[u16]) -> String;
}

/// A computed but not yet persisted pass.
#[derive(Debug, Clone)]
pub struct Plan {
    pub batch: MutationBatch,
    pub report: RunReport,
}

pub struct Reconciler<'a, P: ?Sized> {
    vendors: &'a VendorResolver,
    probe: &'a P,
    ports: Vec<u16>,
    probe_ports: bool,
}

impl<'a, P: HostProbe + ?Sized> Reconciler<'a, P> {
    pub fn new(vendors: &'a VendorResolver, probe: &'a P) -> Self {
        Reconciler { vendors, probe, ports: Vec::new(), probe_ports: false }
    }

    /// Probe `ports` on every discovered host this run. An empty set or
    /// `enabled == false` leaves stored ports untouched.
    pub fn with_port_scan(mut self, ports: Vec<u16>, enabled: bool) -> Self {
        self.ports = ports;
        self.probe_ports = enabled;
        self
    }

    fn scans_ports(&self) -> bool {
        self.probe_ports && !self.ports.is_empty()
    }

    /// Decide every host against `prior` without touching the store.
    pub async fn plan(&self, discovered: &DiscoverySet, prior: &Snapshot, now: OffsetDateTime) -> Plan {
        let mut batch = MutationBatch::default();
        let mut report = RunReport::new(now, self.scans_ports());

        for (&address, mac) in discovered {
            let vendor = self.vendors.resolve(mac);
            let candidate = if self.scans_ports() {
                report.counts.port_scans += 1;
                Some(self.probe.open_ports(address, &self.ports).await)
            } else {
                None
            };
            let stored = prior.get(&address);
            let t = transition(stored.map(|r| r.status), Trigger::Discovered);

            match (t.action, stored) {
                (Action::Insert, _) => {
                    let record = HostRecord::discovered(address, mac, &vendor, candidate.as_deref().unwrap_or(""), now);
                    info!(%address, mac = %mac, vendor = %vendor, "new host");
                    batch.hosts.push(HostMutation::Insert(record));
                }
                (Action::Refresh, Some(s)) if needs_refresh(s, mac, &vendor, candidate.as_deref()) => {
                    if s.status == HostStatus::Offline {
                        info!(%address, "host back online");
                    } else {
                        debug!(%address, "host details changed");
                    }
                    batch.hosts.push(HostMutation::Refresh(HostRefresh {
                        address,
                        mac: mac.clone(),
                        vendor: vendor.clone(),
                        ports: candidate.clone(),
                        seen_at: now,
                    }));
                }
                _ => debug!(%address, "host unchanged"),
            }
            if t.record_history {
                batch.history.push(HistoryEvent::new(address, t.next, now));
            }

            let ports = candidate.or_else(|| stored.map(|s| s.ports.clone())).unwrap_or_default();
            report.push(ReportEntry {
                address,
                mac: mac.clone(),
                vendor,
                hostname: stored.map(|s| s.hostname.clone()).unwrap_or_default(),
                ports,
                status: t.next,
                seen: Seen::Discovered,
                db_failed: false,
            });
        }

        for (&address, stored) in prior.iter().filter(|(a, _)| !discovered.contains_key(*a)) {
            if stored.status == HostStatus::Offline {
                continue;
            }
            let trigger = if self.probe.reachable(address).await {
                Trigger::ProbeConfirmedAlive
            } else {
                Trigger::ProbeConfirmedDead
            };
            let t = transition(Some(stored.status), trigger);
            let seen = match t.action {
                Action::MarkOffline => {
                    info!(%address, "host went offline");
                    batch.hosts.push(HostMutation::MarkOffline { address });
                    Seen::Unreachable
                }
                _ => {
                    debug!(%address, "missed broadcast but answered probe, keeping online");
                    Seen::ProbeAlive
                }
            };
            if t.record_history {
                batch.history.push(HistoryEvent::new(address, t.next, now));
            }
            report.push(ReportEntry {
                address,
                mac: stored.mac.clone(),
                vendor: stored.vendor.clone(),
                hostname: stored.hostname.clone(),
                ports: stored.ports.clone(),
                status: t.next,
                seen,
                db_failed: false,
            });
        }

        report.counts.inserted = batch.inserts();
        report.counts.updated = batch.refreshes();
        report.counts.marked_offline = batch.offlines();
        Plan { batch, report }
    }

    /// Load the snapshot once, plan, and commit the batch as one transaction.
    ///
    /// Persistence failures never escape: they come back as a report with
    /// `committed == false` and every entry flagged.
    pub async fn run<S: InventoryStore + ?Sized>(
        &self,
        store: &mut S,
        discovered: &DiscoverySet,
        now: OffsetDateTime,
    ) -> RunReport {
        let prior = match store.load_hosts() {
            Ok(p) => p,
            Err(e) => {
                error!(error = %format!("{e:#}"), "cannot load inventory snapshot, nothing will be written");
                return self.unpersisted(discovered, now);
            }
        };

        let Plan { batch, mut report } = self.plan(discovered, &prior, now).await;
        if batch.is_empty() {
            debug!("no changes to persist");
            report.committed = true;
            return report;
        }
        match store.apply(&batch) {
            Ok(()) => {
                report.committed = true;
                info!(
                    inserted = report.counts.inserted,
                    updated = report.counts.updated,
                    offline = report.counts.marked_offline,
                    history = batch.history.len(),
                    "inventory updated"
                );
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), hosts = batch.hosts.len(), "inventory batch rolled back");
                report.mark_db_failed();
            }
        }
        report
    }

    fn unpersisted(&self, discovered: &DiscoverySet, now: OffsetDateTime) -> RunReport {
        let mut report = RunReport::new(now, false);
        for (&address, mac) in discovered {
            report.push(ReportEntry {
                address,
                mac: mac.clone(),
                vendor: self.vendors.resolve(mac),
                hostname: String::new(),
                ports: String::new(),
                status: HostStatus::Online,
                seen: Seen::Discovered,
                db_failed: true,
            });
        }
        report
    }
}

/// Engine-owned fields differ from what is stored, or the host was offline.
fn needs_refresh(stored: &HostRecord, mac: &str, vendor: &str, candidate_ports: Option<&str>) -> bool {
    stored.status == HostStatus::Offline
        || stored.mac != mac
        || stored.vendor != vendor
        || candidate_ports.is_some_and(|p| p != stored.ports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use inventory_sqlite::{Db, HostField};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use time::macros::datetime;
    use vendor_lookup::{VendorTable, SHORT_MAC};

    #[derive(Default)]
    struct FakeProbe {
        alive: HashSet<Ipv4Addr>,
        open: HashMap<Ipv4Addr, String>,
        pinged: Mutex<Vec<Ipv4Addr>>,
        scanned: Mutex<Vec<Ipv4Addr>>,
    }

    impl FakeProbe {
        fn alive(addrs: &[Ipv4Addr]) -> Self {
            FakeProbe { alive: addrs.iter().copied().collect(), ..Default::default() }
        }

        fn pinged(&self) -> Vec<Ipv4Addr> {
            self.pinged.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostProbe for FakeProbe {
        async fn reachable(&self, address: Ipv4Addr) -> bool {
            self.pinged.lock().unwrap().push(address);
            self.alive.contains(&address)
        }

        async fn open_ports(&self, address: Ipv4Addr, _ports: &[u16]) -> String {
            self.scanned.lock().unwrap().push(address);
            self.open.get(&address).cloned().unwrap_or_default()
        }
    }

    struct FlakyStore {
        inner: Db,
        fail_load: bool,
        fail_apply: bool,
    }

    impl InventoryStore for FlakyStore {
        fn load_hosts(&self) -> Result<Snapshot> {
            if self.fail_load {
                return Err(anyhow!("database is locked"));
            }
            self.inner.load_hosts()
        }

        fn apply(&mut self, batch: &MutationBatch) -> Result<()> {
            if self.fail_apply {
                return Err(anyhow!("disk I/O error"));
            }
            self.inner.apply(batch)
        }

        fn purge_history_before(&mut self, cutoff: OffsetDateTime) -> Result<usize> {
            self.inner.purge_history_before(cutoff)
        }
    }

    const T0: OffsetDateTime = datetime!(2024-05-01 10:00 UTC);
    const T1: OffsetDateTime = datetime!(2024-05-01 10:05 UTC);

    fn vendors() -> VendorResolver {
        let standard: VendorTable = [("DEADBE".to_string(), "Acme Corp".to_string())].into_iter().collect();
        VendorResolver::new(standard, VendorTable::default())
    }

    fn discovered(pairs: &[(Ipv4Addr, &str)]) -> DiscoverySet {
        pairs.iter().map(|(a, m)| (*a, m.to_string())).collect()
    }

    fn history_count(db: &Db) -> usize {
        db.history(None).unwrap().len()
    }

    /// Seed one ONLINE host through the engine itself.
    async fn seeded(address: Ipv4Addr, mac: &str, ports: &str) -> Db {
        let mut db = Db::open_in_memory().unwrap();
        let v = vendors();
        let probe = FakeProbe { open: [(address, ports.to_string())].into_iter().collect(), ..Default::default() };
        let r = Reconciler::new(&v, &probe)
            .with_port_scan(vec![22, 80], true)
            .run(&mut db, &discovered(&[(address, mac)]), T0)
            .await;
        assert!(r.committed);
        db
    }

    #[tokio::test]
    async fn new_host_with_standard_vendor() {
        let mut db = Db::open_in_memory().unwrap();
        let v = vendors();
        let probe = FakeProbe::default();
        let a = Ipv4Addr::new(192, 168, 1, 10);

        let report = Reconciler::new(&v, &probe).run(&mut db, &discovered(&[(a, "DE:AD:BE:EF:00:01")]), T0).await;

        assert!(report.committed);
        assert_eq!(report.counts.inserted, 1);
        let h = db.host(a).unwrap().unwrap();
        assert_eq!((h.vendor.as_str(), h.ports.as_str(), h.status), ("Acme Corp", "", HostStatus::Online));
        assert_eq!((h.first_seen, h.last_seen_online), (T0, T0));
        assert!(!h.known);
        let hist = db.history(Some(a)).unwrap();
        assert_eq!(hist, vec![HistoryEvent::new(a, HostStatus::Online, T0)]);
        assert!(probe.scanned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn online_host_that_fails_probe_goes_offline() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let mut db = seeded(a, "AA:BB:CC:11:22:33", "22").await;
        let v = vendors();
        let probe = FakeProbe::default();

        let report = Reconciler::new(&v, &probe).run(&mut db, &DiscoverySet::new(), T1).await;

        assert_eq!(probe.pinged(), vec![a]);
        assert_eq!(report.counts.marked_offline, 1);
        assert_eq!(report.counts.updated + report.counts.inserted, 0);
        assert_eq!(report.entries[&a].seen, Seen::Unreachable);
        let h = db.host(a).unwrap().unwrap();
        assert_eq!(h.status, HostStatus::Offline);
        assert_eq!(h.ports, "22");
        assert_eq!(h.last_seen_online, T0);
        let hist = db.history(Some(a)).unwrap();
        assert_eq!(hist.last(), Some(&HistoryEvent::new(a, HostStatus::Offline, T1)));
        assert_eq!(hist.len(), 2);
    }

    #[tokio::test]
    async fn online_host_that_passes_probe_is_not_written() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let db = seeded(a, "AA:BB:CC:11:22:33", "22").await;
        let v = vendors();
        let probe = FakeProbe::alive(&[a]);
        let prior = db.hosts().unwrap();

        let plan = Reconciler::new(&v, &probe).plan(&DiscoverySet::new(), &prior, T1).await;

        assert!(plan.batch.is_empty());
        let e = &plan.report.entries[&a];
        assert_eq!((e.status, e.seen), (HostStatus::Online, Seen::ProbeAlive));
    }

    #[tokio::test]
    async fn offline_hosts_are_carried_forward_silently() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let mut db = seeded(a, "AA:BB:CC:11:22:33", "").await;
        let v = vendors();
        let probe = FakeProbe::default();
        Reconciler::new(&v, &probe).run(&mut db, &DiscoverySet::new(), T1).await;
        assert_eq!(probe.pinged().len(), 1);

        let report = Reconciler::new(&v, &probe).run(&mut db, &DiscoverySet::new(), T1).await;
        assert_eq!(probe.pinged().len(), 1);
        assert!(report.entries.is_empty());
        assert_eq!(history_count(&db), 2);
    }

    #[tokio::test]
    async fn rediscovered_offline_host_comes_back_online() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let mut db = seeded(a, "AA:BB:CC:11:22:33", "22").await;
        let v = vendors();
        let probe = FakeProbe::default();
        Reconciler::new(&v, &probe).run(&mut db, &DiscoverySet::new(), T1).await;

        let later = datetime!(2024-05-01 11:00 UTC);
        let report = Reconciler::new(&v, &probe).run(&mut db, &discovered(&[(a, "AA:BB:CC:11:22:33")]), later).await;

        assert_eq!(report.counts.updated, 1);
        let h = db.host(a).unwrap().unwrap();
        assert_eq!((h.status, h.last_seen_online, h.first_seen), (HostStatus::Online, later, T0));
        assert_eq!(h.ports, "22");
        let statuses: Vec<_> = db.history(Some(a)).unwrap().into_iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![HostStatus::Online, HostStatus::Offline, HostStatus::Online]);
    }

    #[tokio::test]
    async fn second_identical_run_writes_nothing() {
        let mut db = Db::open_in_memory().unwrap();
        let v = vendors();
        let probe = FakeProbe::default();
        let d = discovered(&[
            (Ipv4Addr::new(10, 0, 0, 1), "DE:AD:BE:00:00:01"),
            (Ipv4Addr::new(10, 0, 0, 2), "11:22:33:44:55:66"),
        ]);
        let engine = Reconciler::new(&v, &probe);

        engine.run(&mut db, &d, T0).await;
        let before = db.hosts().unwrap();
        let prior = db.hosts().unwrap();
        let plan = engine.plan(&d, &prior, T1).await;
        assert!(plan.batch.is_empty());

        let report = engine.run(&mut db, &d, T1).await;
        assert!(report.committed);
        assert_eq!(report.counts, Default::default());
        assert_eq!(db.hosts().unwrap(), before);
        assert_eq!(history_count(&db), 2);
    }

    #[tokio::test]
    async fn skipped_port_probe_never_touches_stored_ports() {
        let a = Ipv4Addr::new(10, 0, 0, 7);
        let mut db = seeded(a, "AA:BB:CC:11:22:33", "22,80").await;
        let v = vendors();
        let probe = FakeProbe::default();

        let report = Reconciler::new(&v, &probe)
            .with_port_scan(vec![22, 80], false)
            .run(&mut db, &discovered(&[(a, "DE:AD:BE:00:00:07")]), T1)
            .await;

        assert_eq!(report.counts.updated, 1);
        assert_eq!(report.counts.port_scans, 0);
        assert_eq!(report.entries[&a].ports, "22,80");
        let h = db.host(a).unwrap().unwrap();
        assert_eq!((h.mac.as_str(), h.vendor.as_str()), ("DE:AD:BE:00:00:07", "Acme Corp"));
        assert_eq!(h.ports, "22,80");
        assert_eq!(history_count(&db), 1);
    }

    #[tokio::test]
    async fn probed_ports_replace_stored_value_when_different() {
        let a = Ipv4Addr::new(10, 0, 0, 7);
        let mut db = seeded(a, "AA:BB:CC:11:22:33", "22,80").await;
        let v = vendors();
        let probe = FakeProbe { open: [(a, "443".to_string())].into_iter().collect(), ..Default::default() };
        let engine = Reconciler::new(&v, &probe).with_port_scan(vec![22, 80, 443], true);

        let report = engine.run(&mut db, &discovered(&[(a, "AA:BB:CC:11:22:33")]), T1).await;
        assert_eq!((report.counts.updated, report.counts.port_scans), (1, 1));
        assert_eq!(db.host(a).unwrap().unwrap().ports, "443");

        // Same result again: probe runs, nothing written.
        let report = engine.run(&mut db, &discovered(&[(a, "AA:BB:CC:11:22:33")]), T1).await;
        assert_eq!((report.counts.updated, report.counts.port_scans), (0, 1));
    }

    #[tokio::test]
    async fn empty_port_set_disables_probing() {
        let v = vendors();
        let probe = FakeProbe::default();
        let a = Ipv4Addr::new(10, 0, 0, 8);
        let plan = Reconciler::new(&v, &probe)
            .with_port_scan(Vec::new(), true)
            .plan(&discovered(&[(a, "AA:BB:CC:00:00:08")]), &Snapshot::new(), T0)
            .await;
        assert!(!plan.report.port_scan);
        assert!(probe.scanned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_mac_still_processed() {
        let v = vendors();
        let probe = FakeProbe::default();
        let a = Ipv4Addr::new(10, 0, 0, 9);
        let plan = Reconciler::new(&v, &probe).plan(&discovered(&[(a, "")]), &Snapshot::new(), T0).await;
        assert_eq!(plan.batch.inserts(), 1);
        assert_eq!(plan.report.entries[&a].vendor, SHORT_MAC);
    }

    #[tokio::test]
    async fn operator_fields_survive_reconciliation() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let mut db = seeded(a, "AA:BB:CC:11:22:33", "").await;
        db.set_known(a, true).unwrap();
        db.set_field(a, HostField::Hostname, "printer").unwrap();
        db.set_field(a, HostField::Note, "2nd floor").unwrap();
        let v = vendors();
        let probe = FakeProbe::default();
        let engine = Reconciler::new(&v, &probe);

        engine.run(&mut db, &DiscoverySet::new(), T1).await;
        let report = engine.run(&mut db, &discovered(&[(a, "DE:AD:BE:11:22:33")]), T1).await;

        assert_eq!(report.entries[&a].hostname, "printer");
        let h = db.host(a).unwrap().unwrap();
        assert!(h.known);
        assert_eq!((h.hostname.as_str(), h.note.as_str()), ("printer", "2nd floor"));
    }

    #[tokio::test]
    async fn failed_commit_flags_every_entry() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let b = Ipv4Addr::new(10, 0, 0, 6);
        let inner = seeded(a, "AA:BB:CC:11:22:33", "").await;
        let mut store = FlakyStore { inner, fail_load: false, fail_apply: true };
        let v = vendors();
        let probe = FakeProbe::default();

        let report = Reconciler::new(&v, &probe).run(&mut store, &discovered(&[(b, "DE:AD:BE:00:00:06")]), T1).await;

        assert!(!report.committed);
        assert_eq!(report.entries.len(), 2);
        assert!(report.entries.values().all(|e| e.db_failed));
        assert_eq!(report.entries[&a].status_label(), "OFFLINE (DB Fail)");
        assert_eq!(report.entries[&b].status_label(), "ONLINE (DB Fail)");
        assert!(store.inner.host(b).unwrap().is_none());
        assert_eq!(store.inner.host(a).unwrap().unwrap().status, HostStatus::Online);
        assert_eq!(history_count(&store.inner), 1);
    }

    #[tokio::test]
    async fn unreadable_snapshot_writes_and_probes_nothing() {
        let a = Ipv4Addr::new(10, 0, 0, 5);
        let inner = seeded(a, "AA:BB:CC:11:22:33", "").await;
        let mut store = FlakyStore { inner, fail_load: true, fail_apply: false };
        let v = vendors();
        let probe = FakeProbe::default();
        let b = Ipv4Addr::new(10, 0, 0, 6);

        let report = Reconciler::new(&v, &probe)
            .with_port_scan(vec![22], true)
            .run(&mut store, &discovered(&[(b, "DE:AD:BE:00:00:06")]), T1)
            .await;

        assert!(!report.committed);
        assert_eq!(report.entries.keys().copied().collect::<Vec<_>>(), vec![b]);
        assert_eq!(report.entries[&b].status_label(), "ONLINE (DB Fail)");
        assert_eq!(report.entries[&b].vendor, "Acme Corp");
        assert!(probe.pinged().is_empty());
        assert!(probe.scanned.lock().unwrap().is_empty());
        assert!(store.inner.host(b).unwrap().is_none());
    }
}
