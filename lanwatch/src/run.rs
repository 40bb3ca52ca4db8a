use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use host_discovery::{broadcast_discover, is_privileged, reachability_probe, EchoOptions, SweepOptions};
use inventory_sqlite::{Db, RunRecord};
use lanwatch_core::{DiscoverySet, IntervalGate, ScanStateMarker};
use port_scan::{open_ports_summary, parse_ports, ProbeLimits};
use reconcile::{purge_older_than, retention_days, HostProbe, Reconciler, RunReport};
use std::net::{IpAddr, Ipv4Addr};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::oui;

/// How the operator wants the port sub-scan handled this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortScanMode {
    /// Honor config and the interval gate.
    Scheduled,
    /// Skip the interval check; the marker is still rewritten.
    Forced,
    Disabled,
}

/// Live network probes: ICMP echo for liveness, TCP connect for ports.
pub struct NetProbe {
    echo: EchoOptions,
    limits: ProbeLimits,
}

impl NetProbe {
    pub fn from_settings(settings: &Settings) -> Self {
        NetProbe {
            echo: EchoOptions { timeout: settings.reachability.timeout, retries: settings.reachability.retries },
            limits: ProbeLimits {
                timeout_per_port: settings.port_scan.timeout,
                parallelism: settings.port_scan.threads,
                retries: settings.port_scan.retries,
                ..ProbeLimits::default()
            },
        }
    }
}

#[async_trait]
impl HostProbe for NetProbe {
    async fn reachable(&self, address: Ipv4Addr) -> bool {
        reachability_probe(address, self.echo).await
    }

    async fn open_ports(&self, address: Ipv4Addr, ports: &[u16]) -> String {
        open_ports_summary(IpAddr::V4(address), ports, self.limits).await
    }
}

/// The candidate port set, or empty when scanning is off or the range is unusable.
fn port_set(settings: &Settings, mode: PortScanMode) -> Vec<u16> {
    let wanted = match mode {
        PortScanMode::Disabled => false,
        PortScanMode::Forced => true,
        PortScanMode::Scheduled => settings.port_scan.enabled,
    };
    if !wanted {
        return Vec::new();
    }
    match parse_ports(&settings.port_scan.range) {
        Ok(p) if p.is_empty() => {
            warn!(range = %settings.port_scan.range, "port range has no valid ports, port scanning disabled");
            Vec::new()
        }
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "invalid port range, port scanning disabled");
            Vec::new()
        }
    }
}

/// One full pass: checks, gate, discovery, reconciliation, retention.
///
/// Errors returned from here are fatal. Store trouble after the open
/// is reported through the returned [`RunReport`].
pub async fn execute(settings: &Settings, mode: PortScanMode) -> Result<RunReport> {
    let now = OffsetDateTime::now_utc();
    let subnet = settings.validate_for_run()?;
    if !is_privileged() {
        bail!("root privileges are required for raw ARP and ICMP access");
    }
    let mut db = Db::open_or_create(&settings.database)
        .with_context(|| format!("open inventory at {}", settings.database.display()))?;

    let ports = port_set(settings, mode);
    let probe_ports = if ports.is_empty() {
        false
    } else {
        let gate = IntervalGate::new(ScanStateMarker::new(&settings.scan_state_file), settings.port_scan.interval);
        match mode {
            PortScanMode::Forced => gate.force(now),
            _ => gate.admit(now),
        }
    };

    let vendors = oui::load_resolver(settings).await;

    let sweep = SweepOptions {
        timeout: settings.discovery.timeout,
        retries: settings.discovery.retries,
        interface: settings.interface.clone(),
    };
    let discovered: DiscoverySet = match broadcast_discover(&subnet, &sweep).await {
        Ok(found) => found,
        Err(e) if e.is_fatal() => return Err(e).context("host discovery"),
        Err(e) => {
            warn!(error = %e, "discovery failed, treating every known host as unseen");
            DiscoverySet::new()
        }
    };
    info!(live = discovered.len(), %subnet, port_scan = probe_ports, "discovery finished");

    let probe = NetProbe::from_settings(settings);
    let report = Reconciler::new(&vendors, &probe)
        .with_port_scan(ports, probe_ports)
        .run(&mut db, &discovered, now)
        .await;

    if let Err(e) = purge_older_than(&mut db, retention_days(settings.history_retention_days), now) {
        error!(error = %format!("{e:#}"), "history retention failed");
    }

    let record = RunRecord {
        run_id: report.run_id,
        started_at: now,
        finished_at: OffsetDateTime::now_utc(),
        port_scan: report.port_scan,
        inserted: report.counts.inserted,
        updated: report.counts.updated,
        marked_offline: report.counts.marked_offline,
        port_scans: report.counts.port_scans,
        committed: report.committed,
    };
    if let Err(e) = db.record_run(&record) {
        warn!(error = %format!("{e:#}"), "could not record run");
    }
    Ok(report)
}
