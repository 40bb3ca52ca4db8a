//! TCP connect probing of one host's port set with timeouts and bounded concurrency.

use anyhow::{anyhow, Result};
use rand::{thread_rng, Rng};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Parse a comma-separated list of ports/ranges (e.g., "22,80,443", "1-1024,8080").
///
/// Entries that are numeric but outside 1-65535, and reversed ranges, are
/// skipped with a warning. A non-numeric entry rejects the whole spec.
pub fn parse_ports(spec: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for part in spec.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if let Some((start, end)) = part.split_once('-') {
            let s: u32 = start.trim().parse().map_err(|_| anyhow!("invalid port range: {}", part))?;
            let e: u32 = end.trim().parse().map_err(|_| anyhow!("invalid port range: {}", part))?;
            if s == 0 || e > 65535 || s > e {
                warn!(range = part, "invalid port range ignored");
                continue;
            }
            ports.extend((s..=e).map(|p| p as u16));
        } else {
            let p: u32 = part.parse().map_err(|_| anyhow!("invalid port: {}", part))?;
            if p == 0 || p > 65535 {
                warn!(port = part, "invalid port number ignored");
                continue;
            }
            ports.push(p as u16);
        }
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

/// Ascending, comma-joined port list; empty string when nothing is open.
pub fn format_ports(open: &[u16]) -> String {
    let mut sorted = open.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
}

/// Limits for one host's sub-scan.
#[derive(Debug, Clone, Copy)]
pub struct ProbeLimits {
    pub timeout_per_port: Duration,
    /// Upper bound on simultaneous connection attempts; clamped to at least 1.
    pub parallelism: usize,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for ProbeLimits {
    fn default() -> Self {
        ProbeLimits {
            timeout_per_port: Duration::from_millis(500),
            parallelism: 20,
            retries: 0,
            retry_delay: Duration::from_millis(50),
        }
    }
}

async fn port_is_open(addr: SocketAddr, limits: ProbeLimits) -> bool {
    let mut attempts = 0;
    loop {
        match timeout(limits.timeout_per_port, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => return true,
            Ok(Err(e)) => debug!(%addr, error = %e, "port closed"),
            Err(_) => debug!(%addr, "port timed out"),
        }
        attempts += 1;
        if attempts > limits.retries {
            return false;
        }
        let base = limits.retry_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempts.min(6))); // cap growth
        let jitter = thread_rng().gen_range(0..(exp / 4 + 1));
        tokio::time::sleep(Duration::from_millis(exp + jitter)).await;
    }
}

/// Run `check` for every port with at most `max(1, parallelism)` checks in
/// flight, and collect the ports it accepted, sorted ascending.
async fn bounded_check<F, Fut>(ports: &[u16], parallelism: usize, check: F) -> Vec<u16>
where
    F: Fn(u16) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(parallelism.max(1)));
    let check = Arc::new(check);
    let (tx, mut rx) = mpsc::channel::<u16>(ports.len().max(1));

    for &port in ports {
        let tx = tx.clone();
        let sem = sem.clone();
        let check = check.clone();
        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire_owned().await else { return; };
            if check(port).await {
                let _ = tx.send(port).await;
            }
        });
    }
    drop(tx);

    let mut open = Vec::new();
    while let Some(p) = rx.recv().await {
        open.push(p);
    }
    open.sort_unstable();
    open
}

/// Try every port concurrently (at most `limits.parallelism` at once) and
/// return the open ones, sorted ascending. Failures of any kind count as closed.
pub async fn probe_open_ports(ip: IpAddr, ports: &[u16], limits: ProbeLimits) -> Vec<u16> {
    bounded_check(ports, limits.parallelism, move |port| port_is_open(SocketAddr::new(ip, port), limits)).await
}

/// [`probe_open_ports`] serialized the way the inventory stores it.
pub async fn open_ports_summary(ip: IpAddr, ports: &[u16], limits: ProbeLimits) -> String {
    format_ports(&probe_open_ports(ip, ports, limits).await)
}
