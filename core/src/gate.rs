//! Interval gate for the port-probe sub-scan.
//!
//! The last-run timestamp lives in a one-line text file outside the database
//! so it survives store outages. The file is read once and written at most
//! once per run. Concurrent invocations are unsupported: there is no locking.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Seconds since the UNIX epoch, with sub-second precision.
pub fn unix_seconds(t: OffsetDateTime) -> f64 {
    t.unix_timestamp_nanos() as f64 / 1e9
}

/// True iff at least `interval` has passed since `last_run`.
/// A missing marker counts as the epoch, which always admits.
pub fn should_probe_ports(last_run: Option<f64>, interval: Duration, now: f64) -> bool {
    now - last_run.unwrap_or(0.0) >= interval.as_secs_f64()
}

/// The on-disk scan-state marker: a single floating-point UNIX timestamp.
#[derive(Debug, Clone)]
pub struct ScanStateMarker {
    path: PathBuf,
}

impl ScanStateMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ScanStateMarker { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, unreadable or corrupt content all read as "never scanned".
    pub fn read(&self) -> Option<f64> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read scan state marker, forcing port scan");
                return None;
            }
        };
        match raw.trim().parse::<f64>() {
            Ok(ts) if ts.is_finite() => Some(ts),
            _ => {
                warn!(path = %self.path.display(), content = raw.trim(), "corrupt scan state marker, forcing port scan");
                None
            }
        }
    }

    /// Replace the marker atomically (temp file in the same directory, then rename).
    pub fn write(&self, ts: f64) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        write!(tmp, "{}", ts)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Decides whether this run performs the port probe, stamping the marker on admission.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    marker: ScanStateMarker,
    interval: Duration,
}

impl IntervalGate {
    pub fn new(marker: ScanStateMarker, interval: Duration) -> Self {
        IntervalGate { marker, interval }
    }

    /// Admit the probe if the interval has elapsed. The new timestamp is
    /// persisted before returning, so before any probing starts.
    pub fn admit(&self, now: OffsetDateTime) -> bool {
        let now_ts = unix_seconds(now);
        let last = self.marker.read();
        let elapsed = now_ts - last.unwrap_or(0.0);
        if !should_probe_ports(last, self.interval, now_ts) {
            info!(elapsed_s = elapsed as i64, interval_s = self.interval.as_secs(), "port scan interval not elapsed, skipping");
            return false;
        }
        info!(elapsed_s = elapsed as i64, interval_s = self.interval.as_secs(), "port scan interval elapsed, enabling scan");
        self.stamp(now_ts);
        true
    }

    /// Admit unconditionally (operator override); still stamps the marker.
    pub fn force(&self, now: OffsetDateTime) -> bool {
        self.stamp(unix_seconds(now));
        true
    }

    // A failed write still lets this run probe; the next run may probe early.
    fn stamp(&self, now_ts: f64) {
        if let Err(e) = self.marker.write(now_ts) {
            error!(path = %self.marker.path().display(), error = %e, "failed to update scan state marker");
        }
    }
}
