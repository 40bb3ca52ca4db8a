use anyhow::Result;
use lanwatch_core::InventoryStore;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

const SECONDS_PER_DAY: i64 = 86_400;

/// A retention horizon of `days` days, saturating instead of overflowing.
pub fn retention_days(days: i64) -> Duration {
    Duration::seconds(days.saturating_mul(SECONDS_PER_DAY))
}

/// Delete history events strictly older than `now - horizon`.
/// A zero or negative horizon disables purging and returns 0, as does a
/// horizon reaching back before the earliest representable date.
pub fn purge_older_than<S: InventoryStore + ?Sized>(
    store: &mut S,
    horizon: Duration,
    now: OffsetDateTime,
) -> Result<usize> {
    if horizon <= Duration::ZERO {
        debug!(%horizon, "history retention disabled");
        return Ok(0);
    }
    let Some(cutoff) = now.checked_sub(horizon) else {
        debug!(%horizon, "retention horizon predates every representable event, nothing to purge");
        return Ok(0);
    };
    let removed = store.purge_history_before(cutoff)?;
    info!(removed, %cutoff, "purged old history events");
    Ok(removed)
}
