use anyhow::Result;
use time::OffsetDateTime;

use crate::model::{MutationBatch, Snapshot};

/// Transactional inventory backend used by the reconciliation engine.
///
/// Implementations must make [`InventoryStore::apply`] all-or-nothing: on
/// error nothing from the batch may remain visible.
pub trait InventoryStore {
    /// Read every current host row.
    fn load_hosts(&self) -> Result<Snapshot>;

    /// Write a whole reconciliation batch in one transaction.
    fn apply(&mut self, batch: &MutationBatch) -> Result<()>;

    /// Delete history rows whose event time is strictly before `cutoff`.
    /// Returns the number of rows removed.
    fn purge_history_before(&mut self, cutoff: OffsetDateTime) -> Result<usize>;
}
