//! Reconciliation of a discovery pass against the stored host inventory.

mod engine;
mod report;
mod retention;
mod transition;

pub use engine::{HostProbe, Plan, Reconciler};
pub use report::{ReportEntry, RunCounts, RunReport, Seen};
pub use retention::{purge_older_than, retention_days};
pub use transition::{transition, Action, Transition, Trigger};
