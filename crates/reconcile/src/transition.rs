use lanwatch_core::HostStatus;

/// What was learned about an address this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Answered the broadcast pass.
    Discovered,
    /// Missing from the broadcast pass but answered the reachability probe.
    ProbeConfirmedAlive,
    /// Missing from the broadcast pass and failed the reachability probe.
    ProbeConfirmedDead,
}

/// Persistence action implied by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    /// Rewrite engine-owned fields, only if something actually changed.
    Refresh,
    MarkOffline,
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: HostStatus,
    pub action: Action,
    /// Whether a history event `(address, next, now)` is appended.
    pub record_history: bool,
}

impl Transition {
    const fn new(next: HostStatus, action: Action, record_history: bool) -> Self {
        Transition { next, action, record_history }
    }
}

/// The host state machine: two states, three triggers, one action each.
///
/// Probe triggers never create a record; without a prior row they are a no-op.
pub fn transition(prior: Option<HostStatus>, trigger: Trigger) -> Transition {
    use HostStatus::{Offline, Online};
    match (prior, trigger) {
        (None, Trigger::Discovered) => Transition::new(Online, Action::Insert, true),
        (Some(Offline), Trigger::Discovered) => Transition::new(Online, Action::Refresh, true),
        (Some(Online), Trigger::Discovered) => Transition::new(Online, Action::Refresh, false),
        (Some(Online), Trigger::ProbeConfirmedAlive) => Transition::new(Online, Action::Keep, false),
        (Some(Online), Trigger::ProbeConfirmedDead) => Transition::new(Offline, Action::MarkOffline, true),
        (Some(Offline), _) => Transition::new(Offline, Action::Keep, false),
        (None, Trigger::ProbeConfirmedAlive) => Transition::new(Online, Action::Keep, false),
        (None, Trigger::ProbeConfirmedDead) => Transition::new(Offline, Action::Keep, false),
    }
}
