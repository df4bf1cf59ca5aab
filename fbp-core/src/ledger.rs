//! Component state ledger and quiescence detection
//!
//! Every component reports its lifecycle state into a shared `Ledger` as
//! it moves between activity and suspension. The scheduler watches the
//! ledger for quiescence — every component parked with nothing left to
//! feed it — and distinguishes clean completion from deadlock based on
//! whether all components actually reached `Terminated`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Lifecycle state of a single component, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
    /// Running user logic, not blocked on a port.
    Active,
    /// Blocked in `InputPort::receive` waiting for a packet.
    SuspendedReceive,
    /// Blocked in `Connection::send` waiting for room.
    SuspendedSend,
    /// Finished normally.
    Terminated,
    /// Finished via panic or returned error.
    Failed,
}

impl ComponentState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::SuspendedReceive | Self::SuspendedSend)
    }
}

/// Shared record of every component's current state, with a condvar that
/// wakes waiters whenever any entry changes. Each entry also carries the
/// `Instant` its state last changed, so the scheduler can tell how long a
/// component has been parked for the `suspension_warn_after` diagnostic.
pub struct Ledger {
    state: Mutex<HashMap<String, (ComponentState, Instant)>>,
    changed: Condvar,
}

impl Ledger {
    #[must_use]
    pub fn new(component_names: impl IntoIterator<Item = String>) -> Self {
        let now = Instant::now();
        let state = component_names
            .into_iter()
            .map(|name| (name, (ComponentState::Active, now)))
            .collect();
        Self {
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    /// Update a component's state and wake anyone waiting on a change.
    pub fn set_state(&self, component: &str, state: ComponentState) {
        let mut guard = self.state.lock();
        guard.insert(component.to_string(), (state, Instant::now()));
        drop(guard);
        self.changed.notify_all();
        tracing::debug!(component, ?state, "component state changed");
    }

    #[must_use]
    pub fn get_state(&self, component: &str) -> Option<ComponentState> {
        self.state.lock().get(component).map(|(state, _)| *state)
    }

    /// True when every non-terminal component is suspended (receive or
    /// send). Does not by itself distinguish clean finish from deadlock —
    /// callers combine this with [`Ledger::all_terminal`] and drained-
    /// connection checks to do that.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        let guard = self.state.lock();
        guard
            .values()
            .all(|(state, _)| state.is_terminal() || state.is_suspended())
    }

    #[must_use]
    pub fn all_terminal(&self) -> bool {
        let guard = self.state.lock();
        guard.values().all(|(state, _)| state.is_terminal())
    }

    /// Names of components that are suspended but not terminal, i.e. the
    /// deadlock participants to report if quiescence is reached without
    /// everyone terminating.
    #[must_use]
    pub fn suspended_participants(&self) -> Vec<String> {
        let guard = self.state.lock();
        guard
            .iter()
            .filter(|(_, (state, _))| state.is_suspended())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// How long each currently-suspended component has held that state,
    /// keyed by name. Used by the scheduler's watchdog to log a `warn`
    /// once a component has sat in `SuspendedSend`/`SuspendedReceive`
    /// longer than `suspension_warn_after` — a diagnostic aid, not a
    /// timeout; the component is left alone either way.
    #[must_use]
    pub fn suspended_durations(&self) -> Vec<(String, Duration)> {
        let guard = self.state.lock();
        let now = Instant::now();
        guard
            .iter()
            .filter(|(_, (state, _))| state.is_suspended())
            .map(|(name, (_, since))| (name.clone(), now.saturating_duration_since(*since)))
            .collect()
    }

    /// Block until the ledger changes, or `timeout` elapses. Used by the
    /// scheduler's watchdog loop instead of busy-polling.
    pub fn wait_for_change(&self, timeout: Duration) {
        let mut guard = self.state.lock();
        self.changed.wait_for(&mut guard, timeout);
    }
}
