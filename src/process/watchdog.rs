//! Watchdog transition table.
//!
//! The watchdog reacts to exactly two events:
//!
//! ```text
//! Tick(observed) ──► compare with last observation
//!                     ├─ unchanged            → nothing
//!                     └─ changed              → notify(observed)
//!                          ├─ Terminated      → restart if budget allows (budget -1)
//!                          │                    or log "no more attempts"
//!                          └─ Zombie          → reap
//! Cancel         ──► stopped (every later event is ignored)
//! ```
//!
//! `last` is updated on every tick. This module holds no timers and no OS
//! handles; the supervisor feeds it observations and executes the outcome.

use crate::process::types::{ProcessStatus, RestartBudget};

/// Input of the watchdog state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    Tick(ProcessStatus),
    Cancel,
}

/// What the restart policy decided for a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Nothing to decide on this tick
    Skip,
    /// One relaunch granted, budget already charged
    Relaunch,
    /// A relaunch is already queued; this termination rides along with it
    Coalesced,
    /// Budget exhausted, no further attempts
    Exhausted,
}

/// Actions the supervisor must carry out after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub observed: ProcessStatus,
    /// Set when `observed` differs from the previous observation
    pub notify: Option<ProcessStatus>,
    pub restart: RestartDecision,
    pub reap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Observed(TickOutcome),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    last: Option<ProcessStatus>,
    budget: RestartBudget,
    restart_pending: bool,
    cancelled: bool,
}

impl Watchdog {
    pub fn new(budget: RestartBudget) -> Self {
        Self {
            last: None,
            budget,
            restart_pending: false,
            cancelled: false,
        }
    }

    pub fn step(&mut self, event: WatchEvent) -> Transition {
        if self.cancelled {
            return Transition::Stopped;
        }

        let observed = match event {
            WatchEvent::Cancel => {
                self.cancelled = true;
                return Transition::Stopped;
            }
            WatchEvent::Tick(observed) => observed,
        };

        let changed = self.last != Some(observed);
        let mut outcome = TickOutcome {
            observed,
            notify: None,
            restart: RestartDecision::Skip,
            reap: false,
        };

        if changed {
            outcome.notify = Some(observed);

            match observed {
                ProcessStatus::Terminated => {
                    outcome.restart = if self.restart_pending {
                        RestartDecision::Coalesced
                    } else if self.budget.consume() {
                        self.restart_pending = true;
                        RestartDecision::Relaunch
                    } else {
                        RestartDecision::Exhausted
                    };
                }
                ProcessStatus::Zombie => outcome.reap = true,
                _ => {}
            }
        }

        self.last = Some(observed);
        Transition::Observed(outcome)
    }

    /// Called by the supervisor when it picks up the queued relaunch
    pub fn take_restart(&mut self) -> bool {
        std::mem::take(&mut self.restart_pending)
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn budget(&self) -> RestartBudget {
        self.budget
    }

}
