//! Bounded repair loop
//!
//! `max_retries` counts corrections after the first proposal, so the model is
//! asked at most `max_retries + 1` times.

use tracing::{debug, warn};

use crate::error::AttemptFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the model's proposal for `attempt`
    Proposing { attempt: u32 },
    Validating { attempt: u32, raw: String },
    /// `last` failed; the next proposal carries its feedback
    Retrying { attempt: u32, last: AttemptFailure },
    Succeeded { attempt: u32, raw: String },
    Exhausted,
}

#[derive(Debug, Clone)]
pub enum Event {
    Proposed(String),
    Failed(AttemptFailure),
    Passed,
}

#[derive(Debug)]
pub struct RepairLoop {
    max_retries: u32,
    phase: Phase,
    failures: Vec<AttemptFailure>,
}

impl RepairLoop {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            phase: Phase::Proposing { attempt: 1 },
            failures: Vec::new(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Attempt number of the current phase, 0 once exhausted
    pub fn attempt(&self) -> u32 {
        match &self.phase {
            Phase::Proposing { attempt }
            | Phase::Validating { attempt, .. }
            | Phase::Retrying { attempt, .. }
            | Phase::Succeeded { attempt, .. } => *attempt,
            Phase::Exhausted => 0,
        }
    }

    pub fn failures(&self) -> &[AttemptFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<AttemptFailure> {
        self.failures
    }

    /// Advance the loop. An event that does not apply to the current phase is ignored.
    pub fn transition(&mut self, event: Event) -> &Phase {
        let next = match (&self.phase, event) {
            (Phase::Proposing { attempt }, Event::Proposed(raw)) => Some(Phase::Validating {
                attempt: *attempt,
                raw,
            }),
            (Phase::Retrying { attempt, .. }, Event::Proposed(raw)) => Some(Phase::Validating {
                attempt: attempt + 1,
                raw,
            }),
            (Phase::Validating { attempt, raw }, Event::Passed) => Some(Phase::Succeeded {
                attempt: *attempt,
                raw: raw.clone(),
            }),
            (Phase::Validating { attempt, .. }, Event::Failed(failure)) => {
                let attempt = *attempt;
                self.failures.push(failure.clone());
                if attempt > self.max_retries {
                    debug!(attempt, "Retry budget exhausted");
                    Some(Phase::Exhausted)
                } else {
                    Some(Phase::Retrying { attempt, last: failure })
                }
            }
            (phase, event) => {
                warn!(?phase, ?event, "Ignoring repair loop event");
                None
            }
        };

        if let Some(next) = next {
            self.phase = next;
        }
        &self.phase
    }
}
