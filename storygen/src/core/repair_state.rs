//! State machine for the document repair loop.
//!
//! ```text
//! Generating{a} --Generated--------> Validating{a}
//! Generating{a} --TransportFailed--> Generating{a+1} | Exhausted
//! Validating{a} --Validated--------> Accepted{a}
//! Validating{a} --Rejected---------> Repairing{a}    | Exhausted
//! Repairing{a}  --RepairPrompted---> Generating{a+1}
//! ```
//!
//! `a` is the zero-based attempt index. A failure on the last attempt goes
//! straight to `Exhausted`; no repair prompt is built that nobody would send.

/// Phase of the document repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairPhase {
    Generating { attempt: u32 },
    Validating { attempt: u32 },
    Repairing { attempt: u32 },
    Accepted { attempt: u32 },
    /// Terminal failure after `attempts` generation attempts.
    Exhausted { attempts: u32 },
}

/// Input driving a phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairEvent {
    /// The generator returned raw text.
    Generated,
    /// The generator call itself failed.
    TransportFailed,
    /// The raw text was accepted as a story document.
    Validated,
    /// The raw text failed document or root validation.
    Rejected,
    /// A repair prompt for the next attempt is ready.
    RepairPrompted,
}

impl RepairPhase {
    pub fn start() -> Self {
        Self::Generating { attempt: 0 }
    }

    /// Apply `event` under an attempt budget of `budget`.
    ///
    /// Returns `None` when the event is not valid in the current phase.
    pub fn next(self, event: RepairEvent, budget: u32) -> Option<Self> {
        let after_failure = |attempt: u32| {
            let used = attempt + 1;
            if used >= budget {
                Self::Exhausted { attempts: used }
            } else {
                Self::Generating { attempt: used }
            }
        };

        match (self, event) {
            (Self::Generating { attempt }, RepairEvent::Generated) => {
                Some(Self::Validating { attempt })
            }
            (Self::Generating { attempt }, RepairEvent::TransportFailed) => {
                Some(after_failure(attempt))
            }
            (Self::Validating { attempt }, RepairEvent::Validated) => {
                Some(Self::Accepted { attempt })
            }
            (Self::Validating { attempt }, RepairEvent::Rejected) => {
                if attempt + 1 >= budget {
                    Some(Self::Exhausted {
                        attempts: attempt + 1,
                    })
                } else {
                    Some(Self::Repairing { attempt })
                }
            }
            (Self::Repairing { attempt }, RepairEvent::RepairPrompted) => {
                Some(after_failure(attempt))
            }
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::Exhausted { .. })
    }
}
