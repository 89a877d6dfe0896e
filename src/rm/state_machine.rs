use super::errors::{RmFault, RmResult};
use super::events::SequenceEvent;
use super::states::SequenceState;
use tracing::debug;

/// Transition table for one sequence
///
/// The machine holds no storage of its own: callers load the state from the
/// sequence record, apply an event and write the result back inside the same
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequenceStateMachine {
    state: SequenceState,
}

impl SequenceStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SequenceState) -> Self {
        Self { state }
    }

    pub fn current_state(&self) -> SequenceState {
        self.state
    }

    /// Apply `event` for the sequence `identifier`, returning the new state
    pub fn transition(&mut self, identifier: &str, event: &SequenceEvent) -> RmResult<SequenceState> {
        let target = Self::determine_target_state(identifier, self.state, event)?;
        if target != self.state {
            debug!(
                sequence_id = %identifier,
                from = %self.state,
                to = %target,
                event = event.event_type(),
                "Sequence state transition"
            );
        }
        self.state = target;
        Ok(target)
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        identifier: &str,
        current: SequenceState,
        event: &SequenceEvent,
    ) -> RmResult<SequenceState> {
        use SequenceEvent as E;
        use SequenceState as S;

        let target = match (current, event) {
            // Creation
            (S::Initial, E::CreateRequested) => S::Creating,
            (S::Initial, E::CreateAccepted) => S::Established,
            (S::Creating, E::CreateAccepted) => S::Established,
            (S::Initial | S::Creating, E::CreateRefused(_)) => S::Terminated,

            // Traffic; messages added while creating are queued
            (S::Initial | S::Creating | S::Established, E::ApplicationMessage) => current,
            (S::Established | S::Terminating, E::Acknowledgement) => current,

            // Termination
            (S::Established, E::TerminateRequested) => S::Terminating,
            (S::Terminating, E::TerminateRequested) => S::Terminating,
            (S::Established | S::Terminating, E::TerminateCompleted) => S::Terminated,
            (S::Initial | S::Creating | S::Established | S::Terminating, E::Timeout) => {
                S::Terminated
            }
            (S::Initial | S::Creating | S::Established | S::Terminating, E::Fail(_)) => {
                S::Terminated
            }

            // Faults
            (S::Terminating, E::ApplicationMessage) => {
                return Err(RmFault::SequenceTerminating {
                    identifier: identifier.to_string(),
                })
            }
            (S::Terminated, _) => {
                return Err(RmFault::SequenceTerminated {
                    identifier: identifier.to_string(),
                })
            }
            (from, event) => {
                return Err(RmFault::InvalidTransition {
                    from: from.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }
}
