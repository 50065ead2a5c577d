//! Call state machine: the transition table and its validity rules.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of a call.
///
/// `Ended` is terminal. `Dropped` denotes temporary connectivity loss,
/// not termination, so a dropped call still counts as live.
#[derive(Debug, Clone, Serialize, Default)]
pub enum CallState {
    /// Outbound call: created locally, invite in flight.
    #[default]
    New,
    /// Ringing on whichever side did not originate the call.
    Ringing { since: DateTime<Utc> },
    /// Answer in progress: media negotiation and gateway round-trip.
    Connecting { since: DateTime<Utc> },
    /// Media flowing.
    Active { connected_at: DateTime<Utc> },
    /// On hold, confirmed by the gateway.
    Held {
        held_at: DateTime<Utc>,
        connected_at: DateTime<Utc>,
    },
    /// Connectivity lost while the call was live; reattachable.
    Dropped { dropped_at: DateTime<Utc> },
    /// Terminal.
    Ended {
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
}

impl CallState {
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended { .. })
    }

    /// The one liveness predicate shared by every registry accessor.
    /// Dropped counts as live because it is a transient condition.
    pub fn is_live(&self) -> bool {
        !self.is_ended()
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    /// Whether a connectivity loss should move this call to `Dropped`.
    pub fn can_drop(&self) -> bool {
        !self.is_ended() && !self.is_dropped()
    }

    fn connected_since(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active { connected_at } | Self::Held { connected_at, .. } => {
                Some(*connected_at)
            }
            _ => None,
        }
    }

    /// Applies a transition, returning the resulting state or an error
    /// when the trigger is not valid from the current state.
    pub fn apply(&self, transition: CallTransition) -> Result<CallState, InvalidTransition> {
        let next = match (self, transition) {
            (Self::New, CallTransition::RingingReceived) => Self::Ringing { since: Utc::now() },
            (Self::Ringing { .. }, CallTransition::AnswerStarted) => {
                Self::Connecting { since: Utc::now() }
            }
            (Self::Connecting { .. }, CallTransition::AnswerCompleted) => Self::Active {
                connected_at: Utc::now(),
            },
            (Self::Active { connected_at }, CallTransition::HoldConfirmed) => Self::Held {
                held_at: Utc::now(),
                connected_at: *connected_at,
            },
            (Self::Held { connected_at, .. }, CallTransition::UnholdConfirmed) => Self::Active {
                connected_at: *connected_at,
            },
            (Self::Dropped { .. }, CallTransition::Reattached) => {
                Self::Connecting { since: Utc::now() }
            }
            (current, CallTransition::Terminated) if !current.is_ended() => {
                let duration_secs = current
                    .connected_since()
                    .map(|t| Utc::now().signed_duration_since(t).num_seconds());
                Self::Ended {
                    ended_at: Utc::now(),
                    duration_secs,
                }
            }
            (current, CallTransition::ConnectionLost) if current.can_drop() => Self::Dropped {
                dropped_at: Utc::now(),
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{transition:?}"),
                });
            }
        };
        Ok(next)
    }
}

/// Triggers that drive the state machine.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    /// Outbound progress event: the remote side started ringing.
    RingingReceived,
    /// A local or remote answer began.
    AnswerStarted,
    /// Local confirmation was sent, or the remote answer arrived.
    AnswerCompleted,
    HoldConfirmed,
    UnholdConfirmed,
    /// Remote bye or local hangup.
    Terminated,
    /// Network loss while the call was live.
    ConnectionLost,
    /// Reconnection reattached the call.
    Reattached,
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance(state: CallState, transitions: &[CallTransition]) -> CallState {
        transitions
            .iter()
            .fold(state, |s, t| s.apply(*t).unwrap())
    }

    /// Flow: New → Ringing → Connecting → Active → Held → Active → Ended
    #[test]
    fn full_call_flow_with_hold() {
        let state = advance(
            CallState::New,
            &[
                CallTransition::RingingReceived,
                CallTransition::AnswerStarted,
                CallTransition::AnswerCompleted,
            ],
        );
        assert!(state.is_active());

        let held = state.apply(CallTransition::HoldConfirmed).unwrap();
        assert!(matches!(held, CallState::Held { .. }));

        let resumed = held.apply(CallTransition::UnholdConfirmed).unwrap();
        assert!(resumed.is_active());

        let ended = resumed.apply(CallTransition::Terminated).unwrap();
        assert!(ended.is_ended());
        if let CallState::Ended { duration_secs, .. } = ended {
            assert!(duration_secs.is_some());
        }
    }

    /// Hold preserves the original connect time so call duration spans
    /// the hold period.
    #[test]
    fn unhold_preserves_connected_at() {
        let active = advance(
            CallState::New,
            &[
                CallTransition::RingingReceived,
                CallTransition::AnswerStarted,
                CallTransition::AnswerCompleted,
            ],
        );
        let connected_at = match &active {
            CallState::Active { connected_at } => *connected_at,
            other => panic!("expected active, got {other:?}"),
        };
        let resumed = advance(
            active,
            &[CallTransition::HoldConfirmed, CallTransition::UnholdConfirmed],
        );
        match resumed {
            CallState::Active { connected_at: after } => assert_eq!(after, connected_at),
            other => panic!("expected active, got {other:?}"),
        }
    }

    #[test]
    fn terminated_is_valid_from_every_non_ended_state() {
        let ringing = CallState::New.apply(CallTransition::RingingReceived).unwrap();
        for state in [
            CallState::New,
            ringing.clone(),
            ringing.apply(CallTransition::AnswerStarted).unwrap(),
            CallState::Dropped {
                dropped_at: Utc::now(),
            },
        ] {
            assert!(state.apply(CallTransition::Terminated).unwrap().is_ended());
        }
    }

    #[test]
    fn ended_rejects_all_transitions() {
        let ended = CallState::New.apply(CallTransition::Terminated).unwrap();
        assert!(ended.apply(CallTransition::Terminated).is_err());
        assert!(ended.apply(CallTransition::ConnectionLost).is_err());
        assert!(ended.apply(CallTransition::AnswerStarted).is_err());
        assert!(ended.apply(CallTransition::Reattached).is_err());
    }

    /// Flow: Active → Dropped → Connecting → Active (reattachment).
    #[test]
    fn drop_and_reattach_flow() {
        let active = advance(
            CallState::New,
            &[
                CallTransition::RingingReceived,
                CallTransition::AnswerStarted,
                CallTransition::AnswerCompleted,
            ],
        );
        let dropped = active.apply(CallTransition::ConnectionLost).unwrap();
        assert!(dropped.is_dropped());
        assert!(dropped.is_live(), "dropped counts as live");

        // A second loss signal is not a valid trigger on a dropped call.
        assert!(dropped.apply(CallTransition::ConnectionLost).is_err());

        let reattaching = dropped.apply(CallTransition::Reattached).unwrap();
        assert!(matches!(reattaching, CallState::Connecting { .. }));
        assert!(
            reattaching
                .apply(CallTransition::AnswerCompleted)
                .unwrap()
                .is_active()
        );
    }

    #[test]
    fn invalid_triggers_are_rejected() {
        assert!(CallState::New.apply(CallTransition::AnswerCompleted).is_err());
        assert!(CallState::New.apply(CallTransition::HoldConfirmed).is_err());
        let ringing = CallState::New.apply(CallTransition::RingingReceived).unwrap();
        assert!(ringing.apply(CallTransition::UnholdConfirmed).is_err());
        assert!(ringing.apply(CallTransition::Reattached).is_err());
    }
}
