//! Fallback chain as an explicit state machine.
//!
//! ```text
//! SELECTED_PROMPT ─▶ PRIMARY_ATTEMPT ─▶ SUCCESS
//!        │                 │
//!        │ (unavailable)   │ (failed after retry budget)
//!        ▼                 ▼
//!        └──────▶ FALLBACK_ATTEMPT ─▶ SUCCESS | TERMINAL_FAILURE
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    SelectedPrompt,
    PrimaryAttempt,
    FallbackAttempt,
    Success,
    TerminalFailure,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::TerminalFailure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Capability probes ran; records whether each strategy can run.
    Probed { primary: bool, fallback: bool },
    Succeeded,
    /// The current attempt failed and its retry budget is spent.
    Exhausted,
}

/// Pure transition function. Terminal states absorb every event; an event
/// that makes no sense in a state leaves it unchanged.
pub fn transition(state: AttemptState, event: Event) -> AttemptState {
    use AttemptState::*;
    match (state, event) {
        (SelectedPrompt, Event::Probed { primary: true, .. }) => PrimaryAttempt,
        (SelectedPrompt, Event::Probed { primary: false, fallback: true }) => FallbackAttempt,
        (SelectedPrompt, Event::Probed { primary: false, fallback: false }) => TerminalFailure,
        (PrimaryAttempt | FallbackAttempt, Event::Succeeded) => Success,
        (PrimaryAttempt, Event::Exhausted) => FallbackAttempt,
        (FallbackAttempt, Event::Exhausted) => TerminalFailure,
        (current, _) => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: &[Event]) -> AttemptState {
        events
            .iter()
            .fold(AttemptState::SelectedPrompt, |state, event| transition(state, *event))
    }

    #[test]
    fn primary_success() {
        let state = run(&[Event::Probed { primary: true, fallback: true }, Event::Succeeded]);
        assert_eq!(state, AttemptState::Success);
    }

    #[test]
    fn unsupported_primary_goes_straight_to_fallback() {
        let state = transition(
            AttemptState::SelectedPrompt,
            Event::Probed { primary: false, fallback: true },
        );
        assert_eq!(state, AttemptState::FallbackAttempt);
    }

    #[test]
    fn primary_failure_then_fallback_failure_is_terminal() {
        let state = run(&[
            Event::Probed { primary: true, fallback: true },
            Event::Exhausted,
            Event::Exhausted,
        ]);
        assert_eq!(state, AttemptState::TerminalFailure);
    }

    #[test]
    fn nothing_available_is_terminal() {
        let state = run(&[Event::Probed { primary: false, fallback: false }]);
        assert_eq!(state, AttemptState::TerminalFailure);
    }

    #[test]
    fn terminal_states_absorb() {
        assert_eq!(transition(AttemptState::Success, Event::Exhausted), AttemptState::Success);
        assert_eq!(
            transition(AttemptState::TerminalFailure, Event::Succeeded),
            AttemptState::TerminalFailure
        );
        assert!(AttemptState::Success.is_terminal());
        assert!(!AttemptState::FallbackAttempt.is_terminal());
    }

    #[test]
    fn out_of_order_event_is_ignored() {
        assert_eq!(
            transition(AttemptState::SelectedPrompt, Event::Succeeded),
            AttemptState::SelectedPrompt
        );
    }
}
