//! Declared message-ordering rules.
//!
//! A protocol's legal message orderings are written as transition
//! statements: from a named state, a set of triggers each lead to a
//! destination state. Four states are built in and never declared:
//! `Null` (initial), `Start` (entered on registration), `Error`
//! (entered on a contract violation) and `Dead` (terminal).

use serde::{Deserialize, Serialize};

/// A protocol state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum State {
    /// Initial state of an instance that has not been registered yet.
    /// Accepts only a declared toplevel delete.
    Null,
    /// State entered when an actor is registered.
    Start,
    /// Sink state entered on a rejected transition. Accepts nothing.
    Error,
    /// Terminal state after destruction. Accepts nothing; observing a
    /// trigger here means a destroyed actor is still being driven.
    Dead,
    /// A state declared by the protocol.
    Named(String),
}

impl State {
    /// Convenience constructor for a declared state.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        State::Named(name.into())
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Null => write!(f, "Null"),
            State::Start => write!(f, "Start"),
            State::Error => write!(f, "Error"),
            State::Dead => write!(f, "Dead"),
            State::Named(n) => write!(f, "{n}"),
        }
    }
}

/// The declared direction of a trigger, expressed from the parent
/// side's point of view. Each endpoint interprets it relative to its
/// own role when the state machine is compiled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Action {
    /// The parent side transmits this message.
    Send,
    /// The parent side receives this message.
    Recv,
}

impl Action {
    /// The complementary action.
    #[must_use]
    pub fn flip(self) -> Action {
        match self {
            Action::Send => Action::Recv,
            Action::Recv => Action::Send,
        }
    }
}

/// An (action, message) pair guarding a transition edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Declared direction of the guarded message.
    pub action: Action,
    /// Name of the guarded message within the protocol.
    pub message: String,
}

impl Trigger {
    /// Build a trigger for a parent-side send.
    #[must_use]
    pub fn send(message: impl Into<String>) -> Self {
        Trigger {
            action: Action::Send,
            message: message.into(),
        }
    }

    /// Build a trigger for a parent-side receive.
    #[must_use]
    pub fn recv(message: impl Into<String>) -> Self {
        Trigger {
            action: Action::Recv,
            message: message.into(),
        }
    }
}

/// A single trigger → destination edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEdge {
    /// The guard.
    pub trigger: Trigger,
    /// State entered when the guard matches.
    pub dest: State,
}

/// All edges declared from one source state.
///
/// Edge order is declaration order; when two edges of one statement
/// overlap, the first match wins. The model preserves the order and
/// does not attempt to resolve the ambiguity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStmt {
    /// Source state.
    pub from: State,
    /// Ordered outgoing edges.
    pub edges: Vec<TransitionEdge>,
}

impl TransitionStmt {
    /// Build a transition statement from a source state and its edges.
    #[must_use]
    pub fn new(from: State, edges: Vec<TransitionEdge>) -> Self {
        TransitionStmt { from, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_flip_is_involutive() {
        assert_eq!(Action::Send.flip(), Action::Recv);
        assert_eq!(Action::Send.flip().flip(), Action::Send);
    }

    #[test]
    fn state_display_uses_declared_name() {
        assert_eq!(State::named("Running").to_string(), "Running");
        assert_eq!(State::Dead.to_string(), "Dead");
    }
}
