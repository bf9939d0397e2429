use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_types::{Action, MessageRole, Protocol, Side, State};

/// Violations detected while applying a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// No declared edge matches the trigger; the actor moves to the
    /// Error state and the message must not proceed.
    #[error("protocol `{protocol}`: no transition from `{state}` on {action:?} `{message}`")]
    Rejected {
        /// The protocol being validated.
        protocol: String,
        /// The state the trigger arrived in.
        state: State,
        /// The triggering action.
        action: Action,
        /// The triggering message name.
        message: String,
    },
    /// A trigger arrived for an actor already in the Dead state. The
    /// bookkeeping no longer matches reality; the endpoint must treat
    /// this as unrecoverable.
    #[error("protocol `{protocol}`: trigger `{message}` on a dead actor")]
    CorruptedState {
        /// The protocol being validated.
        protocol: String,
        /// The triggering message name.
        message: String,
    },
}

/// A compiled transition validator for one protocol on one side.
///
/// Stateless protocols (no declared transitions) compile to a trivial
/// machine that admits every trigger from the Null state; the
/// destructor still moves it to Dead so post-mortem traffic is caught.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachine {
    protocol: String,
    side: Side,
    stateful: bool,
    toplevel: bool,
    destructor: Option<String>,
    // Keyed on (source, side-relative action, message); first
    // declaration wins, later duplicates are never inserted.
    edges: BTreeMap<(State, Action, String), State>,
}

impl StateMachine {
    /// Compile `protocol`'s transitions for the endpoint on `side`.
    #[must_use]
    pub fn compile(protocol: &Protocol, side: Side) -> StateMachine {
        let mut edges = BTreeMap::new();
        for stmt in &protocol.transitions {
            for edge in &stmt.edges {
                let action = match side {
                    Side::Parent => edge.trigger.action,
                    Side::Child => edge.trigger.action.flip(),
                };
                let key = (stmt.from.clone(), action, edge.trigger.message.clone());
                edges.entry(key).or_insert_with(|| edge.dest.clone());
            }
        }
        let destructor = protocol
            .messages
            .iter()
            .find(|m| matches!(m.role, MessageRole::Destructor))
            .map(|m| m.name.clone());
        StateMachine {
            protocol: protocol.name.clone(),
            side,
            stateful: !protocol.transitions.is_empty(),
            toplevel: protocol.toplevel,
            destructor,
            edges,
        }
    }

    /// The protocol this machine validates.
    #[must_use]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The side this machine was compiled for.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// The state a fresh actor of this protocol starts in.
    #[must_use]
    pub fn initial(&self) -> State {
        if self.stateful {
            State::Start
        } else {
            State::Null
        }
    }

    /// Validate sending `message` out of `from`.
    ///
    /// # Errors
    ///
    /// See [`Self::apply`].
    pub fn on_send(&self, from: &State, message: &str) -> Result<State, TransitionError> {
        self.apply(from, Action::Send, message)
    }

    /// Validate receiving `message` in `from`.
    ///
    /// # Errors
    ///
    /// See [`Self::apply`].
    pub fn on_recv(&self, from: &State, message: &str) -> Result<State, TransitionError> {
        self.apply(from, Action::Recv, message)
    }

    /// Apply a trigger and return the successor state.
    ///
    /// # Errors
    ///
    /// [`TransitionError::CorruptedState`] for any trigger from Dead;
    /// [`TransitionError::Rejected`] when no edge matches, in which
    /// case the caller must record the Error state for the actor.
    pub fn apply(
        &self,
        from: &State,
        action: Action,
        message: &str,
    ) -> Result<State, TransitionError> {
        match from {
            State::Dead => {
                return Err(TransitionError::CorruptedState {
                    protocol: self.protocol.clone(),
                    message: message.to_string(),
                })
            }
            State::Error => return self.reject(from, action, message),
            State::Null => {
                if !self.stateful {
                    // No contract declared; everything is admitted,
                    // but destruction is still terminal.
                    if self.destructor.as_deref() == Some(message) {
                        return Ok(State::Dead);
                    }
                    return Ok(State::Null);
                }
                // A stateful machine in Null admits only the toplevel
                // delete.
                if self.toplevel && self.destructor.as_deref() == Some(message) {
                    return Ok(State::Dead);
                }
                return self.reject(from, action, message);
            }
            State::Start | State::Named(_) => {}
        }
        let key = (from.clone(), action, message.to_string());
        match self.edges.get(&key) {
            Some(dest) => Ok(dest.clone()),
            None => {
                if self.destructor.as_deref() == Some(message) {
                    // Destruction is always a legal exit unless an
                    // edge overrides it.
                    return Ok(State::Dead);
                }
                self.reject(from, action, message)
            }
        }
    }

    fn reject(
        &self,
        from: &State,
        action: Action,
        message: &str,
    ) -> Result<State, TransitionError> {
        Err(TransitionError::Rejected {
            protocol: self.protocol.clone(),
            state: from.clone(),
            action,
            message: message.to_string(),
        })
    }
}
