//! Caller-supplied protocol logic.

use thiserror::Error;

use crate::actor::{ActorId, DestroyReason};
use crate::error::DispatchOutcome;
use crate::value::Value;

/// A handler's rejection of an otherwise well-formed message. Does not
/// corrupt state-machine bookkeeping; surfaces to the peer as a
/// processing error and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("handler rejected `{message}`: {detail}")]
pub struct HandlerError {
    /// The rejected message.
    pub message: String,
    /// Handler-chosen description.
    pub detail: String,
}

impl HandlerError {
    /// Build a rejection.
    #[must_use]
    pub fn new(message: impl Into<String>, detail: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

/// Everything an endpoint asks of the embedding application.
///
/// `recv` is invoked once per incoming declared message, after state
/// validation and decoding; the allocation pair brackets each managed
/// actor's life. The remaining hooks have workable defaults and only
/// matter on toplevel endpoints.
pub trait EndpointHandlers {
    /// Handle one incoming message on `actor`. For blocking tiers the
    /// returned values become the reply payload, in declared order;
    /// non-blocking messages must return an empty vec.
    ///
    /// # Errors
    ///
    /// A [`HandlerError`] surfaces to the peer as a processing error.
    fn recv(
        &mut self,
        actor: ActorId,
        protocol: &str,
        message: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, HandlerError>;

    /// A constructor arrived: allocate application state for the new
    /// actor. Returning `false` fails the construction.
    fn alloc(&mut self, protocol: &str, id: ActorId) -> bool;

    /// Final release of application state for a destroyed actor.
    fn dealloc(&mut self, protocol: &str, id: ActorId);

    /// The actor is about to be destroyed; its managees are already
    /// gone, its identity is already unregistered.
    fn about_to_destroy(&mut self, _id: ActorId, _protocol: &str, _reason: DestroyReason) {}

    /// A message failed with the given verdict. Invoked on toplevel
    /// endpoints only.
    fn processing_error(&mut self, _outcome: DispatchOutcome, _message: &str) {}

    /// A blocking reply timed out; return `false` to give up. The
    /// default keeps waiting forever.
    fn should_continue_from_timeout(&mut self) -> bool {
        true
    }

    /// An outgoing blocking call is starting.
    fn entered_call(&mut self) {}

    /// The outgoing blocking call finished.
    fn exited_call(&mut self) {}
}
