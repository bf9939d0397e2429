//! The transport seam.
//!
//! The runtime never touches sockets or pipes; it hands fully encoded
//! [`WireMessage`]s to a [`Transport`] and gets reply messages back.
//! One send primitive exists per semantics tier. Blocking primitives
//! take a `keep_waiting` callback the transport consults whenever its
//! reply timeout elapses; returning `false` converts the wait into a
//! [`TransportError::ReplyTimeout`].

use thiserror::Error;

use crate::wire::{ScalarCodec, WireMessage};

/// Transport-level failures. These are surfaced to the fatal-error
/// path, never swallowed; reconnection policy belongs to the
/// transport, not this layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The message could not be transmitted.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The peer endpoint is gone.
    #[error("peer disconnected")]
    PeerGone,
    /// The reply wait was abandoned by policy.
    #[error("timed out waiting for a reply")]
    ReplyTimeout,
    /// The peer reported an unrecoverable failure while processing.
    #[error("peer failed processing: {0}")]
    Remote(String),
}

/// One concrete way of moving messages between two endpoints.
pub trait Transport {
    /// The scalar encoding this transport speaks.
    fn scalar_codec(&self) -> &dyn ScalarCodec;

    /// Transmit without waiting.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`]; the endpoint escalates it to fatal.
    fn send_async(&mut self, msg: WireMessage) -> Result<(), TransportError>;

    /// Transmit and block for the reply.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`], including
    /// [`TransportError::ReplyTimeout`] once `keep_waiting` says stop.
    fn send_sync(
        &mut self,
        msg: WireMessage,
        keep_waiting: &mut dyn FnMut() -> bool,
    ) -> Result<WireMessage, TransportError>;

    /// Transmit and block for the reply, allowing bounded reentrant
    /// processing of incoming calls while waiting.
    ///
    /// # Errors
    ///
    /// As [`Transport::send_sync`].
    fn send_rpc(
        &mut self,
        msg: WireMessage,
        keep_waiting: &mut dyn FnMut() -> bool,
    ) -> Result<WireMessage, TransportError>;

    /// The endpoint is entering a blocking wait.
    fn entered_blocking(&mut self) {}

    /// The endpoint left its blocking wait.
    fn exited_blocking(&mut self) {}
}

/// Receiving half of a message path. Implemented by endpoints so that
/// in-process transports can hand messages straight across; a real
/// transport would instead pump messages from its wire into
/// [`crate::Endpoint::dispatch`].
pub trait MessageSink {
    /// Deliver one message, returning the reply payload when the
    /// message's tier produces one.
    ///
    /// # Errors
    ///
    /// [`TransportError::Remote`] when the receiving endpoint failed
    /// fatally while processing.
    fn deliver(&mut self, msg: WireMessage) -> Result<Option<WireMessage>, TransportError>;
}
