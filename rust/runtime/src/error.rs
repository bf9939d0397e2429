//! Runtime failure taxonomy.
//!
//! Three families with very different consequences: dispatch outcomes
//! are per-message verdicts the transport may act on; lifecycle errors
//! are table-level bookkeeping faults; fatal errors mean the protocol
//! contract itself was violated and the channel must die.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_fsm::TransitionError;
use accord_types::Side;

use crate::actor::ActorId;
use crate::codec::CodecError;
use crate::shmem::ShmemError;
use crate::transport::TransportError;

/// Verdict on one dispatched incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// Decoded, validated, and handled.
    Processed,
    /// The tag names no message this endpoint knows.
    NotKnown,
    /// Known message, but not receivable here (wrong direction or
    /// wrong protocol for the addressed actor).
    NotAllowed,
    /// A declared parameter failed to decode.
    PayloadError,
    /// The caller's handler rejected the message.
    ProcessingError,
    /// The routing identity resolves to no live actor.
    RouteError,
    /// A decoded parameter was out of its value domain.
    ValueError,
}

/// Actor-table bookkeeping faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// No actor with this identity exists here.
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),
    /// The actor existed but has been destroyed.
    #[error("actor {0} is already destroyed")]
    FreedActor(ActorId),
    /// Registration under an occupied or retired identity.
    #[error("identity {0} already in use")]
    IdInUse(ActorId),
    /// A managee removal named an actor its manager never held.
    #[error("{managee} is not a managee of {manager}")]
    NotManagee {
        /// The manager whose collection was searched.
        manager: ActorId,
        /// The absent managee.
        managee: ActorId,
    },
}

/// Unrecoverable contract violations. Once one of these surfaces, the
/// endpoint stops trusting its own bookkeeping and the channel must
/// come down; there is no retry at this layer.
#[derive(Debug, Error)]
pub enum FatalError {
    /// A message violated the declared ordering contract.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Encoding or decoding hit a corruption-class failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The transport gave up.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The actor table contradicted itself.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The shared-memory broker contradicted itself.
    #[error(transparent)]
    Shmem(#[from] ShmemError),
    /// A send entry point was used for a message this side may not
    /// transmit.
    #[error("`{message}` of `{protocol}` is not sendable from this side")]
    WrongDirection {
        /// Protocol of the offending message.
        protocol: String,
        /// The offending message.
        message: String,
    },
    /// A send entry point named an undeclared protocol or message.
    #[error("no declaration for `{0}`")]
    UnknownDecl(String),
    /// A plain send named a lifecycle message, or vice versa;
    /// constructors and destructors have their own entry points.
    #[error("`{message}` must go through its lifecycle entry point")]
    WrongEntryPoint {
        /// The misused message.
        message: String,
    },
    /// The blocking-reply timeout policy asked to stop waiting.
    #[error("gave up waiting for a reply to `{0}`")]
    ReplyTimeout(String),
}

impl FatalError {
    /// How the endpoint on `side` answers a fatal error: the parent
    /// side kills the remote process, the child side takes itself
    /// down.
    #[must_use]
    pub fn response(side: Side) -> FatalResponse {
        match side {
            Side::Parent => FatalResponse::TerminateRemote,
            Side::Child => FatalResponse::SelfTerminate,
        }
    }
}

/// The terminal action a fatal error demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalResponse {
    /// Kill the peer process.
    TerminateRemote,
    /// Abort this process.
    SelfTerminate,
}

/// Failure of a constructor send entry point.
#[derive(Debug, Error)]
pub enum SendError {
    /// The channel is dead; see [`FatalError`].
    #[error(transparent)]
    Fatal(#[from] FatalError),
    /// The peer refused to allocate the new actor. The local half has
    /// already been torn down with
    /// [`crate::DestroyReason::FailedConstructor`].
    #[error("peer rejected the constructor")]
    ConstructorFailed,
}
