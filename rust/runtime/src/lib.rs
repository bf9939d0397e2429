//! Endpoint Runtime Assembly for Accord
//!
//! Takes a validated [`accord_types::CompileUnit`] and assembles, for
//! one endpoint side, everything the protocol contract demands at run
//! time:
//!
//! - actor lifecycle and the manager/managee tree ([`ActorTable`]);
//! - shared-memory brokering ([`ShmemBroker`]);
//! - the wire codec for declared parameter lists ([`Codec`]);
//! - tiered message dispatch and the send entry points ([`Endpoint`]).
//!
//! The transport is abstract: callers supply one send primitive per
//! semantics tier plus a primitive scalar codec, and receive decoded
//! messages back through the [`EndpointHandlers`] hooks.

mod actor;
mod codec;
mod endpoint;
mod error;
mod hooks;
mod shmem;
mod transport;
mod value;
mod wire;

pub use actor::{ActorEntry, ActorId, ActorTable, DestroyReason, IdAllocator};
pub use codec::{Codec, CodecError};
pub use endpoint::Endpoint;
pub use error::{DispatchOutcome, FatalError, FatalResponse, LifecycleError, SendError};
pub use hooks::{EndpointHandlers, HandlerError};
pub use shmem::{PendingRegion, RegionKind, SharedRegion, ShmemBroker, ShmemError, ShmemId};
pub use transport::{MessageSink, Transport, TransportError};
pub use value::Value;
pub use wire::{
    LittleEndianCodec, ScalarCodec, WireMessage, SHMEM_CREATED_TAG, SHMEM_DESTROYED_TAG,
};
