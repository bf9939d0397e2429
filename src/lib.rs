//! Accord lowers a declarative description of an IPC protocol tree
//! into two concrete endpoint implementations, one per side.
//!
//! The pipeline: [`CompileUnit`] (the validated protocol and type
//! model) feeds the state machine compiler and the type codec, and
//! [`Endpoint`] assembles those with actor lifecycle management and
//! shared-memory brokering over an abstract [`Transport`].
//!
//! The [`loopback`] module wires two endpoints together in one
//! process; the integration tests, and any embedding that wants both
//! sides locally, drive a full exchange through it.

pub mod loopback;

pub use accord_fsm::{StateMachine, TransitionError};
pub use accord_runtime::{
    ActorId, ActorTable, Codec, CodecError, DestroyReason, DispatchOutcome, Endpoint,
    EndpointHandlers, FatalError, FatalResponse, HandlerError, LittleEndianCodec, MessageSink,
    RegionKind, ScalarCodec, SendError, SharedRegion, ShmemBroker, ShmemError, ShmemId, Transport,
    TransportError, Value, WireMessage,
};
pub use accord_types::{
    Action, CompileUnit, DataType, Direction, FieldDecl, MessageDecl, MessageRole, MessageTag,
    ModelError, Param, PrimitiveType, Protocol, ProtocolTree, Semantics, Side, State, StructDecl,
    TagMap, TransitionEdge, TransitionStmt, Trigger, TypeContext, TypeError, UnionDecl,
};
