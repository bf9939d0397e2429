//! Protocol and Data-Type Model for Accord
//!
//! This crate is the canonical, front-end-agnostic view of an IPC protocol
//! tree: actor protocols, typed messages, legal message orderings, and
//! manager/managee ownership edges, together with the resolved data-type
//! graph those messages carry.
//!
//! The model is consumed by two downstream stages:
//!
//! - `accord-fsm` compiles the declared transitions into a deterministic
//!   per-endpoint validator;
//! - `accord-runtime` assembles, per endpoint side, a complete runtime
//!   implementation (codec, lifecycle, shared-memory broker, dispatch).
//!
//! Type resolution lives here as well: [`TypeContext`] classifies every
//! data type by kind and detects which aggregate members carry visible
//! actor references and therefore need one representation per endpoint
//! side.

mod context;
mod data_type;
mod protocol;
mod transition;

pub use context::{CompileUnit, TypeContext, TypeError};
pub use data_type::{
    DataType, FieldDecl, PrimitiveType, ResolvedComponent, ResolvedField, ResolvedStruct,
    ResolvedUnion, StructDecl, UnionDecl,
};
pub use protocol::{
    Direction, MessageDecl, MessageRole, MessageTag, ModelError, Param, Protocol, ProtocolTree,
    Semantics, TagMap, FIRST_PROTOCOL_TAG,
};
pub use transition::{Action, State, TransitionEdge, TransitionStmt, Trigger};

use serde::{Deserialize, Serialize};

/// One of the two endpoint roles of a protocol tree.
///
/// The parent side conventionally initiates the channel and allocates
/// ascending identities; the child side allocates descending identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    /// The initiating endpoint role.
    Parent,
    /// The accepting endpoint role.
    Child,
}

impl Side {
    /// The opposite endpoint role.
    #[must_use]
    pub fn other(self) -> Side {
        match self {
            Side::Parent => Side::Child,
            Side::Child => Side::Parent,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Parent => write!(f, "parent"),
            Side::Child => write!(f, "child"),
        }
    }
}
