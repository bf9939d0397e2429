//! Data types carried by protocol messages.
//!
//! Every message parameter has a [`DataType`]. The variant set is closed:
//! per-kind behavior downstream (codec selection, per-side splitting) is
//! chosen by pattern matching on the tag rather than by visitation or
//! runtime reflection.

use serde::{Deserialize, Serialize};

use crate::Side;

/// Scalar types whose wire format is delegated to the transport's
/// generic scalar codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// No payload.
    Unit,
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Int,
    /// IEEE-754 double.
    Real,
    /// UTF-8 string.
    Str,
    /// Opaque byte buffer.
    Bytes,
}

/// A message-parameter or aggregate-member type.
///
/// Arrays never directly nest (`Array(Array(_))` is rejected by
/// validation); structs and unions may be mutually recursive, in which
/// case the recursive members are stored behind indirection; an
/// `ActorRef` is never recursive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// A scalar handled by the generic codec.
    Primitive(PrimitiveType),
    /// A declared struct, by name.
    Struct(String),
    /// A declared tagged union, by name.
    Union(String),
    /// A homogeneous sequence.
    Array(Box<DataType>),
    /// A reference to a live actor of the named protocol.
    ActorRef {
        /// Protocol the referenced actor speaks.
        protocol: String,
        /// Whether the null identity is a legal value.
        nullable: bool,
    },
    /// An ownership-transferring shared-memory handle.
    SharedMemoryHandle,
}

impl DataType {
    /// Shorthand for a non-nullable actor reference.
    #[must_use]
    pub fn actor(protocol: impl Into<String>) -> Self {
        DataType::ActorRef {
            protocol: protocol.into(),
            nullable: false,
        }
    }

    /// Shorthand for a nullable actor reference.
    #[must_use]
    pub fn nullable_actor(protocol: impl Into<String>) -> Self {
        DataType::ActorRef {
            protocol: protocol.into(),
            nullable: true,
        }
    }

    /// Shorthand for an array of `elem`.
    #[must_use]
    pub fn array(elem: DataType) -> Self {
        DataType::Array(Box::new(elem))
    }

    /// True iff a value of this type holds an endpoint-local actor
    /// handle: an `ActorRef`, or an array thereof, recursively.
    ///
    /// Members of this shape get one representation per endpoint side,
    /// because each side only ever holds its own actor handles.
    #[must_use]
    pub fn carries_actor(&self) -> bool {
        match self {
            DataType::ActorRef { .. } => true,
            DataType::Array(elem) => elem.carries_actor(),
            _ => false,
        }
    }

    /// The declared aggregate this type refers to, if any, looking
    /// through one level of array.
    #[must_use]
    pub(crate) fn aggregate_name(&self) -> Option<&str> {
        match self {
            DataType::Struct(n) | DataType::Union(n) => Some(n),
            DataType::Array(elem) => elem.aggregate_name(),
            _ => None,
        }
    }
}

/// A named struct member as declared by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Member name.
    pub name: String,
    /// Member type.
    pub ty: DataType,
}

impl FieldDecl {
    /// Build a field declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        FieldDecl {
            name: name.into(),
            ty,
        }
    }
}

/// A declared struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDecl {
    /// Struct name.
    pub name: String,
    /// Ordered members.
    pub fields: Vec<FieldDecl>,
}

/// A declared tagged union. Components are identified by position;
/// the wire discriminator is an index into the *resolved* component
/// list, which may be wider when components are split per side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionDecl {
    /// Union name.
    pub name: String,
    /// Ordered component types.
    pub components: Vec<DataType>,
}

/// A struct member after resolution.
///
/// Members whose type carries a visible actor are split into two
/// per-side entries (consecutive, parent first); all other members
/// resolve to a single entry with `side == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedField {
    /// Declared member name.
    pub name: String,
    /// Member type.
    pub ty: DataType,
    /// The endpoint side this entry represents, for split members.
    pub side: Option<Side>,
    /// True when the member participates in a declaration cycle and is
    /// stored behind indirection to keep the aggregate finite.
    pub indirect: bool,
}

/// A union component after resolution; same splitting rules as
/// [`ResolvedField`]. The wire discriminator of a component is its
/// index in the resolved list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    /// Index of the declared component this entry was resolved from.
    pub declared: usize,
    /// Component type.
    pub ty: DataType,
    /// The endpoint side this entry represents, for split components.
    pub side: Option<Side>,
    /// Stored behind indirection when mutually recursive.
    pub indirect: bool,
}

/// A struct with per-side member splitting and recursion indirection
/// computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStruct {
    /// Struct name.
    pub name: String,
    /// Resolved members, declaration order preserved.
    pub fields: Vec<ResolvedField>,
}

/// A union with per-side component splitting computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUnion {
    /// Union name.
    pub name: String,
    /// Resolved components; the wire discriminator indexes this list.
    pub components: Vec<ResolvedComponent>,
}

impl ResolvedUnion {
    /// The wire discriminator a writer on `side` uses for declared
    /// component `declared`.
    ///
    /// For a split component the writer tags the payload for the
    /// *receiving* side, so that the reader accepts exactly the
    /// discriminators naming its own representations and fails hard on
    /// the ones naming the sender's.
    #[must_use]
    pub fn wire_tag(&self, declared: usize, writer: Side) -> Option<usize> {
        self.components
            .iter()
            .position(|c| c.declared == declared && (c.side.is_none() || c.side == Some(writer.other())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_visibility_recurses_through_arrays() {
        let plain = DataType::Primitive(PrimitiveType::Int);
        let actor = DataType::actor("Worker");
        let arr = DataType::array(DataType::actor("Worker"));
        assert!(!plain.carries_actor());
        assert!(actor.carries_actor());
        assert!(arr.carries_actor());
        assert!(!DataType::array(plain).carries_actor());
    }

    #[test]
    fn shmem_handles_do_not_carry_actors() {
        assert!(!DataType::SharedMemoryHandle.carries_actor());
    }
}
