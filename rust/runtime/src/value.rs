//! Runtime values for declared message parameters.

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::shmem::ShmemId;

/// A dynamically typed value matching one
/// [`accord_types::DataType`].
///
/// The codec checks shape against the declared type at both ends;
/// handlers receive and produce these rather than generated structs,
/// which keeps the runtime free of per-protocol codegen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The unit primitive.
    Unit,
    /// A boolean primitive.
    Bool(bool),
    /// An integer primitive.
    Int(i64),
    /// A floating-point primitive.
    Real(f64),
    /// A string primitive.
    Str(String),
    /// A raw byte-buffer primitive.
    Bytes(Vec<u8>),
    /// An array of a single element type.
    List(Vec<Value>),
    /// A struct instance: one entry per declared field, in order.
    /// Side-split fields appear once, under the declared name.
    Record(Vec<(String, Value)>),
    /// A union instance carrying the *declared* component index; the
    /// per-side wire discriminator is a codec concern.
    Union {
        /// Index into the declared component list.
        declared: usize,
        /// The component payload.
        value: Box<Value>,
    },
    /// A reference to an actor by identity. [`ActorId::NULL`] is the
    /// null reference, legal only where the declaration is nullable.
    Actor(ActorId),
    /// A shared-memory handle by identity.
    Shmem(ShmemId),
}

impl Value {
    /// Shorthand for a string value.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    /// Shorthand for a union value.
    #[must_use]
    pub fn union(declared: usize, value: Value) -> Value {
        Value::Union {
            declared,
            value: Box::new(value),
        }
    }

    /// Shorthand for a record value.
    #[must_use]
    pub fn record(fields: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
        Value::Record(
            fields
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        )
    }

    /// The null actor reference.
    #[must_use]
    pub fn null_actor() -> Value {
        Value::Actor(ActorId::NULL)
    }
}
