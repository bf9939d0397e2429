//! Declared-parameter encoding and decoding.
//!
//! The codec walks the declared type of each parameter and pattern
//! matches on its kind; there is no per-protocol generated code. Side
//! splitting shows up in two places: a struct writer serializes its
//! own half of a split member, and a union writer emits the wire
//! discriminator naming the *receiver's* representation of a split
//! component, so a reader only ever accepts discriminators addressed
//! to it and fails hard on ones naming the sender's.

use thiserror::Error;

use accord_types::{DataType, Param, PrimitiveType, Side, TypeContext};

use crate::actor::{ActorId, ActorTable};
use crate::error::DispatchOutcome;
use crate::shmem::{ShmemBroker, ShmemError, ShmemId};
use crate::value::Value;
use crate::wire::ScalarCodec;

/// Encoding and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload ended before the declared parameters did.
    #[error("payload truncated")]
    Truncated,
    /// Bytes remained after the last declared parameter.
    #[error("payload has trailing bytes")]
    TrailingBytes,
    /// A scalar decoded outside its domain.
    #[error("invalid {0} on the wire")]
    InvalidScalar(&'static str),
    /// Value count does not match the declaration.
    #[error("expected {expected} values, got {got}")]
    Arity {
        /// Declared parameter count.
        expected: usize,
        /// Supplied value count.
        got: usize,
    },
    /// A value's shape does not match its declared type.
    #[error("value does not match declared type, expected {0}")]
    TypeMismatch(&'static str),
    /// A negative array length arrived.
    #[error("negative array length {0}")]
    BadLength(i64),
    /// A null actor reference where the declaration is not nullable.
    #[error("null actor reference in non-nullable position")]
    NullForbidden,
    /// A reference to a destroyed actor. Corruption; the channel must
    /// die.
    #[error("reference to freed actor {0}")]
    FreedActorRef(ActorId),
    /// A reference to an actor this endpoint does not know.
    #[error("reference to unknown actor {0}")]
    UnknownActor(ActorId),
    /// An actor reference resolved to an actor of another protocol.
    #[error("actor {id} is not a `{expected}`")]
    WrongProtocolActor {
        /// The declared protocol.
        expected: String,
        /// The offending identity.
        id: ActorId,
    },
    /// A union discriminator outside the resolved component list.
    /// Corruption.
    #[error("union `{union}` has no component {tag}")]
    UnknownUnionTag {
        /// The union's name.
        union: String,
        /// The offending discriminator.
        tag: i64,
    },
    /// A union discriminator naming the sender's own split
    /// representation. Corruption.
    #[error("union `{union}` discriminator {tag} is not readable on this side")]
    WrongSideUnion {
        /// The union's name.
        union: String,
        /// The offending discriminator.
        tag: i64,
    },
    /// An aggregate name with no resolved shape. Only reachable with
    /// an unvalidated model.
    #[error("no resolved shape for aggregate `{0}`")]
    UnknownAggregate(String),
    /// Shared-memory transfer failed.
    #[error(transparent)]
    Shmem(#[from] ShmemError),
}

impl CodecError {
    /// The dispatch verdict this failure earns when it happens while
    /// *reading* an incoming message, or `None` when it is
    /// corruption-class and must kill the channel instead.
    #[must_use]
    pub fn read_verdict(&self) -> Option<DispatchOutcome> {
        match self {
            CodecError::Truncated
            | CodecError::TrailingBytes
            | CodecError::InvalidScalar(_)
            | CodecError::Arity { .. }
            | CodecError::TypeMismatch(_)
            | CodecError::BadLength(_) => Some(DispatchOutcome::PayloadError),
            CodecError::NullForbidden
            | CodecError::UnknownActor(_)
            | CodecError::WrongProtocolActor { .. }
            | CodecError::Shmem(ShmemError::NotRegistered(_)) => {
                Some(DispatchOutcome::ValueError)
            }
            CodecError::FreedActorRef(_)
            | CodecError::UnknownUnionTag { .. }
            | CodecError::WrongSideUnion { .. }
            | CodecError::UnknownAggregate(_)
            | CodecError::Shmem(_) => None,
        }
    }
}

/// A codec bound to one endpoint's type context, side, and scalar
/// encoding.
pub struct Codec<'a> {
    context: &'a TypeContext,
    side: Side,
    scalars: &'a dyn ScalarCodec,
}

impl<'a> Codec<'a> {
    /// Bind a codec.
    #[must_use]
    pub fn new(context: &'a TypeContext, side: Side, scalars: &'a dyn ScalarCodec) -> Self {
        Codec {
            context,
            side,
            scalars,
        }
    }

    /// Encode a declared parameter list.
    ///
    /// # Errors
    ///
    /// Arity and shape mismatches, plus any reference-validity
    /// failure; all write-side failures are contract violations.
    pub fn encode_params(
        &self,
        params: &[Param],
        values: &[Value],
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<Vec<u8>, CodecError> {
        if params.len() != values.len() {
            return Err(CodecError::Arity {
                expected: params.len(),
                got: values.len(),
            });
        }
        let mut out = Vec::new();
        for (param, value) in params.iter().zip(values) {
            self.write(&mut out, &param.ty, value, actors, shmem)?;
        }
        Ok(out)
    }

    /// Decode a declared parameter list, consuming the whole payload.
    ///
    /// # Errors
    ///
    /// See [`CodecError::read_verdict`] for how each failure is
    /// classified.
    pub fn decode_params(
        &self,
        params: &[Param],
        payload: &[u8],
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<Vec<Value>, CodecError> {
        let mut input = payload;
        let mut values = Vec::with_capacity(params.len());
        for param in params {
            values.push(self.read(&mut input, &param.ty, actors, shmem)?);
        }
        if !input.is_empty() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(values)
    }

    /// Encode one value of one declared type.
    ///
    /// # Errors
    ///
    /// Shape mismatches and reference-validity failures.
    pub fn write(
        &self,
        out: &mut Vec<u8>,
        ty: &DataType,
        value: &Value,
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<(), CodecError> {
        match ty {
            DataType::Primitive(p) => self.write_primitive(out, *p, value),
            DataType::Struct(name) => self.write_struct(out, name, value, actors, shmem),
            DataType::Union(name) => self.write_union(out, name, value, actors, shmem),
            DataType::Array(elem) => {
                let Value::List(items) = value else {
                    return Err(CodecError::TypeMismatch("array"));
                };
                self.scalars.write_int(out, items.len() as i64);
                for item in items {
                    self.write(out, elem, item, actors, shmem)?;
                }
                Ok(())
            }
            DataType::ActorRef { protocol, nullable } => {
                self.write_actor(out, protocol, *nullable, value, actors)
            }
            DataType::SharedMemoryHandle => {
                let Value::Shmem(id) = value else {
                    return Err(CodecError::TypeMismatch("shared-memory handle"));
                };
                shmem.transfer_out(*id)?;
                self.scalars.write_int(out, id.0);
                Ok(())
            }
        }
    }

    /// Decode one value of one declared type.
    ///
    /// # Errors
    ///
    /// See [`CodecError::read_verdict`].
    pub fn read(
        &self,
        input: &mut &[u8],
        ty: &DataType,
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<Value, CodecError> {
        match ty {
            DataType::Primitive(p) => self.read_primitive(input, *p),
            DataType::Struct(name) => self.read_struct(input, name, actors, shmem),
            DataType::Union(name) => self.read_union(input, name, actors, shmem),
            DataType::Array(elem) => {
                let len = self.scalars.read_int(input)?;
                if len < 0 {
                    return Err(CodecError::BadLength(len));
                }
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(self.read(input, elem, actors, shmem)?);
                }
                Ok(Value::List(items))
            }
            DataType::ActorRef { protocol, nullable } => {
                self.read_actor(input, protocol, *nullable, actors)
            }
            DataType::SharedMemoryHandle => {
                let id = ShmemId(self.scalars.read_int(input)?);
                shmem.transfer_in(id)?;
                Ok(Value::Shmem(id))
            }
        }
    }

    fn write_primitive(
        &self,
        out: &mut Vec<u8>,
        p: PrimitiveType,
        value: &Value,
    ) -> Result<(), CodecError> {
        match (p, value) {
            (PrimitiveType::Unit, Value::Unit) => Ok(()),
            (PrimitiveType::Bool, Value::Bool(v)) => {
                self.scalars.write_bool(out, *v);
                Ok(())
            }
            (PrimitiveType::Int, Value::Int(v)) => {
                self.scalars.write_int(out, *v);
                Ok(())
            }
            (PrimitiveType::Real, Value::Real(v)) => {
                self.scalars.write_real(out, *v);
                Ok(())
            }
            (PrimitiveType::Str, Value::Str(v)) => {
                self.scalars.write_str(out, v);
                Ok(())
            }
            (PrimitiveType::Bytes, Value::Bytes(v)) => {
                self.scalars.write_bytes(out, v);
                Ok(())
            }
            (PrimitiveType::Unit, _) => Err(CodecError::TypeMismatch("unit")),
            (PrimitiveType::Bool, _) => Err(CodecError::TypeMismatch("bool")),
            (PrimitiveType::Int, _) => Err(CodecError::TypeMismatch("int")),
            (PrimitiveType::Real, _) => Err(CodecError::TypeMismatch("real")),
            (PrimitiveType::Str, _) => Err(CodecError::TypeMismatch("string")),
            (PrimitiveType::Bytes, _) => Err(CodecError::TypeMismatch("bytes")),
        }
    }

    fn read_primitive(
        &self,
        input: &mut &[u8],
        p: PrimitiveType,
    ) -> Result<Value, CodecError> {
        Ok(match p {
            PrimitiveType::Unit => Value::Unit,
            PrimitiveType::Bool => Value::Bool(self.scalars.read_bool(input)?),
            PrimitiveType::Int => Value::Int(self.scalars.read_int(input)?),
            PrimitiveType::Real => Value::Real(self.scalars.read_real(input)?),
            PrimitiveType::Str => Value::Str(self.scalars.read_str(input)?),
            PrimitiveType::Bytes => Value::Bytes(self.scalars.read_bytes(input)?),
        })
    }

    fn write_struct(
        &self,
        out: &mut Vec<u8>,
        name: &str,
        value: &Value,
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<(), CodecError> {
        let shape = self
            .context
            .resolved_struct(name)
            .ok_or_else(|| CodecError::UnknownAggregate(name.to_string()))?;
        let Value::Record(entries) = value else {
            return Err(CodecError::TypeMismatch("record"));
        };
        // A split member serializes the writer's half only; the other
        // half neither consumes a record entry nor reaches the wire.
        let mut entries = entries.iter();
        for field in &shape.fields {
            if field.side.is_some() && field.side != Some(self.side) {
                continue;
            }
            let (entry_name, entry_value) = entries
                .next()
                .ok_or(CodecError::TypeMismatch("record field"))?;
            if *entry_name != field.name {
                return Err(CodecError::TypeMismatch("record field name"));
            }
            self.write(out, &field.ty, entry_value, actors, shmem)?;
        }
        if entries.next().is_some() {
            return Err(CodecError::TypeMismatch("record arity"));
        }
        Ok(())
    }

    fn read_struct(
        &self,
        input: &mut &[u8],
        name: &str,
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<Value, CodecError> {
        let shape = self
            .context
            .resolved_struct(name)
            .ok_or_else(|| CodecError::UnknownAggregate(name.to_string()))?;
        let writer = self.side.other();
        let mut entries = Vec::new();
        for field in &shape.fields {
            if field.side.is_none() || field.side == Some(writer) {
                let value = self.read(input, &field.ty, actors, shmem)?;
                entries.push((field.name.clone(), value));
            }
        }
        Ok(Value::Record(entries))
    }

    fn write_union(
        &self,
        out: &mut Vec<u8>,
        name: &str,
        value: &Value,
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<(), CodecError> {
        let shape = self
            .context
            .resolved_union(name)
            .ok_or_else(|| CodecError::UnknownAggregate(name.to_string()))?;
        let Value::Union { declared, value } = value else {
            return Err(CodecError::TypeMismatch("union"));
        };
        let tag = shape
            .wire_tag(*declared, self.side)
            .ok_or_else(|| CodecError::UnknownUnionTag {
                union: name.to_string(),
                tag: *declared as i64,
            })?;
        self.scalars.write_int(out, tag as i64);
        self.write(out, &shape.components[tag].ty, value, actors, shmem)
    }

    fn read_union(
        &self,
        input: &mut &[u8],
        name: &str,
        actors: &ActorTable,
        shmem: &mut ShmemBroker,
    ) -> Result<Value, CodecError> {
        let shape = self
            .context
            .resolved_union(name)
            .ok_or_else(|| CodecError::UnknownAggregate(name.to_string()))?;
        let raw = self.scalars.read_int(input)?;
        let component = usize::try_from(raw)
            .ok()
            .and_then(|idx| shape.components.get(idx))
            .ok_or_else(|| CodecError::UnknownUnionTag {
                union: name.to_string(),
                tag: raw,
            })?;
        // Split components are tagged for the side that will read
        // them; a tag naming the sender's own half is corruption.
        if let Some(side) = component.side {
            if side != self.side {
                return Err(CodecError::WrongSideUnion {
                    union: name.to_string(),
                    tag: raw,
                });
            }
        }
        let value = self.read(input, &component.ty, actors, shmem)?;
        Ok(Value::union(component.declared, value))
    }

    fn write_actor(
        &self,
        out: &mut Vec<u8>,
        protocol: &str,
        nullable: bool,
        value: &Value,
        actors: &ActorTable,
    ) -> Result<(), CodecError> {
        let Value::Actor(id) = value else {
            return Err(CodecError::TypeMismatch("actor reference"));
        };
        if *id == ActorId::NULL {
            if !nullable {
                return Err(CodecError::NullForbidden);
            }
            self.scalars.write_int(out, ActorId::NULL.0);
            return Ok(());
        }
        if *id == ActorId::FREED || actors.is_freed(*id) {
            return Err(CodecError::FreedActorRef(*id));
        }
        let entry = actors.get(*id).ok_or(CodecError::UnknownActor(*id))?;
        if entry.protocol != protocol {
            return Err(CodecError::WrongProtocolActor {
                expected: protocol.to_string(),
                id: *id,
            });
        }
        self.scalars.write_int(out, id.0);
        Ok(())
    }

    fn read_actor(
        &self,
        input: &mut &[u8],
        protocol: &str,
        nullable: bool,
        actors: &ActorTable,
    ) -> Result<Value, CodecError> {
        let id = ActorId(self.scalars.read_int(input)?);
        if id == ActorId::FREED {
            return Err(CodecError::FreedActorRef(id));
        }
        if id == ActorId::NULL {
            if !nullable {
                return Err(CodecError::NullForbidden);
            }
            return Ok(Value::null_actor());
        }
        let entry = actors.get(id).ok_or(CodecError::UnknownActor(id))?;
        if entry.protocol != protocol {
            return Err(CodecError::WrongProtocolActor {
                expected: protocol.to_string(),
                id,
            });
        }
        Ok(Value::Actor(id))
    }
}
