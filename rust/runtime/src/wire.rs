//! Wire message layout and the primitive scalar seam.
//!
//! A message is (routing identity, message tag, semantics, reply bit,
//! payload). The payload is the declared parameters in order, encoded
//! through a [`ScalarCodec`] the transport supplies; the runtime fixes
//! *what* scalars appear in what order, the transport fixes how each
//! scalar looks as bytes.

use serde::{Deserialize, Serialize};

use accord_types::{MessageTag, Semantics};

use crate::actor::ActorId;
use crate::codec::CodecError;

/// Reserved tag announcing a freshly created shared region.
pub const SHMEM_CREATED_TAG: MessageTag = MessageTag(1);
/// Reserved tag announcing a shared region's destruction.
pub const SHMEM_DESTROYED_TAG: MessageTag = MessageTag(2);

/// One message as handed to or received from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Identity of the actor this message addresses;
    /// [`ActorId::NULL`] addresses the toplevel.
    pub routing: ActorId,
    /// The message kind.
    pub tag: MessageTag,
    /// Delivery class.
    pub semantics: Semantics,
    /// Set on the second payload of a blocking exchange.
    pub is_reply: bool,
    /// Encoded parameters.
    pub payload: Vec<u8>,
}

/// Transport-supplied encoding of primitive scalars.
///
/// Counts, identities, and union discriminators all travel as `i64`
/// through [`ScalarCodec::write_int`], so a transport controls every
/// byte of a payload by implementing these eight methods.
pub trait ScalarCodec {
    /// Append a boolean.
    fn write_bool(&self, out: &mut Vec<u8>, v: bool);
    /// Append an integer.
    fn write_int(&self, out: &mut Vec<u8>, v: i64);
    /// Append a float.
    fn write_real(&self, out: &mut Vec<u8>, v: f64);
    /// Append a length-prefixed string.
    fn write_str(&self, out: &mut Vec<u8>, v: &str);
    /// Append a length-prefixed byte buffer.
    fn write_bytes(&self, out: &mut Vec<u8>, v: &[u8]);

    /// Consume a boolean.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] or a value-domain failure.
    fn read_bool(&self, input: &mut &[u8]) -> Result<bool, CodecError>;
    /// Consume an integer.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`].
    fn read_int(&self, input: &mut &[u8]) -> Result<i64, CodecError>;
    /// Consume a float.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`].
    fn read_real(&self, input: &mut &[u8]) -> Result<f64, CodecError>;
    /// Consume a length-prefixed string.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`] or invalid text.
    fn read_str(&self, input: &mut &[u8]) -> Result<String, CodecError>;
    /// Consume a length-prefixed byte buffer.
    ///
    /// # Errors
    ///
    /// [`CodecError::Truncated`].
    fn read_bytes(&self, input: &mut &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// The stock scalar encoding: fixed-width little-endian numbers,
/// length-prefixed strings and buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LittleEndianCodec;

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

impl ScalarCodec for LittleEndianCodec {
    fn write_bool(&self, out: &mut Vec<u8>, v: bool) {
        out.push(u8::from(v));
    }

    fn write_int(&self, out: &mut Vec<u8>, v: i64) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn write_real(&self, out: &mut Vec<u8>, v: f64) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn write_str(&self, out: &mut Vec<u8>, v: &str) {
        self.write_bytes(out, v.as_bytes());
    }

    fn write_bytes(&self, out: &mut Vec<u8>, v: &[u8]) {
        self.write_int(out, v.len() as i64);
        out.extend_from_slice(v);
    }

    fn read_bool(&self, input: &mut &[u8]) -> Result<bool, CodecError> {
        match take(input, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(CodecError::InvalidScalar("bool")),
        }
    }

    fn read_int(&self, input: &mut &[u8]) -> Result<i64, CodecError> {
        let raw = take(input, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(i64::from_le_bytes(buf))
    }

    fn read_real(&self, input: &mut &[u8]) -> Result<f64, CodecError> {
        let raw = take(input, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(f64::from_le_bytes(buf))
    }

    fn read_str(&self, input: &mut &[u8]) -> Result<String, CodecError> {
        let raw = self.read_bytes(input)?;
        String::from_utf8(raw).map_err(|_| CodecError::InvalidScalar("utf-8 string"))
    }

    fn read_bytes(&self, input: &mut &[u8]) -> Result<Vec<u8>, CodecError> {
        let len = self.read_int(input)?;
        let len = usize::try_from(len).map_err(|_| CodecError::InvalidScalar("length"))?;
        Ok(take(input, len)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn scalars_survive_the_wire() {
        let c = LittleEndianCodec;
        let mut out = Vec::new();
        c.write_int(&mut out, -42);
        c.write_bool(&mut out, true);
        c.write_str(&mut out, "accord");

        let mut input = out.as_slice();
        assert_eq!(c.read_int(&mut input).unwrap(), -42);
        assert!(c.read_bool(&mut input).unwrap());
        assert_eq!(c.read_str(&mut input).unwrap(), "accord");
        assert!(input.is_empty());
    }

    #[test]
    fn short_input_reports_truncation() {
        let c = LittleEndianCodec;
        let mut input: &[u8] = &[1, 2, 3];
        assert_matches!(c.read_int(&mut input), Err(CodecError::Truncated));
    }

    #[test]
    fn out_of_domain_bool_is_rejected() {
        let c = LittleEndianCodec;
        let mut input: &[u8] = &[7];
        assert_matches!(c.read_bool(&mut input), Err(CodecError::InvalidScalar(_)));
    }
}

