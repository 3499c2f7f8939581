//! Opcode plus typed fields
//!
//! There is no length prefix: the opcode fixes the field layout, and a
//! frame whose payload is not exactly that layout is rejected whole.

use heapless::Vec;

use super::field::{schema_len, Field, FieldKind};
use super::opcode::Opcode;
use crate::error::{Error, Result};

/// Most fields any frame carries (BufWrite: offset + 4 dwords)
pub const MAX_FIELDS: usize = 5;
/// Largest encoded frame
pub const MAX_FRAME: usize = 32;

/// Encoded bytes of one frame
pub type FrameBytes = Vec<u8, MAX_FRAME>;

/// One decoded request
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    opcode: Opcode,
    fields: Vec<Field, MAX_FIELDS>,
}

impl Frame {
    /// Frame with no fields yet
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            fields: Vec::new(),
        }
    }

    /// Frame carrying `fields`, checked against the request layout
    pub fn with_fields(opcode: Opcode, fields: &[Field]) -> Result<Self> {
        let fields = Vec::from_slice(fields).map_err(|_| Error::MalformedFrame)?;
        let frame = Self { opcode, fields };
        frame.check()?;
        Ok(frame)
    }

    /// Append a field
    pub fn with(mut self, field: Field) -> Result<Self> {
        self.fields.push(field).map_err(|_| Error::OutOfRange)?;
        Ok(self)
    }

    /// Opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Fields in wire order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Check the fields against the opcode's request layout
    pub fn check(&self) -> Result<()> {
        let schema = self.opcode.request();
        let matches = schema.len() == self.fields.len()
            && schema.iter().zip(self.fields.iter()).all(|(k, f)| f.kind() == *k);
        if matches {
            Ok(())
        } else {
            Err(Error::MalformedFrame)
        }
    }

    /// Encode as `[opcode][fields...]`
    pub fn encode(&self) -> Result<FrameBytes> {
        self.check()?;
        let mut out = FrameBytes::new();
        out.push(self.opcode as u8).map_err(|_| Error::OutOfRange)?;
        encode_fields(&self.fields, &mut out)?;
        Ok(out)
    }

    /// Decode a whole frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&first, payload) = bytes.split_first().ok_or(Error::MalformedFrame)?;
        let opcode = Opcode::from_u8(first).ok_or(Error::MalformedFrame)?;
        Self::decode_payload(opcode, payload)
    }

    /// Decode the payload of a frame whose opcode was already read
    pub fn decode_payload(opcode: Opcode, payload: &[u8]) -> Result<Self> {
        let fields = decode_fields(opcode.request(), payload)?;
        Ok(Self { opcode, fields })
    }
}

/// Append the encoding of `fields` to `out`
pub fn encode_fields<const N: usize>(fields: &[Field], out: &mut Vec<u8, N>) -> Result<()> {
    for field in fields {
        let mut buf = [0u8; 4];
        let len = field.encode(&mut buf)?;
        out.extend_from_slice(&buf[..len])
            .map_err(|_| Error::OutOfRange)?;
    }
    Ok(())
}

/// Decode `payload` as exactly the fields of `schema`
pub fn decode_fields(schema: &[FieldKind], payload: &[u8]) -> Result<Vec<Field, MAX_FIELDS>> {
    if payload.len() != schema_len(schema) {
        return Err(Error::MalformedFrame);
    }
    let mut fields = Vec::new();
    let mut rest = payload;
    for kind in schema {
        let (bytes, tail) = rest.split_at(kind.width());
        fields
            .push(Field::decode(*kind, bytes)?)
            .map_err(|_| Error::MalformedFrame)?;
        rest = tail;
    }
    Ok(fields)
}
