//! Typed frame fields

use crate::error::{Error, Result};

/// Wire type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 1 byte, 0 or 1
    Bool,
    /// 1 byte
    Byte,
    /// 2 bytes, little-endian
    Word,
    /// 4 bytes, little-endian
    Dword,
    /// 4 bytes, IEEE-754 single, little-endian
    Float,
}

impl FieldKind {
    /// Encoded width in bytes
    pub const fn width(self) -> usize {
        match self {
            Self::Bool | Self::Byte => 1,
            Self::Word => 2,
            Self::Dword | Self::Float => 4,
        }
    }
}

/// Total encoded width of a field list
pub const fn schema_len(schema: &[FieldKind]) -> usize {
    let mut len = 0;
    let mut i = 0;
    while i < schema.len() {
        len += schema[i].width();
        i += 1;
    }
    len
}

/// One field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    /// Boolean
    Bool(bool),
    /// Unsigned byte
    Byte(u8),
    /// Unsigned 16-bit
    Word(u16),
    /// Unsigned 32-bit
    Dword(u32),
    /// 32-bit float
    Float(f32),
}

impl Field {
    /// Wire type of this value
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Bool(_) => FieldKind::Bool,
            Self::Byte(_) => FieldKind::Byte,
            Self::Word(_) => FieldKind::Word,
            Self::Dword(_) => FieldKind::Dword,
            Self::Float(_) => FieldKind::Float,
        }
    }

    /// Write the encoding into the front of `out`, returning its length
    pub fn encode(&self, out: &mut [u8]) -> Result<usize> {
        let width = self.kind().width();
        let out = out.get_mut(..width).ok_or(Error::OutOfRange)?;
        match *self {
            Self::Bool(v) => out[0] = v as u8,
            Self::Byte(v) => out[0] = v,
            Self::Word(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Dword(v) => out.copy_from_slice(&v.to_le_bytes()),
            Self::Float(v) => out.copy_from_slice(&v.to_le_bytes()),
        }
        Ok(width)
    }

    /// Decode a `kind` field from exactly `bytes`
    pub fn decode(kind: FieldKind, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != kind.width() {
            return Err(Error::MalformedFrame);
        }
        Ok(match kind {
            FieldKind::Bool => match bytes[0] {
                0 => Self::Bool(false),
                1 => Self::Bool(true),
                _ => return Err(Error::MalformedFrame),
            },
            FieldKind::Byte => Self::Byte(bytes[0]),
            FieldKind::Word => Self::Word(u16::from_le_bytes([bytes[0], bytes[1]])),
            FieldKind::Dword => {
                Self::Dword(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            FieldKind::Float => {
                Self::Float(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
        })
    }

    /// Value as bool, if it is one
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// Value as byte, if it is one
    pub fn as_byte(&self) -> Option<u8> {
        match *self {
            Self::Byte(v) => Some(v),
            _ => None,
        }
    }

    /// Value as word, if it is one
    pub fn as_word(&self) -> Option<u16> {
        match *self {
            Self::Word(v) => Some(v),
            _ => None,
        }
    }

    /// Value as dword, if it is one
    pub fn as_dword(&self) -> Option<u32> {
        match *self {
            Self::Dword(v) => Some(v),
            _ => None,
        }
    }

    /// Value as float, if it is one
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }
}
