//! Framed command protocol
//!
//! A request is one opcode byte followed by the fields its layout names, with
//! no length prefix. Responses start with [`RESP_OK`] and the opcode's
//! response fields, or [`RESP_ERROR`], an error code and a detail dword.
//!
//! Bulk data never travels in a device command: it is staged 16 bytes at a
//! time with `BufWrite`/`BufRead`, and device reads and programs work on the
//! staging buffer.

mod command;
mod field;
mod frame;
mod opcode;

pub use command::{
    decode_error, decode_response, encode_error, encode_response, status_code, Command, Reply,
    ERROR_PAYLOAD,
};
pub use field::{schema_len, Field, FieldKind};
pub use frame::{decode_fields, encode_fields, Frame, FrameBytes, MAX_FIELDS, MAX_FRAME};
pub use opcode::{Opcode, RESP_ERROR, RESP_OK};

/// Version reported by `GetVersion`
pub const PROTOCOL_VERSION: u16 = 0x0100;
