//! Typed requests and responses
//!
//! [`Command`] is a decoded request frame with every field converted to its
//! domain type; [`Reply`] is the payload of an OK response. Converting a
//! frame into a command is where enum codes (family, bus setup, flags) are
//! validated, so an executor never sees an out-of-range code.

use heapless::Vec;

use super::field::Field;
use super::frame::{decode_fields, encode_fields, Frame, FrameBytes, MAX_FIELDS};
use super::opcode::{Opcode, RESP_ERROR, RESP_OK};
use crate::bus::ControlLine;
use crate::device::{BusSetup, DeviceFlags, Family};
use crate::error::{Error, Result};
use crate::generator::VppRoute;
use crate::regulator::{Fault, Phase, Rail, RegulatorStatus};

/// A decoded request
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Do nothing, answer OK
    Nop,
    /// Protocol version
    GetVersion,
    /// Output switch of a rail
    SetOutput {
        /// Rail
        rail: Rail,
        /// Switch state
        on: bool,
    },
    /// Retarget a rail
    SetVoltage {
        /// Rail
        rail: Rail,
        /// Target, volts
        volts: f32,
    },
    /// Measured voltage of a rail
    GetVoltage(Rail),
    /// Duty cycle of a rail
    GetDuty(Rail),
    /// Calibration offset of a rail
    GetCalibration(Rail),
    /// Drive a rail to nominal for calibration
    InitCalibration(Rail),
    /// Store the offset against an external measurement
    SaveCalibration {
        /// Rail
        rail: Rail,
        /// Voltage read on the external meter
        measured: f32,
    },
    /// Restore a stored offset
    SetCalibration {
        /// Rail
        rail: Rail,
        /// Offset, volts
        offset: f32,
    },
    /// VDD-on-VPP switch
    VddOnVpp(bool),
    /// Start regulating a rail
    Start {
        /// Rail
        rail: Rail,
        /// Target, volts
        volts: f32,
    },
    /// Stop regulating a rail
    Stop(Rail),
    /// Regulator snapshot of a rail
    GetStatus(Rail),
    /// Connect or disconnect VPP on one pin
    Route {
        /// Socket pin
        route: VppRoute,
        /// Switch state
        on: bool,
    },
    /// Assert or release a control line
    Control {
        /// Line
        line: ControlLine,
        /// Asserted
        active: bool,
    },
    /// Preset line state
    BusSetup(BusSetup),
    /// Address to 0
    AddrClear,
    /// Address + 1
    AddrIncrement,
    /// Full address
    AddrSet(u32),
    /// Low address byte
    AddrSetByte(u8),
    /// Low address word
    AddrSetWord(u16),
    /// Active address lines
    AddrWidth(u8),
    /// Data to 0
    DataClear,
    /// Drive a byte
    DataSet(u8),
    /// Drive a word
    DataSetWord(u16),
    /// Sample a byte
    DataGet,
    /// Sample a word
    DataGetWord,
    /// Zero the staging buffer
    BufClear,
    /// Store 16 bytes at `offset`
    BufWrite {
        /// Byte offset into the staging buffer
        offset: u16,
        /// Data, little-endian dwords
        words: [u32; 4],
    },
    /// Fetch 16 bytes at `offset`
    BufRead {
        /// Byte offset into the staging buffer
        offset: u16,
    },
    /// Program pulse width, microseconds
    SetTwp(u32),
    /// Write cycle time, microseconds
    SetTwc(u32),
    /// Select the device
    Configure {
        /// Algorithm family
        family: Family,
        /// Algorithm switches
        flags: DeviceFlags,
        /// Size in cells
        size: u32,
        /// Erase granularity in cells
        sector_size: u32,
    },
    /// Supply voltages used by device operations
    SetVoltages {
        /// VDD while reading
        vdd_read: f32,
        /// VDD while programming
        vdd_program: f32,
        /// Programming voltage
        vpp: f32,
    },
    /// Read `count` cells into the staging buffer
    Read {
        /// First cell
        base: u32,
        /// Cells
        count: u16,
    },
    /// Program `count` cells from the staging buffer
    Program {
        /// First cell
        base: u32,
        /// Cells
        count: u16,
    },
    /// Compare `count` cells against the staging buffer
    Verify {
        /// First cell
        base: u32,
        /// Cells
        count: u16,
    },
    /// Check `count` cells are erased
    BlankCheck {
        /// First cell
        base: u32,
        /// Cells
        count: u32,
    },
    /// Manufacturer and device ID
    GetId,
    /// Erase the device
    Erase,
    /// Disable write protection
    Unprotect,
    /// Enable write protection
    Protect,
    /// Engine lifecycle state
    State,
    /// Program attempts per cell
    SetAttempts(u8),
}

fn rail_op(rail: Rail, vdd: Opcode, vpp: Opcode) -> Opcode {
    match rail {
        Rail::Vdd => vdd,
        Rail::Vpp => vpp,
    }
}

/// Generator opcodes 0x01..0x0C are VDD, 0x10..0x1F are VPP
fn op_rail(op: Opcode) -> Rail {
    if op as u8 >= Opcode::VppSetCal as u8 {
        Rail::Vpp
    } else {
        Rail::Vdd
    }
}

/// Sequential reader over the fields of a checked frame
struct Args<'a>(core::slice::Iter<'a, Field>);

impl Args<'_> {
    fn next(&mut self) -> Result<Field> {
        self.0.next().copied().ok_or(Error::MalformedFrame)
    }

    fn bool(&mut self) -> Result<bool> {
        self.next()?.as_bool().ok_or(Error::MalformedFrame)
    }

    fn byte(&mut self) -> Result<u8> {
        self.next()?.as_byte().ok_or(Error::MalformedFrame)
    }

    fn word(&mut self) -> Result<u16> {
        self.next()?.as_word().ok_or(Error::MalformedFrame)
    }

    fn dword(&mut self) -> Result<u32> {
        self.next()?.as_dword().ok_or(Error::MalformedFrame)
    }

    fn float(&mut self) -> Result<f32> {
        self.next()?.as_float().ok_or(Error::MalformedFrame)
    }
}

impl Command {
    /// Wire opcode
    pub fn opcode(&self) -> Opcode {
        use Opcode as Op;
        match *self {
            Self::Nop => Op::Nop,
            Self::GetVersion => Op::GetVersion,
            Self::SetOutput { rail, .. } => rail_op(rail, Op::VddCtrl, Op::VppCtrl),
            Self::SetVoltage { rail, .. } => rail_op(rail, Op::VddSetV, Op::VppSetV),
            Self::GetVoltage(rail) => rail_op(rail, Op::VddGetV, Op::VppGetV),
            Self::GetDuty(rail) => rail_op(rail, Op::VddGetDuty, Op::VppGetDuty),
            Self::GetCalibration(rail) => rail_op(rail, Op::VddGetCal, Op::VppGetCal),
            Self::InitCalibration(rail) => rail_op(rail, Op::VddInitCal, Op::VppInitCal),
            Self::SaveCalibration { rail, .. } => rail_op(rail, Op::VddSaveCal, Op::VppSaveCal),
            Self::SetCalibration { rail, .. } => rail_op(rail, Op::VddSetCal, Op::VppSetCal),
            Self::VddOnVpp(_) => Op::VddOnVpp,
            Self::Start { rail, .. } => rail_op(rail, Op::VddStart, Op::VppStart),
            Self::Stop(rail) => rail_op(rail, Op::VddStop, Op::VppStop),
            Self::GetStatus(rail) => rail_op(rail, Op::VddGetStatus, Op::VppGetStatus),
            Self::Route { route, .. } => match route {
                VppRoute::A9 => Op::VppOnA9,
                VppRoute::A18 => Op::VppOnA18,
                VppRoute::Ce => Op::VppOnCe,
                VppRoute::Oe => Op::VppOnOe,
                VppRoute::We => Op::VppOnWe,
            },
            Self::Control { line, .. } => match line {
                ControlLine::Ce => Op::BusCe,
                ControlLine::Oe => Op::BusOe,
                ControlLine::We => Op::BusWe,
            },
            Self::BusSetup(_) => Op::BusSetup,
            Self::AddrClear => Op::AddrClr,
            Self::AddrIncrement => Op::AddrInc,
            Self::AddrSet(_) => Op::AddrSet,
            Self::AddrSetByte(_) => Op::AddrSetB,
            Self::AddrSetWord(_) => Op::AddrSetW,
            Self::AddrWidth(_) => Op::AddrWidth,
            Self::DataClear => Op::DataClr,
            Self::DataSet(_) => Op::DataSet,
            Self::DataSetWord(_) => Op::DataSetW,
            Self::DataGet => Op::DataGet,
            Self::DataGetWord => Op::DataGetW,
            Self::BufClear => Op::BufClear,
            Self::BufWrite { .. } => Op::BufWrite,
            Self::BufRead { .. } => Op::BufRead,
            Self::SetTwp(_) => Op::DeviceSetTwp,
            Self::SetTwc(_) => Op::DeviceSetTwc,
            Self::Configure { .. } => Op::DeviceConfigure,
            Self::SetVoltages { .. } => Op::DeviceSetVoltages,
            Self::Read { .. } => Op::DeviceRead,
            Self::Program { .. } => Op::DeviceProgram,
            Self::Verify { .. } => Op::DeviceVerify,
            Self::BlankCheck { .. } => Op::DeviceBlankCheck,
            Self::GetId => Op::DeviceGetId,
            Self::Erase => Op::DeviceErase,
            Self::Unprotect => Op::DeviceUnprotect,
            Self::Protect => Op::DeviceProtect,
            Self::State => Op::DeviceState,
            Self::SetAttempts(_) => Op::DeviceSetAttempts,
        }
    }

    /// Request fields in wire order
    fn fields(&self) -> Vec<Field, MAX_FIELDS> {
        let mut out = Vec::new();
        let mut push = |f: Field| {
            // At most MAX_FIELDS per command
            let _ = out.push(f);
        };
        match *self {
            Self::SetOutput { on, .. } | Self::Route { on, .. } => push(Field::Bool(on)),
            Self::VddOnVpp(on) => push(Field::Bool(on)),
            Self::Control { active, .. } => push(Field::Bool(active)),
            Self::SetVoltage { volts, .. } | Self::Start { volts, .. } => {
                push(Field::Float(volts))
            }
            Self::SaveCalibration { measured, .. } => push(Field::Float(measured)),
            Self::SetCalibration { offset, .. } => push(Field::Float(offset)),
            Self::BusSetup(setup) => push(Field::Byte(setup.code())),
            Self::AddrSet(v) | Self::SetTwp(v) | Self::SetTwc(v) => push(Field::Dword(v)),
            Self::AddrSetByte(v) | Self::AddrWidth(v) | Self::DataSet(v) | Self::SetAttempts(v) => {
                push(Field::Byte(v))
            }
            Self::AddrSetWord(v) | Self::DataSetWord(v) => push(Field::Word(v)),
            Self::BufWrite { offset, words } => {
                push(Field::Word(offset));
                for w in words {
                    push(Field::Dword(w));
                }
            }
            Self::BufRead { offset } => push(Field::Word(offset)),
            Self::Configure {
                family,
                flags,
                size,
                sector_size,
            } => {
                push(Field::Byte(family.code()));
                push(Field::Word(flags.bits()));
                push(Field::Dword(size));
                push(Field::Dword(sector_size));
            }
            Self::SetVoltages {
                vdd_read,
                vdd_program,
                vpp,
            } => {
                push(Field::Float(vdd_read));
                push(Field::Float(vdd_program));
                push(Field::Float(vpp));
            }
            Self::Read { base, count } | Self::Program { base, count } | Self::Verify { base, count } => {
                push(Field::Dword(base));
                push(Field::Word(count));
            }
            Self::BlankCheck { base, count } => {
                push(Field::Dword(base));
                push(Field::Dword(count));
            }
            _ => {}
        }
        out
    }

    /// Request frame
    pub fn to_frame(&self) -> Result<Frame> {
        Frame::with_fields(self.opcode(), &self.fields())
    }

    /// Encoded request
    pub fn encode(&self) -> Result<FrameBytes> {
        self.to_frame()?.encode()
    }

    /// Convert a frame, rejecting unknown enum codes and flag bits
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        use Opcode as Op;
        frame.check()?;
        let op = frame.opcode();
        let mut a = Args(frame.fields().iter());
        Ok(match op {
            Op::Nop => Self::Nop,
            Op::GetVersion => Self::GetVersion,
            Op::VddCtrl | Op::VppCtrl => Self::SetOutput {
                rail: op_rail(op),
                on: a.bool()?,
            },
            Op::VddSetV | Op::VppSetV => Self::SetVoltage {
                rail: op_rail(op),
                volts: a.float()?,
            },
            Op::VddGetV | Op::VppGetV => Self::GetVoltage(op_rail(op)),
            Op::VddGetDuty | Op::VppGetDuty => Self::GetDuty(op_rail(op)),
            Op::VddGetCal | Op::VppGetCal => Self::GetCalibration(op_rail(op)),
            Op::VddInitCal | Op::VppInitCal => Self::InitCalibration(op_rail(op)),
            Op::VddSaveCal | Op::VppSaveCal => Self::SaveCalibration {
                rail: op_rail(op),
                measured: a.float()?,
            },
            Op::VddSetCal | Op::VppSetCal => Self::SetCalibration {
                rail: op_rail(op),
                offset: a.float()?,
            },
            Op::VddOnVpp => Self::VddOnVpp(a.bool()?),
            Op::VddStart | Op::VppStart => Self::Start {
                rail: op_rail(op),
                volts: a.float()?,
            },
            Op::VddStop | Op::VppStop => Self::Stop(op_rail(op)),
            Op::VddGetStatus | Op::VppGetStatus => Self::GetStatus(op_rail(op)),
            Op::VppOnA9 | Op::VppOnA18 | Op::VppOnCe | Op::VppOnOe | Op::VppOnWe => {
                let route = match op {
                    Op::VppOnA9 => VppRoute::A9,
                    Op::VppOnA18 => VppRoute::A18,
                    Op::VppOnCe => VppRoute::Ce,
                    Op::VppOnOe => VppRoute::Oe,
                    _ => VppRoute::We,
                };
                Self::Route {
                    route,
                    on: a.bool()?,
                }
            }
            Op::BusCe | Op::BusOe | Op::BusWe => {
                let line = match op {
                    Op::BusCe => ControlLine::Ce,
                    Op::BusOe => ControlLine::Oe,
                    _ => ControlLine::We,
                };
                Self::Control {
                    line,
                    active: a.bool()?,
                }
            }
            Op::BusSetup => {
                Self::BusSetup(BusSetup::from_code(a.byte()?).ok_or(Error::MalformedFrame)?)
            }
            Op::AddrClr => Self::AddrClear,
            Op::AddrInc => Self::AddrIncrement,
            Op::AddrSet => Self::AddrSet(a.dword()?),
            Op::AddrSetB => Self::AddrSetByte(a.byte()?),
            Op::AddrSetW => Self::AddrSetWord(a.word()?),
            Op::AddrWidth => Self::AddrWidth(a.byte()?),
            Op::DataClr => Self::DataClear,
            Op::DataSet => Self::DataSet(a.byte()?),
            Op::DataSetW => Self::DataSetWord(a.word()?),
            Op::DataGet => Self::DataGet,
            Op::DataGetW => Self::DataGetWord,
            Op::BufClear => Self::BufClear,
            Op::BufWrite => Self::BufWrite {
                offset: a.word()?,
                words: [a.dword()?, a.dword()?, a.dword()?, a.dword()?],
            },
            Op::BufRead => Self::BufRead { offset: a.word()? },
            Op::DeviceSetTwp => Self::SetTwp(a.dword()?),
            Op::DeviceSetTwc => Self::SetTwc(a.dword()?),
            Op::DeviceConfigure => Self::Configure {
                family: Family::from_code(a.byte()?).ok_or(Error::MalformedFrame)?,
                flags: DeviceFlags::from_bits(a.word()?).ok_or(Error::MalformedFrame)?,
                size: a.dword()?,
                sector_size: a.dword()?,
            },
            Op::DeviceSetVoltages => Self::SetVoltages {
                vdd_read: a.float()?,
                vdd_program: a.float()?,
                vpp: a.float()?,
            },
            Op::DeviceRead => Self::Read {
                base: a.dword()?,
                count: a.word()?,
            },
            Op::DeviceProgram => Self::Program {
                base: a.dword()?,
                count: a.word()?,
            },
            Op::DeviceVerify => Self::Verify {
                base: a.dword()?,
                count: a.word()?,
            },
            Op::DeviceBlankCheck => Self::BlankCheck {
                base: a.dword()?,
                count: a.dword()?,
            },
            Op::DeviceGetId => Self::GetId,
            Op::DeviceErase => Self::Erase,
            Op::DeviceUnprotect => Self::Unprotect,
            Op::DeviceProtect => Self::Protect,
            Op::DeviceState => Self::State,
            Op::DeviceSetAttempts => Self::SetAttempts(a.byte()?),
        })
    }

    /// Decode a whole request
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_frame(&Frame::decode(bytes)?)
    }
}

/// Status byte of a regulator: phase in the low nibble, fault in the high
pub fn status_code(status: &RegulatorStatus) -> u8 {
    let phase = match status.phase {
        Phase::Idle => 0,
        Phase::Regulating => 1,
        Phase::Settled => 2,
    };
    let fault = match status.fault {
        None => 0,
        Some(Fault::Timeout) => 0x10,
        Some(Fault::Hardware) => 0x20,
    };
    phase | fault
}

fn status_from_code(code: u8) -> Result<(Phase, Option<Fault>)> {
    let phase = match code & 0x0F {
        0 => Phase::Idle,
        1 => Phase::Regulating,
        2 => Phase::Settled,
        _ => return Err(Error::MalformedFrame),
    };
    let fault = match code & 0xF0 {
        0 => None,
        0x10 => Some(Fault::Timeout),
        0x20 => Some(Fault::Hardware),
        _ => return Err(Error::MalformedFrame),
    };
    Ok((phase, fault))
}

/// Payload of an OK response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// No fields
    Done,
    /// One byte
    Byte(u8),
    /// One word
    Word(u16),
    /// One dword
    Dword(u32),
    /// One float
    Float(f32),
    /// Regulator snapshot
    Status(RegulatorStatus),
    /// 16 bytes of the staging buffer
    Block([u32; 4]),
}

impl Reply {
    fn fields(&self) -> Vec<Field, MAX_FIELDS> {
        let mut out = Vec::new();
        let mut push = |f: Field| {
            let _ = out.push(f);
        };
        match *self {
            Self::Done => {}
            Self::Byte(v) => push(Field::Byte(v)),
            Self::Word(v) => push(Field::Word(v)),
            Self::Dword(v) => push(Field::Dword(v)),
            Self::Float(v) => push(Field::Float(v)),
            Self::Status(s) => {
                push(Field::Byte(status_code(&s)));
                push(Field::Float(s.target));
                push(Field::Float(s.measured));
                push(Field::Float(s.duty));
            }
            Self::Block(words) => {
                for w in words {
                    push(Field::Dword(w));
                }
            }
        }
        out
    }

    /// Decode the fields that follow [`RESP_OK`] for `opcode`
    pub fn decode(opcode: Opcode, payload: &[u8]) -> Result<Self> {
        let fields = decode_fields(opcode.response(), payload)?;
        Ok(match fields.as_slice() {
            [] => Self::Done,
            [Field::Byte(v)] => Self::Byte(*v),
            [Field::Word(v)] => Self::Word(*v),
            [Field::Dword(v)] => Self::Dword(*v),
            [Field::Float(v)] => Self::Float(*v),
            [Field::Byte(code), Field::Float(target), Field::Float(measured), Field::Float(duty)] => {
                let (phase, fault) = status_from_code(*code)?;
                Self::Status(RegulatorStatus {
                    phase,
                    fault,
                    target: *target,
                    measured: *measured,
                    duty: *duty,
                })
            }
            [Field::Dword(a), Field::Dword(b), Field::Dword(c), Field::Dword(d)] => {
                Self::Block([*a, *b, *c, *d])
            }
            _ => return Err(Error::MalformedFrame),
        })
    }

    /// Byte payload
    pub fn byte(self) -> Result<u8> {
        match self {
            Self::Byte(v) => Ok(v),
            _ => Err(Error::MalformedFrame),
        }
    }

    /// Word payload
    pub fn word(self) -> Result<u16> {
        match self {
            Self::Word(v) => Ok(v),
            _ => Err(Error::MalformedFrame),
        }
    }

    /// Dword payload
    pub fn dword(self) -> Result<u32> {
        match self {
            Self::Dword(v) => Ok(v),
            _ => Err(Error::MalformedFrame),
        }
    }

    /// Float payload
    pub fn float(self) -> Result<f32> {
        match self {
            Self::Float(v) => Ok(v),
            _ => Err(Error::MalformedFrame),
        }
    }

    /// Regulator snapshot payload
    pub fn status(self) -> Result<RegulatorStatus> {
        match self {
            Self::Status(s) => Ok(s),
            _ => Err(Error::MalformedFrame),
        }
    }

    /// Staging buffer payload
    pub fn block(self) -> Result<[u32; 4]> {
        match self {
            Self::Block(words) => Ok(words),
            _ => Err(Error::MalformedFrame),
        }
    }
}

/// Response frame for `result`
///
/// A reply that does not fit the opcode's response layout goes out as a
/// `MalformedFrame` error instead.
pub fn encode_response(opcode: Opcode, result: Result<Reply>) -> FrameBytes {
    let encoded = result.and_then(|reply| {
        let fields = reply.fields();
        let schema = opcode.response();
        let fits = schema.len() == fields.len()
            && schema.iter().zip(fields.iter()).all(|(k, f)| f.kind() == *k);
        if !fits {
            log::error!("protocol: reply {:?} does not fit {:?}", reply, opcode);
            return Err(Error::MalformedFrame);
        }
        let mut out = FrameBytes::new();
        out.push(RESP_OK).map_err(|_| Error::OutOfRange)?;
        encode_fields(&fields, &mut out)?;
        Ok(out)
    });
    match encoded {
        Ok(out) => out,
        Err(e) => encode_error(e),
    }
}

/// Error frame: status byte, error code, detail dword
pub fn encode_error(error: Error) -> FrameBytes {
    let detail = error.addr().unwrap_or(0).to_le_bytes();
    FrameBytes::from_slice(&[
        RESP_ERROR,
        error.code(),
        detail[0],
        detail[1],
        detail[2],
        detail[3],
    ])
    .unwrap_or_default()
}

/// Bytes that follow [`RESP_ERROR`]
pub const ERROR_PAYLOAD: usize = 5;

/// Rebuild the error carried by an error frame payload
pub fn decode_error(payload: &[u8]) -> Error {
    match payload {
        [code, a, b, c, d] => {
            Error::from_code(*code, u32::from_le_bytes([*a, *b, *c, *d])).unwrap_or(Error::MalformedFrame)
        }
        _ => Error::MalformedFrame,
    }
}

/// Decode a whole response to `opcode`
pub fn decode_response(opcode: Opcode, bytes: &[u8]) -> Result<Reply> {
    match bytes.split_first() {
        Some((&RESP_OK, payload)) => Reply::decode(opcode, payload),
        Some((&RESP_ERROR, payload)) => Err(decode_error(payload)),
        _ => Err(Error::MalformedFrame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::field::{schema_len, FieldKind};

    #[test]
    fn test_every_opcode_has_a_command() {
        // A zeroed payload is valid for every layout except enum codes
        for op in Opcode::ALL {
            let payload = [0u8; 32];
            let len = schema_len(op.request());
            let frame = Frame::decode_payload(op, &payload[..len]).unwrap();
            match Command::from_frame(&frame) {
                Ok(cmd) => assert_eq!(cmd.opcode(), op),
                Err(e) => {
                    assert_eq!(e, Error::MalformedFrame);
                    assert_eq!(op, Opcode::DeviceConfigure);
                }
            }
        }
    }

    /// Request payload for `op` with a distinct non-zero value in every field
    fn filled_payload(op: Opcode) -> Vec<u8, 32> {
        let fields = op.request().iter().enumerate().map(|(i, kind)| match kind {
            FieldKind::Bool => Field::Bool(true),
            FieldKind::Byte => Field::Byte(match op {
                Opcode::DeviceConfigure => Family::FlashAm28F.code(),
                Opcode::BusSetup => BusSetup::GetId.code(),
                _ => 0x5A + i as u8,
            }),
            FieldKind::Word => Field::Word(match op {
                Opcode::DeviceConfigure => (DeviceFlags::VPP_OE_PIN | DeviceFlags::FAST_MODE).bits(),
                _ => 0xA53C + i as u16,
            }),
            FieldKind::Dword => Field::Dword(0x1234_5678 + (i as u32) * 0x0101_0101),
            FieldKind::Float => Field::Float(3.5 + i as f32),
        });
        let fields: Vec<Field, MAX_FIELDS> = fields.collect();
        let mut out = Vec::new();
        out.push(op as u8).unwrap();
        encode_fields(&fields, &mut out).unwrap();
        out
    }

    #[test]
    fn test_every_opcode_encodes_back_to_the_same_bytes() {
        for op in Opcode::ALL {
            let bytes = filled_payload(op);
            let cmd = Command::decode(&bytes).unwrap_or_else(|e| panic!("{:?}: {}", op, e));
            assert_eq!(cmd.opcode(), op);
            assert_eq!(cmd.encode().unwrap()[..], bytes[..], "{:?}", op);
        }
    }

    #[test]
    fn test_rail_split() {
        assert_eq!(
            Command::decode(&[0x0C, 0, 0, 0x80, 0x3F]).unwrap(),
            Command::SetCalibration {
                rail: Rail::Vdd,
                offset: 1.0
            }
        );
        assert_eq!(
            Command::decode(&[0x10, 0, 0, 0x80, 0x3F]).unwrap(),
            Command::SetCalibration {
                rail: Rail::Vpp,
                offset: 1.0
            }
        );
        assert_eq!(Command::decode(&[0x1E]).unwrap(), Command::Stop(Rail::Vpp));
        assert_eq!(Command::decode(&[0x0A]).unwrap(), Command::Stop(Rail::Vdd));
    }

    #[test]
    fn test_command_round_trip() {
        let commands = [
            Command::Start {
                rail: Rail::Vpp,
                volts: 12.5,
            },
            Command::Route {
                route: VppRoute::A9,
                on: true,
            },
            Command::Control {
                line: ControlLine::We,
                active: false,
            },
            Command::BusSetup(BusSetup::GetId),
            Command::BufWrite {
                offset: 0x30,
                words: [1, 2, 3, 0xFFFF_FFFF],
            },
            Command::Configure {
                family: Family::Eprom,
                flags: DeviceFlags::PROG_WITH_VPP | DeviceFlags::SKIP_FF,
                size: 0x8000,
                sector_size: 0,
            },
            Command::BlankCheck {
                base: 0x100,
                count: 0x1_0000,
            },
        ];
        for cmd in commands {
            let bytes = cmd.encode().unwrap();
            assert_eq!(Command::decode(&bytes).unwrap(), cmd);
        }
    }

    #[test]
    fn test_bad_codes_are_malformed() {
        // Unknown family
        assert_eq!(
            Command::decode(&[0x83, 0x77, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]),
            Err(Error::MalformedFrame)
        );
        // Undefined flag bit
        assert_eq!(
            Command::decode(&[0x83, 0x08, 0x00, 0x80, 0, 1, 0, 0, 0, 0, 0, 0]),
            Err(Error::MalformedFrame)
        );
        assert_eq!(Command::decode(&[0x24, 4]), Err(Error::MalformedFrame));
        // Bool other than 0/1
        assert_eq!(Command::decode(&[0x21, 2]), Err(Error::MalformedFrame));
    }

    #[test]
    fn test_ok_response_layout() {
        let bytes = encode_response(Opcode::DeviceGetId, Ok(Reply::Dword(0x0089_00B8)));
        assert_eq!(bytes.as_slice(), &[0xA1, 0xB8, 0x00, 0x89, 0x00]);
        assert_eq!(
            decode_response(Opcode::DeviceGetId, &bytes),
            Ok(Reply::Dword(0x0089_00B8))
        );
        let done = encode_response(Opcode::Nop, Ok(Reply::Done));
        assert_eq!(done.as_slice(), &[0xA1]);
    }

    #[test]
    fn test_error_response_carries_address() {
        let bytes = encode_response(
            Opcode::DeviceProgram,
            Err(Error::ProgramVerifyFailed { addr: 0x1234 }),
        );
        assert_eq!(bytes.as_slice(), &[0xA0, 4, 0x34, 0x12, 0, 0]);
        assert_eq!(
            decode_response(Opcode::DeviceProgram, &bytes),
            Err(Error::ProgramVerifyFailed { addr: 0x1234 })
        );
        let busy = encode_error(Error::SessionBusy);
        assert_eq!(busy.as_slice(), &[0xA0, 6, 0, 0, 0, 0]);
    }

    #[test]
    fn test_mismatched_reply_becomes_error() {
        let bytes = encode_response(Opcode::VddGetV, Ok(Reply::Byte(1)));
        assert_eq!(bytes.as_slice(), &[0xA0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_status_reply() {
        let status = RegulatorStatus {
            phase: Phase::Idle,
            fault: Some(Fault::Timeout),
            target: 12.0,
            measured: 3.5,
            duty: 0.0,
        };
        let bytes = encode_response(Opcode::VppGetStatus, Ok(Reply::Status(status)));
        assert_eq!(bytes[1], 0x10);
        assert_eq!(
            decode_response(Opcode::VppGetStatus, &bytes).and_then(Reply::status),
            Ok(status)
        );
        assert_eq!(status_from_code(0x03), Err(Error::MalformedFrame));
    }

    #[test]
    fn test_unexpected_status_byte() {
        assert_eq!(decode_response(Opcode::Nop, &[0x55]), Err(Error::MalformedFrame));
        assert_eq!(decode_response(Opcode::Nop, &[]), Err(Error::MalformedFrame));
        assert_eq!(decode_error(&[99, 0, 0, 0, 0]), Error::MalformedFrame);
    }
}
