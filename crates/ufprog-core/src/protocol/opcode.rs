//! Opcodes and their field layouts

use super::field::FieldKind::{self, Bool, Byte, Dword, Float, Word};

/// Response status byte: request failed
pub const RESP_ERROR: u8 = 0xA0;
/// Response status byte: request succeeded
pub const RESP_OK: u8 = 0xA1;

/// Request opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,
    /// VDD output on/off
    VddCtrl = 0x01,
    /// Retarget VDD
    VddSetV = 0x02,
    /// Measured VDD
    VddGetV = 0x03,
    /// VDD duty cycle
    VddGetDuty = 0x04,
    /// VDD calibration offset
    VddGetCal = 0x05,
    /// Start VDD calibration
    VddInitCal = 0x06,
    /// Finish VDD calibration with the externally measured voltage
    VddSaveCal = 0x07,
    /// Route VDD onto the VPP pin
    VddOnVpp = 0x08,
    /// Start VDD regulation
    VddStart = 0x09,
    /// Stop VDD regulation
    VddStop = 0x0A,
    /// VDD regulator status
    VddGetStatus = 0x0B,
    /// Restore a VDD calibration offset
    VddSetCal = 0x0C,
    /// Protocol version
    GetVersion = 0x0F,
    /// Restore a VPP calibration offset
    VppSetCal = 0x10,
    /// VPP output on/off
    VppCtrl = 0x11,
    /// Retarget VPP
    VppSetV = 0x12,
    /// Measured VPP
    VppGetV = 0x13,
    /// VPP duty cycle
    VppGetDuty = 0x14,
    /// VPP calibration offset
    VppGetCal = 0x15,
    /// Start VPP calibration
    VppInitCal = 0x16,
    /// Finish VPP calibration with the externally measured voltage
    VppSaveCal = 0x17,
    /// Route VPP onto A9
    VppOnA9 = 0x18,
    /// Route VPP onto A18
    VppOnA18 = 0x19,
    /// Route VPP onto CE
    VppOnCe = 0x1A,
    /// Route VPP onto OE
    VppOnOe = 0x1B,
    /// Route VPP onto WE
    VppOnWe = 0x1C,
    /// Start VPP regulation
    VppStart = 0x1D,
    /// Stop VPP regulation
    VppStop = 0x1E,
    /// VPP regulator status
    VppGetStatus = 0x1F,
    /// Assert/release CE
    BusCe = 0x21,
    /// Assert/release OE
    BusOe = 0x22,
    /// Assert/release WE
    BusWe = 0x23,
    /// Preset line state for an operation
    BusSetup = 0x24,
    /// Address to 0
    AddrClr = 0x31,
    /// Address + 1
    AddrInc = 0x32,
    /// Set the full address
    AddrSet = 0x33,
    /// Set address bits 0..8
    AddrSetB = 0x34,
    /// Set address bits 0..16
    AddrSetW = 0x35,
    /// Number of active address lines
    AddrWidth = 0x36,
    /// Data to 0
    DataClr = 0x41,
    /// Drive a byte
    DataSet = 0x42,
    /// Drive a word
    DataSetW = 0x43,
    /// Sample a byte
    DataGet = 0x44,
    /// Sample a word
    DataGetW = 0x45,
    /// Zero the staging buffer
    BufClear = 0x51,
    /// Store 16 bytes into the staging buffer
    BufWrite = 0x52,
    /// Fetch 16 bytes from the staging buffer
    BufRead = 0x53,
    /// Program pulse width
    DeviceSetTwp = 0x81,
    /// Write cycle time
    DeviceSetTwc = 0x82,
    /// Select the device
    DeviceConfigure = 0x83,
    /// Supply voltages
    DeviceSetVoltages = 0x84,
    /// Read into the staging buffer
    DeviceRead = 0x85,
    /// Program from the staging buffer
    DeviceProgram = 0x86,
    /// Verify against the staging buffer
    DeviceVerify = 0x88,
    /// Check a range is erased
    DeviceBlankCheck = 0x89,
    /// Manufacturer and device ID
    DeviceGetId = 0x8A,
    /// Erase the device
    DeviceErase = 0x8B,
    /// Disable write protection
    DeviceUnprotect = 0x8C,
    /// Enable write protection
    DeviceProtect = 0x8D,
    /// Engine lifecycle state
    DeviceState = 0x8E,
    /// Program attempts per cell
    DeviceSetAttempts = 0x8F,
}

const NONE: &[FieldKind] = &[];
const STATUS: &[FieldKind] = &[Byte, Float, Float, Float];
const BLOCK: &[FieldKind] = &[Dword, Dword, Dword, Dword];

impl Opcode {
    /// Every opcode, in wire order
    pub const ALL: [Opcode; 62] = [
        Self::Nop,
        Self::VddCtrl,
        Self::VddSetV,
        Self::VddGetV,
        Self::VddGetDuty,
        Self::VddGetCal,
        Self::VddInitCal,
        Self::VddSaveCal,
        Self::VddOnVpp,
        Self::VddStart,
        Self::VddStop,
        Self::VddGetStatus,
        Self::VddSetCal,
        Self::GetVersion,
        Self::VppSetCal,
        Self::VppCtrl,
        Self::VppSetV,
        Self::VppGetV,
        Self::VppGetDuty,
        Self::VppGetCal,
        Self::VppInitCal,
        Self::VppSaveCal,
        Self::VppOnA9,
        Self::VppOnA18,
        Self::VppOnCe,
        Self::VppOnOe,
        Self::VppOnWe,
        Self::VppStart,
        Self::VppStop,
        Self::VppGetStatus,
        Self::BusCe,
        Self::BusOe,
        Self::BusWe,
        Self::BusSetup,
        Self::AddrClr,
        Self::AddrInc,
        Self::AddrSet,
        Self::AddrSetB,
        Self::AddrSetW,
        Self::AddrWidth,
        Self::DataClr,
        Self::DataSet,
        Self::DataSetW,
        Self::DataGet,
        Self::DataGetW,
        Self::BufClear,
        Self::BufWrite,
        Self::BufRead,
        Self::DeviceSetTwp,
        Self::DeviceSetTwc,
        Self::DeviceConfigure,
        Self::DeviceSetVoltages,
        Self::DeviceRead,
        Self::DeviceProgram,
        Self::DeviceVerify,
        Self::DeviceBlankCheck,
        Self::DeviceGetId,
        Self::DeviceErase,
        Self::DeviceUnprotect,
        Self::DeviceProtect,
        Self::DeviceState,
        Self::DeviceSetAttempts,
    ];

    /// Opcode for a wire byte
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| *op as u8 == byte)
    }

    /// Fields of the request
    pub fn request(self) -> &'static [FieldKind] {
        match self {
            Self::VddCtrl
            | Self::VddOnVpp
            | Self::VppCtrl
            | Self::VppOnA9
            | Self::VppOnA18
            | Self::VppOnCe
            | Self::VppOnOe
            | Self::VppOnWe
            | Self::BusCe
            | Self::BusOe
            | Self::BusWe => &[Bool],
            Self::VddSetV
            | Self::VddSaveCal
            | Self::VddStart
            | Self::VddSetCal
            | Self::VppSetV
            | Self::VppSaveCal
            | Self::VppStart
            | Self::VppSetCal => &[Float],
            Self::BusSetup
            | Self::AddrSetB
            | Self::AddrWidth
            | Self::DataSet
            | Self::DeviceSetAttempts => &[Byte],
            Self::AddrSetW | Self::DataSetW | Self::BufRead => &[Word],
            Self::AddrSet | Self::DeviceSetTwp | Self::DeviceSetTwc => &[Dword],
            Self::BufWrite => &[Word, Dword, Dword, Dword, Dword],
            Self::DeviceConfigure => &[Byte, Word, Dword, Dword],
            Self::DeviceSetVoltages => &[Float, Float, Float],
            Self::DeviceRead | Self::DeviceProgram | Self::DeviceVerify => &[Dword, Word],
            Self::DeviceBlankCheck => &[Dword, Dword],
            _ => NONE,
        }
    }

    /// Fields of a successful response
    pub fn response(self) -> &'static [FieldKind] {
        match self {
            Self::GetVersion | Self::DataGetW => &[Word],
            Self::VddGetV
            | Self::VddGetDuty
            | Self::VddGetCal
            | Self::VddSaveCal
            | Self::VppGetV
            | Self::VppGetDuty
            | Self::VppGetCal
            | Self::VppSaveCal => &[Float],
            Self::VddGetStatus | Self::VppGetStatus => STATUS,
            Self::DataGet | Self::DeviceState => &[Byte],
            Self::BufRead => BLOCK,
            Self::DeviceGetId => &[Dword],
            _ => NONE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::field::schema_len;

    #[test]
    fn test_opcode_bytes_round_trip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x87), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(Opcode::VppSetCal as u8, 0x10);
        assert_eq!(Opcode::BufWrite as u8, 0x52);
        assert_eq!(Opcode::DeviceSetAttempts as u8, 0x8F);
    }

    #[test]
    fn test_payload_sizes() {
        assert_eq!(schema_len(Opcode::BufWrite.request()), 18);
        assert_eq!(schema_len(Opcode::DeviceConfigure.request()), 11);
        assert_eq!(schema_len(Opcode::VddGetStatus.response()), 13);
        assert_eq!(schema_len(Opcode::Nop.request()), 0);
    }
}
