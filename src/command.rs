/*!
    command messages, the bus management frames every slave understands regardless of its device type

    a command is a frame of class [COMMAND_CLASS](crate::frame::COMMAND_CLASS) with a [COMMAND_LEN] bytes payload, always answered by a [COMMAND_LEN] bytes response from the slave.
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};

use crate::{
    pack_bilge,
    frame::Address,
    };


/// size of both command requests and command responses, CRC excluded
pub const COMMAND_LEN: usize = 5;

/// sub-command selected by the first byte of a command request
#[bitsize(8)]
#[derive(Copy, Clone, Default, FromBits, Debug, PartialEq)]
pub enum Opcode {
    /// check a slave is present, it answers random bytes
    #[default]
    Probe = 0,
    /// move a slave to the address given in the request argument
    Renum = 1,
    /// get the slave identity, the request argument controls its indicator
    Inquire = 2,
    #[fallback]
    Unknown = 255,
}
pack_bilge!(Opcode);

/// command request payload
#[derive(Copy, Clone, FromBytes, ToBytes, Debug, Default)]
pub struct Request {
    pub opcode: Opcode,
    /// new address for [Opcode::Renum], [Indicator] for [Opcode::Inquire]
    pub argument: u8,
    pub reserved: [u8; 3],
}
impl Request {
    pub fn probe() -> Self {
        Self {opcode: Opcode::Probe, .. Default::default()}
    }
    pub fn renumber(address: Address) -> Self {
        Self {opcode: Opcode::Renum, argument: address, .. Default::default()}
    }
    pub fn inquire(indicator: Indicator) -> Self {
        Self {opcode: Opcode::Inquire, argument: indicator.into(), .. Default::default()}
    }
    pub fn to_bytes(self) -> [u8; COMMAND_LEN] {
        let mut dst = [0; COMMAND_LEN];
        dst.copy_from_slice(self.to_be_bytes().as_ref());
        dst
    }
    pub fn from_bytes(bytes: &[u8; COMMAND_LEN]) -> Self {
        let mut src = <Self as FromBytes>::Bytes::zeroed();
        src.as_mut().copy_from_slice(bytes);
        Self::from_be_bytes(src)
    }
}

/// control of the slave's indicator (typically a LED), sent along [Opcode::Inquire]
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Indicator {
    /// let the master drive the indicator, otherwise the slave drives it on its own
    pub enable: bool,
    /// indicator state when enabled
    pub on: bool,
    _reserved: u6,
}
impl Indicator {
    /// leave the indicator to the slave
    pub fn released() -> Self {
        Self::from(0u8)
    }
    /// drive the indicator on or off
    pub fn driven(on: bool) -> Self {
        let mut indicator = Self::released();
        indicator.set_enable(true);
        indicator.set_on(on);
        indicator
    }
}

/// last byte of an inquiry response
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Revision {
    /// hardware revision of the device
    pub hardware: u7,
    /// state of the device's button, if any
    pub button: bool,
}
pack_bilge!(Revision);

/// response payload to [Opcode::Inquire]
#[derive(Copy, Clone, FromBytes, ToBytes, Debug)]
pub struct Inquiry {
    pub device_type: u16,
    pub firmware: u16,
    pub revision: Revision,
}
impl Inquiry {
    pub fn new(device_type: u16, firmware: u16, hardware: u8, button: bool) -> Self {
        Self {
            device_type,
            firmware,
            revision: Revision::new(u7::new(hardware & 0x7f), button),
        }
    }
    pub fn hardware(&self) -> u8 {self.revision.hardware().value()}
    pub fn button(&self) -> bool {self.revision.button()}

    pub fn to_bytes(self) -> [u8; COMMAND_LEN] {
        let mut dst = [0; COMMAND_LEN];
        dst.copy_from_slice(self.to_be_bytes().as_ref());
        dst
    }
    pub fn from_bytes(bytes: &[u8; COMMAND_LEN]) -> Self {
        let mut src = <Self as FromBytes>::Bytes::zeroed();
        src.as_mut().copy_from_slice(bytes);
        Self::from_be_bytes(src)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        assert_eq!(Request::probe().to_bytes(), [0, 0, 0, 0, 0]);
        assert_eq!(Request::renumber(7).to_bytes(), [1, 7, 0, 0, 0]);
        assert_eq!(Request::inquire(Indicator::driven(true)).to_bytes(), [2, 0b11, 0, 0, 0]);
        assert_eq!(Request::inquire(Indicator::released()).to_bytes(), [2, 0, 0, 0, 0]);

        let parsed = Request::from_bytes(&[1, 12, 0xaa, 0xbb, 0xcc]);
        assert_eq!(parsed.opcode, Opcode::Renum);
        assert_eq!(parsed.argument, 12);
        assert_eq!(Request::from_bytes(&[9, 0, 0, 0, 0]).opcode, Opcode::Unknown);
    }

    #[test]
    fn inquiry_layout() {
        let inquiry = Inquiry::new(0x0102, 0x0304, 5, true);
        assert_eq!(inquiry.to_bytes(), [0x01, 0x02, 0x03, 0x04, 0x85]);

        let parsed = Inquiry::from_bytes(&[0, 2, 1, 0, 0x01]);
        assert_eq!(parsed.device_type, 2);
        assert_eq!(parsed.firmware, 0x0100);
        assert_eq!(parsed.hardware(), 1);
        assert!(!parsed.button());
    }
}
