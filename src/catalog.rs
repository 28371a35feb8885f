/*!
    declaration of the messages a device type exposes

    each device type declares up to [MESSAGE_TYPES] messages, each with a fixed direction and payload length. The master needs these declarations to know how to exchange with a slave, and the slave firmware uses the same declaration to classify incoming requests.
*/

use core::fmt;

use crate::frame::{Address, MESSAGE_TYPES, MAX_ADDRESSES};


/// direction of a message payload
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// the master sends the payload and the slave acknowledges it
    #[default]
    ToSlave,
    /// the master requests the payload from the slave
    ToMaster,
}

/// one message type of a device
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slot {
    pub direction: Direction,
    /// payload length in bytes, 0 when the message type is not used
    pub length: u8,
}
impl Slot {
    pub const fn new(direction: Direction, length: u8) -> Self {
        Self {direction, length}
    }
    pub const fn unused() -> Self {
        Self::new(Direction::ToSlave, 0)
    }
    pub const fn used(&self) -> bool {self.length != 0}
}

/// a device expected at a given address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub address: Address,
    pub device_type: u16,
    /// message slots indexed by message type
    pub messages: [Slot; MESSAGE_TYPES],
}
impl Declaration {
    /// declaration with no message used yet
    pub const fn new(address: Address, device_type: u16) -> Self {
        Self {
            address,
            device_type,
            messages: [Slot::unused(); MESSAGE_TYPES],
        }
    }
    /**
        declare one message type, to be chained

        # Panics
        if `message` is not below [MESSAGE_TYPES], at compile time in const declarations
    */
    pub const fn message(mut self, message: u8, direction: Direction, length: u8) -> Self {
        assert!((message as usize) < MESSAGE_TYPES, "message type out of range");
        self.messages[message as usize] = Slot::new(direction, length);
        self
    }
    /// declaration for the same device type at an other address
    pub const fn at(mut self, address: Address) -> Self {
        self.address = address;
        self
    }
    pub fn slot(&self, message: u8) -> Option<&Slot> {
        self.messages.get(usize::from(message))
    }
}
impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {} type {}", self.address, self.device_type)?;
        for (message, slot) in self.messages.iter().enumerate() {
            if slot.used() {
                write!(f, "\n  message {}: {:?} {} bytes", message, slot.direction, slot.length)?;
            }
        }
        Ok(())
    }
}

/// declarations indexed by address
#[derive(Clone, Debug)]
pub struct Directory {
    devices: [Option<Declaration>; MAX_ADDRESSES],
}
impl Default for Directory {
    fn default() -> Self {
        Self {devices: [None; MAX_ADDRESSES]}
    }
}
impl Directory {
    /// directory of the given declarations, a later declaration replaces an earlier one at the same address
    pub fn new<'d>(declarations: impl IntoIterator<Item=&'d Declaration>) -> Result<Self, &'static str> {
        let mut directory = Self::default();
        for declaration in declarations {
            let slot = directory.devices.get_mut(usize::from(declaration.address))
                .ok_or("device address out of address space")?;
            *slot = Some(*declaration);
        }
        Ok(directory)
    }
    pub fn get(&self, address: Address) -> Option<&Declaration> {
        self.devices.get(usize::from(address))?.as_ref()
    }
    /// declared device type at the given address
    pub fn device_type(&self, address: Address) -> Option<u16> {
        self.get(address).map(|declaration| declaration.device_type)
    }
    pub fn iter(&self) -> impl Iterator<Item=&Declaration> {
        self.devices.iter().flatten()
    }
    pub fn len(&self) -> usize {self.iter().count()}
    pub fn is_empty(&self) -> bool {self.len() == 0}
}
impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for declaration in self.iter() {
            writeln!(f, "{}", declaration)?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const SENSOR: Declaration = Declaration::new(4, 9)
        .message(0, Direction::ToMaster, 6)
        .message(3, Direction::ToSlave, 1);

    #[test]
    #[should_panic(expected = "message type out of range")]
    fn message_out_of_range() {
        let _ = Declaration::new(1, 2).message(MESSAGE_TYPES as u8, Direction::ToSlave, 2);
    }

    #[test]
    fn declaration_slots() {
        assert_eq!(SENSOR.slot(0), Some(&Slot::new(Direction::ToMaster, 6)));
        assert_eq!(SENSOR.slot(3), Some(&Slot::new(Direction::ToSlave, 1)));
        assert!(!SENSOR.slot(1).unwrap().used());
        assert_eq!(SENSOR.slot(8), None);
        assert_eq!(SENSOR.at(12).address, 12);
        assert_eq!(SENSOR.at(12).messages, SENSOR.messages);
    }

    #[test]
    fn directory_lookup() {
        let directory = Directory::new(&[SENSOR, SENSOR.at(9), Declaration::new(4, 1)]).unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.device_type(4), Some(1));
        assert_eq!(directory.device_type(9), Some(9));
        assert_eq!(directory.device_type(5), None);
        assert_eq!(directory.device_type(200), None);
        assert!(Directory::new(&[SENSOR.at(32)]).is_err());
        assert!(Directory::default().is_empty());
    }
}
