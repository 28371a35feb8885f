/*!
    wire frame definitions shared by master and slaves

    a frame on the line is
    ```text
    BREAK, HEADER, HEADER_CRC, PAYLOAD[0 .. len], CRC
    ```
    where the header packs a message class and a slave address, see [Header]. Both CRCs are [crc8] runs started from [SEED]. Every byte a device sends is also heard back by itself, this is what the master and the slaves rely on to detect collisions.
*/

use bilge::prelude::*;


/// slave address on the bus, only the 5 low bits are meaningful
pub type Address = u8;

/// initial value of every CRC run, so that a frame of zeros does not pass trivially
pub const SEED: u8 = 0xC5;
/// byte sent by a slave once it accepted a master to slave message
pub const ACK: u8 = 0x55;

/// broadcast address, also used as scratch address when swapping two slaves
pub const BROADCAST: Address = 0;
/// first address a slave can be given
pub const FIRST_ADDRESS: Address = 1;
/// address no slave can be given
pub const RESERVED: Address = 31;
/// size of the address space
pub const MAX_ADDRESSES: usize = 32;
/// number of message classes a device can declare (class 7 is reserved for commands)
pub const MESSAGE_TYPES: usize = 8;
/// message class of command messages
pub const COMMAND_CLASS: u8 = 7;

/// bytes read back by the master for the break it sent
pub const BREAK_LEN: usize = 1;
/// header byte and its CRC
pub const HEADER_LEN: usize = 2;
pub const CRC_LEN: usize = 1;
pub const ACK_LEN: usize = 1;

/// line speed in bits per second
pub const BAUDRATE: u32 = 38_400;
/// duration of one character on the line in microseconds, counting 10 bits per character
pub const CHAR_TIME_US: u32 = 10 * 1_000_000 / BAUDRATE;


/// frame header byte
#[bitsize(8)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct Header {
    /// destination slave
    pub address: u5,
    /// message type, or [COMMAND_CLASS]
    pub class: u3,
}

/// header byte for the given message class and slave address
pub fn make_header(class: u8, address: Address) -> u8 {
    u8::from(Header::new(u5::new(address & 0x1f), u3::new(class & 0x7)))
}
/// message class and slave address packed in a header byte
pub fn split_header(byte: u8) -> (u8, Address) {
    let header = Header::from(byte);
    (header.class().value(), header.address().value())
}


const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {(crc << 1) ^ 0x31} else {crc << 1};
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}
/// CRC8 with polynomial 0x31, MSB first
static CRC8_TABLE: [u8; 256] = crc8_table();

/// update a running CRC with one byte
pub fn crc8(crc: u8, byte: u8) -> u8 {
    CRC8_TABLE[usize::from(crc ^ byte)]
}
/// update a running CRC with all the given bytes
pub fn crc8_over(crc: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(crc, |crc, &byte| crc8(crc, byte))
}
/// CRC of a whole run, as appended after a header or a payload
pub fn checksum(bytes: &[u8]) -> u8 {
    crc8_over(SEED, bytes)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_polynomial() {
        assert_eq!(&CRC8_TABLE[.. 8], &[0x00, 0x31, 0x62, 0x53, 0xc4, 0xf5, 0xa6, 0x97]);
        assert_eq!(CRC8_TABLE[255], 0xac);
    }

    #[test]
    fn appended_checksum_cancels() {
        let payloads: [&[u8]; 5] = [&[], &[0], &[1, 100], &[0xff; 17], b"multi drop bus"];
        for payload in payloads {
            let crc = checksum(payload);
            assert_eq!(crc8(crc8_over(SEED, payload), crc), 0, "payload {:?}", payload);
        }
    }

    #[test]
    fn empty_frame_is_not_zero() {
        assert_ne!(checksum(&[0, 0, 0, 0]), 0);
        assert_eq!(checksum(&[]), SEED);
    }

    #[test]
    fn header_packing() {
        assert_eq!(make_header(COMMAND_CLASS, 3), 0xe3);
        assert_eq!(make_header(1, 2), 0x22);
        for class in 0 .. 8 {
            for address in 0 .. 32 {
                assert_eq!(split_header(make_header(class, address)), (class, address));
            }
        }
    }
}
