/*!
    slave side of the protocol, as an event driven state machine

    The slave does not own its uart: the integrator forwards the three events of the peripheral to [Slave] and the slave answers through its return values and through the [Firmware] callbacks. This fits a bare metal interrupt driven uart without any allocator or executor.

    - [Slave::on_receive] for each byte received, with the break flag of the uart
    - [Slave::on_transmit_empty] when the uart can take one more byte to send, only while the slave asked for it
    - [Slave::on_timer] on a periodic timer, to pace the renumbering backoff

    Handlers must not be called concurrently.
*/

use log::*;

use crate::{
    frame::*,
    command::*,
    };


/// what the device does with a data message addressed to it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// stay silent
    Ignore,
    /// receive the payload sent by the master, then acknowledge it
    Receive,
    /// send a payload to the master
    Transmit,
}

/// device specific behavior, provided by the slave firmware
pub trait Firmware {
    /// a valid request for the given message type arrived
    fn init_transfer(&mut self, message: u8) -> Transfer;
    /// the current message transfer completed successfully
    fn end_transfer(&mut self, message: u8);
    /// store one received payload byte, return whether more bytes are expected
    fn store_byte(&mut self, byte: u8) -> bool;
    /// next payload byte to transmit, `None` once the payload is exhausted
    fn fetch_byte(&mut self) -> Option<u8>;
    /// enable or disable the uart transmit empty events
    fn enable_transmit_empty(&mut self, _enable: bool) {}
    fn random(&mut self) -> u16;
    /// drive the indicator as requested by the master, return the button state
    fn indicator(&mut self, _enable: bool, _on: bool) -> bool {false}
    /// store the new address in non volatile memory
    fn persist_address(&mut self, address: Address);
}

/// slave identity reported on inquiry
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub device_type: u16,
    pub firmware: u16,
    pub hardware: u8,
}

/// protocol state of a slave
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    /// ignore everything until next break
    WaitBreak,
    /// receiving header and its CRC
    RxHeader,
    /// receiving a data message payload
    RxMessage,
    /// transmitting a data message payload
    TxMessage,
    /// receiving a command payload
    RxCommand,
    /// expecting the CRC of a data message payload
    CheckMessage,
    /// expecting the CRC of a command payload
    CheckCommand,
    /// acknowledging a received data message
    TxAck,
    /// transmitting a command response
    TxResponse,
    /// waiting for the random backoff before confirming a renumbering
    WaitRenumber,
    /// transmitting the renumbering confirmation while checking its echo
    TxRenumber,
}

/// state of the transmit empty events
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transmitter {
    /// nothing to send
    Idle,
    /// waiting transmit empty events
    Armed,
    /// last byte given to the uart, its echo did not come back yet
    Draining,
}


pub struct Slave<F> {
    firmware: F,
    identity: Identity,
    address: Address,
    state: State,
    transmitter: Transmitter,

    /// command request then response
    buffer: [u8; COMMAND_LEN],
    header: u8,
    message: u8,
    index: usize,
    length: usize,
    /// next byte of the renumbering confirmation to compare with the line
    verify: usize,
    crc: u8,

    target: Address,
    /// remaining renumbering backoff in microseconds
    timer: u32,
    timer_period: u32,
}

impl<F: Firmware> Slave<F> {
    /**
        create a slave with its persisted address

        `timer_period` is the period in microseconds at which [Self::on_timer] is called. An address out of the usable range falls back to the first usable address.
    */
    pub fn new(firmware: F, address: Address, identity: Identity, timer_period: u32) -> Self {
        let address = if (FIRST_ADDRESS .. RESERVED).contains(&address) {address} else {FIRST_ADDRESS};
        Self {
            firmware,
            identity,
            address,
            state: State::WaitBreak,
            transmitter: Transmitter::Idle,
            buffer: [0; COMMAND_LEN],
            header: 0,
            message: 0,
            index: 0,
            length: 0,
            verify: 0,
            crc: SEED,
            target: address,
            timer: 0,
            timer_period,
        }
    }
    pub fn set_timer_period(&mut self, period: u32) {
        self.timer_period = period;
    }

    pub fn address(&self) -> Address {self.address}
    pub fn identity(&self) -> &Identity {&self.identity}
    pub fn state(&self) -> State {self.state}
    pub fn transmitter(&self) -> Transmitter {self.transmitter}
    /// the slave still has something to send or to wait for before the line can be considered idle
    pub fn busy(&self) -> bool {
        self.transmitter != Transmitter::Idle
        || matches!(self.state, State::WaitRenumber | State::TxRenumber)
    }
    pub fn firmware(&self) -> &F {&self.firmware}
    pub fn firmware_mut(&mut self) -> &mut F {&mut self.firmware}

    /// a byte was received, `brk` tells a line break preceded it
    pub fn on_receive(&mut self, byte: u8, brk: bool) {
        if brk {
            self.stop();
            self.state = State::RxHeader;
            self.crc = SEED;
            self.index = 0;
        }
        else if self.transmitter == Transmitter::Draining {
            self.transmitter = Transmitter::Idle;
        }

        match self.state {
            State::RxHeader => {
                self.crc = crc8(self.crc, byte);
                if self.index == 0 {
                    self.header = byte;
                }
                self.index += 1;
                if self.index >= HEADER_LEN {
                    if self.crc != 0 {
                        self.state = State::WaitBreak;
                        return
                    }
                    let (class, address) = split_header(self.header);
                    self.accept_header(class, address);
                }
            },
            State::RxMessage => {
                self.crc = crc8(self.crc, byte);
                if ! self.firmware.store_byte(byte) {
                    self.state = State::CheckMessage;
                }
            },
            State::RxCommand => {
                self.crc = crc8(self.crc, byte);
                self.buffer[self.index] = byte;
                self.index += 1;
                if self.index >= self.length {
                    self.state = State::CheckCommand;
                }
            },
            State::CheckMessage | State::CheckCommand => {
                self.crc = crc8(self.crc, byte);
                if self.crc != 0 {
                    self.state = State::WaitBreak;
                    return
                }
                self.accept_message();
            },
            State::WaitRenumber => {
                debug!("slave {}: line busy before backoff elapsed, renumbering abandoned", self.address);
                self.state = State::WaitBreak;
            },
            State::TxRenumber => self.verify_renumber(byte),
            // own echoes and foreign traffic
            State::WaitBreak | State::TxMessage | State::TxAck | State::TxResponse => {},
        }
    }

    /// the uart can take one more byte, `None` if there is nothing to send anymore
    pub fn on_transmit_empty(&mut self) -> Option<u8> {
        if self.transmitter != Transmitter::Armed {
            return None
        }
        let data = match self.state {
            State::TxAck => {
                self.state = State::WaitBreak;
                self.drain();
                return Some(ACK)
            },
            State::TxMessage => self.firmware.fetch_byte(),
            State::TxResponse | State::TxRenumber => {
                if self.index < self.length {
                    self.index += 1;
                    Some(self.buffer[self.index - 1])
                }
                else {None}
            },
            _ => {
                self.stop();
                return None
            },
        };
        if let Some(byte) = data {
            self.crc = crc8(self.crc, byte);
            return Some(byte)
        }
        // payload exhausted, send its CRC
        self.drain();
        match self.state {
            State::TxMessage => {
                self.firmware.end_transfer(self.message);
                self.state = State::WaitBreak;
            },
            State::TxResponse => {
                self.state = State::WaitBreak;
            },
            // the echo of the CRC decides
            _ => {},
        }
        Some(self.crc)
    }

    /// periodic tick, paces the renumbering backoff
    pub fn on_timer(&mut self) {
        if self.state != State::WaitRenumber {
            return
        }
        if self.timer >= self.timer_period {
            self.timer -= self.timer_period;
        }
        else {
            self.timer = 0;
            self.crc = SEED;
            self.index = 0;
            self.length = COMMAND_LEN;
            self.verify = 0;
            self.state = State::TxRenumber;
            self.arm();
        }
    }

    fn accept_header(&mut self, class: u8, address: Address) {
        self.index = 0;
        self.crc = SEED;
        self.state = State::WaitBreak;
        if address != self.address {
            return
        }
        self.message = class;
        if class == COMMAND_CLASS {
            self.state = State::RxCommand;
            self.length = COMMAND_LEN;
        }
        else {
            match self.firmware.init_transfer(class) {
                Transfer::Receive => {
                    self.state = State::RxMessage;
                },
                Transfer::Transmit => {
                    self.state = State::TxMessage;
                    self.arm();
                },
                Transfer::Ignore => {},
            }
        }
    }

    fn accept_message(&mut self) {
        self.index = 0;
        self.crc = SEED;
        if self.state == State::CheckMessage {
            self.state = State::TxAck;
            self.arm();
            self.firmware.end_transfer(self.message);
            return
        }
        let request = Request::from_bytes(&self.buffer);
        match request.opcode {
            Opcode::Probe => {
                self.length = COMMAND_LEN;
                self.fill_random();
                self.state = State::TxResponse;
                self.arm();
            },
            Opcode::Renum => {
                self.target = request.argument & 0x1f;
                self.fill_random();
                self.state = State::WaitRenumber;
                // random [0 .. 31] times 2 characters
                self.timer = u32::from(self.firmware.random() & 0x1f) * 2 * CHAR_TIME_US;
                debug!("slave {}: renumbering to {} after {}us", self.address, self.target, self.timer);
            },
            Opcode::Inquire => {
                let indicator = Indicator::from(request.argument);
                let button = self.firmware.indicator(indicator.enable(), indicator.on());
                self.buffer = Inquiry::new(
                        self.identity.device_type,
                        self.identity.firmware,
                        self.identity.hardware,
                        button,
                        ).to_bytes();
                self.length = COMMAND_LEN;
                self.state = State::TxResponse;
                self.arm();
            },
            Opcode::Unknown => {
                self.state = State::WaitBreak;
            },
        }
    }

    fn verify_renumber(&mut self, byte: u8) {
        if self.verify < self.length {
            if byte != self.buffer[self.verify] {
                debug!("slave {}: renumbering to {} lost contention", self.address, self.target);
                self.stop();
                self.state = State::WaitBreak;
                return
            }
            self.verify += 1;
        }
        else {
            if byte == self.crc {
                debug!("slave {}: renumbered to {}", self.address, self.target);
                self.address = self.target;
                self.firmware.persist_address(self.address);
            }
            else {
                debug!("slave {}: renumbering to {} lost contention", self.address, self.target);
            }
            self.stop();
            self.state = State::WaitBreak;
        }
    }

    /// random filler so that two slaves answering together garble each other
    fn fill_random(&mut self) {
        for byte in self.buffer.iter_mut() {
            *byte = self.firmware.random() as u8;
        }
    }
    fn arm(&mut self) {
        self.transmitter = Transmitter::Armed;
        self.firmware.enable_transmit_empty(true);
    }
    fn drain(&mut self) {
        self.transmitter = Transmitter::Draining;
        self.firmware.enable_transmit_empty(false);
    }
    fn stop(&mut self) {
        if self.transmitter == Transmitter::Armed {
            self.firmware.enable_transmit_empty(false);
        }
        self.transmitter = Transmitter::Idle;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    /// device with one 2 bytes message in each direction
    struct Probe {
        seed: u16,
        persisted: Option<Address>,
        received: [u8; 2],
        stored: usize,
        sent: usize,
        ended: usize,
        transmit_enabled: bool,
    }
    impl Probe {
        fn new(seed: u16) -> Self {
            Self {seed, persisted: None, received: [0; 2], stored: 0, sent: 0, ended: 0, transmit_enabled: false}
        }
    }
    impl Firmware for Probe {
        fn init_transfer(&mut self, message: u8) -> Transfer {
            self.stored = 0;
            self.sent = 0;
            match message {
                0 => Transfer::Transmit,
                1 => Transfer::Receive,
                _ => Transfer::Ignore,
            }
        }
        fn end_transfer(&mut self, _message: u8) {self.ended += 1}
        fn store_byte(&mut self, byte: u8) -> bool {
            self.received[self.stored] = byte;
            self.stored += 1;
            self.stored < self.received.len()
        }
        fn fetch_byte(&mut self) -> Option<u8> {
            let data = [0x12, 0x34];
            let byte = data.get(self.sent).copied();
            self.sent += 1;
            byte
        }
        fn enable_transmit_empty(&mut self, enable: bool) {self.transmit_enabled = enable}
        fn random(&mut self) -> u16 {
            // xorshift
            self.seed ^= self.seed << 7;
            self.seed ^= self.seed >> 9;
            self.seed ^= self.seed << 8;
            self.seed
        }
        fn indicator(&mut self, _enable: bool, on: bool) -> bool {on}
        fn persist_address(&mut self, address: Address) {self.persisted = Some(address)}
    }

    const IDENTITY: Identity = Identity {device_type: 2, firmware: 0x0100, hardware: 1};

    fn frame(class: u8, address: Address, payload: &[u8]) -> ([u8; 16], usize) {
        let mut frame = [0; 16];
        let header = make_header(class, address);
        frame[0] = header;
        frame[1] = checksum(&[header]);
        frame[2 ..][.. payload.len()].copy_from_slice(payload);
        frame[2 + payload.len()] = checksum(payload);
        (frame, 3 + payload.len())
    }
    fn deliver<F: Firmware>(slaves: &mut [&mut Slave<F>], bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            for slave in slaves.iter_mut() {
                slave.on_receive(byte, i == 0);
            }
        }
    }
    /// run the line until every slave is idle, return the bytes seen on the line
    fn run<F: Firmware>(slaves: &mut [&mut Slave<F>], line: &mut [u8]) -> usize {
        let mut len = 0;
        for _ in 0 .. 10_000 {
            for slave in slaves.iter_mut() {
                slave.on_timer();
            }
            let mut sent = None;
            for slave in slaves.iter_mut() {
                if let Some(byte) = slave.on_transmit_empty() {
                    sent = Some(sent.unwrap_or(0xff) & byte);
                }
            }
            if let Some(byte) = sent {
                for slave in slaves.iter_mut() {
                    slave.on_receive(byte, false);
                }
                line[len] = byte;
                len += 1;
            }
            if slaves.iter().all(|slave| ! slave.busy()) {
                break
            }
        }
        len
    }

    #[test]
    fn out_of_range_address() {
        assert_eq!(Slave::new(Probe::new(1), 0, IDENTITY, 1000).address(), 1);
        assert_eq!(Slave::new(Probe::new(1), 31, IDENTITY, 1000).address(), 1);
        assert_eq!(Slave::new(Probe::new(1), 30, IDENTITY, 1000).address(), 30);
    }

    #[test]
    fn receive_message() {
        let mut slave = Slave::new(Probe::new(1), 2, IDENTITY, 1000);
        let (bytes, len) = frame(1, 2, &[1, 100]);
        deliver(&mut [&mut slave], &bytes[.. len]);
        assert_eq!(slave.state(), State::TxAck);
        assert!(slave.firmware().transmit_enabled);
        assert_eq!(slave.firmware().received, [1, 100]);

        let mut line = [0; 8];
        assert_eq!(run(&mut [&mut slave], &mut line), 1);
        assert_eq!(line[0], ACK);
        assert_eq!(slave.firmware().ended, 1);
        assert_eq!(slave.state(), State::WaitBreak);
        assert_eq!(slave.transmitter(), Transmitter::Idle);
        assert!(!slave.firmware().transmit_enabled);
    }

    #[test]
    fn transmit_message() {
        let mut slave = Slave::new(Probe::new(1), 2, IDENTITY, 1000);
        let header = make_header(0, 2);
        deliver(&mut [&mut slave], &[header, checksum(&[header])]);
        assert_eq!(slave.state(), State::TxMessage);

        let mut line = [0; 8];
        assert_eq!(run(&mut [&mut slave], &mut line), 3);
        assert_eq!(&line[.. 3], &[0x12, 0x34, checksum(&[0x12, 0x34])]);
        assert_eq!(slave.firmware().ended, 1);
    }

    #[test]
    fn silent_on_corruption() {
        let mut slave = Slave::new(Probe::new(1), 2, IDENTITY, 1000);
        // foreign address
        let (bytes, len) = frame(1, 3, &[1, 100]);
        deliver(&mut [&mut slave], &bytes[.. len]);
        assert_eq!(slave.state(), State::WaitBreak);
        // corrupted header
        let (mut bytes, len) = frame(1, 2, &[1, 100]);
        bytes[1] ^= 0x10;
        deliver(&mut [&mut slave], &bytes[.. len]);
        assert_eq!(slave.state(), State::WaitBreak);
        // corrupted payload
        let (mut bytes, len) = frame(1, 2, &[1, 100]);
        bytes[3] ^= 0x01;
        deliver(&mut [&mut slave], &bytes[.. len]);
        assert_eq!(slave.state(), State::WaitBreak);
        assert!(!slave.busy());
        assert_eq!(slave.firmware().ended, 0);
    }

    #[test]
    fn inquire() {
        let mut slave = Slave::new(Probe::new(1), 5, IDENTITY, 1000);
        let (bytes, len) = frame(COMMAND_CLASS, 5, &Request::inquire(Indicator::driven(true)).to_bytes());
        deliver(&mut [&mut slave], &bytes[.. len]);
        assert_eq!(slave.state(), State::TxResponse);

        let mut line = [0; 8];
        assert_eq!(run(&mut [&mut slave], &mut line), COMMAND_LEN + 1);
        assert_eq!(checksum(&line[.. COMMAND_LEN + 1]), 0);
        let inquiry = Inquiry::from_bytes(line[.. COMMAND_LEN].try_into().unwrap());
        assert_eq!(inquiry.device_type, 2);
        assert_eq!(inquiry.firmware, 0x0100);
        assert_eq!(inquiry.hardware(), 1);
        assert!(inquiry.button());
    }

    #[test]
    fn renumber_alone() {
        let mut slave = Slave::new(Probe::new(0x1234), 3, IDENTITY, 1000);
        let (bytes, len) = frame(COMMAND_CLASS, 3, &Request::renumber(9).to_bytes());
        deliver(&mut [&mut slave], &bytes[.. len]);
        assert_eq!(slave.state(), State::WaitRenumber);
        assert!(slave.busy());

        let mut line = [0; 8];
        assert_eq!(run(&mut [&mut slave], &mut line), COMMAND_LEN + 1);
        assert_eq!(checksum(&line[.. COMMAND_LEN + 1]), 0);
        assert_eq!(slave.address(), 9);
        assert_eq!(slave.firmware().persisted, Some(9));
    }

    #[test]
    fn renumber_abandoned_on_traffic() {
        let mut slave = Slave::new(Probe::new(0x1234), 3, IDENTITY, 1000);
        let (bytes, len) = frame(COMMAND_CLASS, 3, &Request::renumber(9).to_bytes());
        deliver(&mut [&mut slave], &bytes[.. len]);
        slave.on_receive(0x42, false);
        assert_eq!(slave.state(), State::WaitBreak);
        slave.on_timer();
        assert!(!slave.busy());
        assert_eq!(slave.address(), 3);
        assert_eq!(slave.firmware().persisted, None);
    }

    #[test]
    fn renumber_contention() {
        for seed in 1 .. 64 {
            let mut first = Slave::new(Probe::new(seed), 3, IDENTITY, 1000);
            let mut second = Slave::new(Probe::new(seed.wrapping_mul(7919)), 3, IDENTITY, 1000);
            let (bytes, len) = frame(COMMAND_CLASS, 3, &Request::renumber(9).to_bytes());
            deliver(&mut [&mut first, &mut second], &bytes[.. len]);

            let mut line = [0; 16];
            run(&mut [&mut first, &mut second], &mut line);
            let committed = [&first, &second].iter()
                .filter(|slave| slave.address() == 9)
                .count();
            assert!(committed <= 1, "seed {}", seed);
            for slave in [&first, &second] {
                assert_eq!(slave.address() == 9, slave.firmware().persisted == Some(9));
            }
        }
    }
}
