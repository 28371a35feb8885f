/*!
    in-process emulation of a bus, to run a master against emulated slaves without hardware

    [PartyLine] is a [Transport] connecting the master to any number of [Slave] state machines. Time is simulated: the line advances one character at a time, each character being the wired-AND of everything transmitted during it, and slave timers tick every [TIMER_PERIOD_US] of simulated time. Reads end as soon as neither the master nor any slave has anything more to send, so a silent address does not cost a real timeout.
*/

use core::time::Duration;
use std::{
    io,
    vec::Vec,
    collections::VecDeque,
    };
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    frame::*,
    catalog::{Declaration, Direction},
    master::Transport,
    slave::{Slave, Firmware, Transfer, Identity},
    };


/// period of the slaves' timers in microseconds
pub const TIMER_PERIOD_US: u32 = 1000;


/// wired-AND line shared by the master and emulated slaves
pub struct PartyLine<F> {
    slaves: Vec<Slave<F>>,
    /// written by the master, not yet on the line
    outgoing: VecDeque<u8>,
    /// heard by the master, not yet read
    incoming: VecDeque<u8>,
    /// the next byte written by the master follows a break
    pending_break: bool,
    /// bytes heard by the master since the last break, break included
    heard: usize,
    /// one-shot corruptions of bytes heard by the master, as (index since break, xor mask)
    faults: Vec<(usize, u8)>,
    /// the next read fails as if the bus was lost
    broken: bool,
    /// simulated time in microseconds
    clock: u64,
    next_tick: u64,
}

impl<F: Firmware> PartyLine<F> {
    pub fn new(slaves: impl IntoIterator<Item=Slave<F>>) -> Self {
        Self {
            slaves: slaves.into_iter().collect(),
            outgoing: VecDeque::new(),
            incoming: VecDeque::new(),
            pending_break: false,
            heard: 0,
            faults: Vec::new(),
            broken: false,
            clock: 0,
            next_tick: u64::from(TIMER_PERIOD_US),
        }
    }
    pub fn slaves(&self) -> &[Slave<F>] {&self.slaves}
    pub fn slaves_mut(&mut self) -> &mut [Slave<F>] {&mut self.slaves}
    pub fn into_slaves(self) -> Vec<Slave<F>> {self.slaves}
    /// simulated time elapsed in microseconds
    pub fn elapsed(&self) -> u64 {self.clock}

    /**
        flip the bits of `mask` in the byte at `index` of the next read

        the index counts from the break, so 0 is the break itself and 1 the header. Only the master hears the corrupted byte, slaves hear the line intact.
    */
    pub fn corrupt(&mut self, index: usize, mask: u8) {
        self.faults.push((index, mask));
    }

    /// make the next read fail with an io error, the line itself is unaffected
    pub fn disconnect(&mut self) {
        self.broken = true;
    }

    /// advance the line by one character
    fn step(&mut self) {
        let master = self.outgoing.pop_front();
        let brk = master.is_some() && core::mem::take(&mut self.pending_break);

        let mut line = master;
        for slave in self.slaves.iter_mut() {
            if let Some(byte) = slave.on_transmit_empty() {
                line = Some(line.unwrap_or(0xff) & byte);
            }
        }
        if let Some(byte) = line {
            if brk {
                self.heard = 0;
                self.hear(0);
            }
            for slave in self.slaves.iter_mut() {
                slave.on_receive(byte, brk);
            }
            self.hear(byte);
        }

        self.clock += u64::from(CHAR_TIME_US);
        while self.clock >= self.next_tick {
            for slave in self.slaves.iter_mut() {
                slave.on_timer();
            }
            self.next_tick += u64::from(TIMER_PERIOD_US);
        }
    }
    fn hear(&mut self, mut byte: u8) {
        if let Some(position) = self.faults.iter().position(|&(index, _)| index == self.heard) {
            byte ^= self.faults.remove(position).1;
        }
        self.heard += 1;
        self.incoming.push_back(byte);
    }
    /// nothing will appear on the line anymore unless the master writes
    fn quiescent(&self) -> bool {
        self.outgoing.is_empty()
        && self.slaves.iter().all(|slave| ! slave.busy())
    }
}

impl<F: Firmware> Transport for PartyLine<F> {
    async fn send_break(&mut self) -> io::Result<()> {
        // whatever remains from the previous exchange is garbage now
        self.incoming.clear();
        self.outgoing.clear();
        self.pending_break = true;
        Ok(())
    }
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.outgoing.extend(data);
        Ok(())
    }
    async fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if core::mem::take(&mut self.broken) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "emulated bus disconnected"))
        }
        let timeout = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        let mut count = 0;
        let mut silence = 0;
        while count < buffer.len() {
            if let Some(byte) = self.incoming.pop_front() {
                buffer[count] = byte;
                count += 1;
                silence = 0;
                continue
            }
            if self.quiescent() || silence >= timeout {
                break
            }
            self.step();
            silence += u64::from(CHAR_TIME_US);
        }
        Ok(count)
    }
}


/// device type of [DemoDevice]
pub const DEMO_TYPE: u16 = 2;
/// message type of the demo device status, sent by the slave
pub const DEMO_STATUS: u8 = 0;
/// message type of the demo device control, received by the slave
pub const DEMO_CONTROL: u8 = 1;
pub const DEMO_LEN: u8 = 2;
pub const DEMO_IDENTITY: Identity = Identity {device_type: DEMO_TYPE, firmware: 0x0100, hardware: 1};

/// declaration of a [DemoDevice] at the given address
pub const fn demo_declaration(address: Address) -> Declaration {
    Declaration::new(address, DEMO_TYPE)
        .message(DEMO_STATUS, Direction::ToMaster, DEMO_LEN)
        .message(DEMO_CONTROL, Direction::ToSlave, DEMO_LEN)
}

/**
    simple device with one output

    bit 0 of the first control byte drives the output. The status is whatever the application sets in [Self::status].
*/
#[derive(Clone, Debug)]
pub struct DemoDevice {
    rng: StdRng,
    /// last control payload accepted
    pub control: [u8; DEMO_LEN as usize],
    /// status payload sent on request
    pub status: [u8; DEMO_LEN as usize],
    /// completed transfers
    pub transfers: usize,
    /// last address persisted
    pub persisted: Option<Address>,
    pub indicator: bool,
    pub button: bool,
    staged: [u8; DEMO_LEN as usize],
    index: usize,
}
impl DemoDevice {
    /// device whose random numbers are reproducible
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            control: [0; DEMO_LEN as usize],
            status: [0; DEMO_LEN as usize],
            transfers: 0,
            persisted: None,
            indicator: false,
            button: false,
            staged: [0; DEMO_LEN as usize],
            index: 0,
        }
    }
    pub fn output(&self) -> bool {
        self.control[0] & 1 != 0
    }
    /// slave state machine running a demo device at the given address
    pub fn slave(address: Address, seed: u64) -> Slave<Self> {
        Slave::new(Self::seeded(seed), address, DEMO_IDENTITY, TIMER_PERIOD_US)
    }
}
impl Firmware for DemoDevice {
    fn init_transfer(&mut self, message: u8) -> Transfer {
        self.index = 0;
        match message {
            DEMO_CONTROL => Transfer::Receive,
            DEMO_STATUS => Transfer::Transmit,
            _ => Transfer::Ignore,
        }
    }
    fn end_transfer(&mut self, message: u8) {
        if message == DEMO_CONTROL {
            self.control = self.staged;
        }
        self.transfers += 1;
    }
    fn store_byte(&mut self, byte: u8) -> bool {
        if let Some(staged) = self.staged.get_mut(self.index) {
            *staged = byte;
        }
        self.index += 1;
        self.index < self.staged.len()
    }
    fn fetch_byte(&mut self) -> Option<u8> {
        let byte = self.status.get(self.index).copied();
        self.index += 1;
        byte
    }
    fn random(&mut self) -> u16 {
        self.rng.random()
    }
    fn indicator(&mut self, enable: bool, on: bool) -> bool {
        if enable {
            self.indicator = on;
        }
        self.button
    }
    fn persist_address(&mut self, address: Address) {
        self.persisted = Some(address);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: core::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("failed to create runtime")
            .block_on(future)
    }

    #[test]
    fn break_is_heard() {
        let mut line = PartyLine::<DemoDevice>::new([]);
        let mut buffer = [0xaa; 4];
        let count = block_on(async {
            line.send_break().await.unwrap();
            line.write(&[0x12, 0x34]).await.unwrap();
            line.read(&mut buffer, Duration::from_secs(1)).await.unwrap()
        });
        assert_eq!(count, 3);
        assert_eq!(&buffer[.. 3], &[0, 0x12, 0x34]);
    }

    #[test]
    fn silence_ends_read() {
        let mut line = PartyLine::new([DemoDevice::slave(2, 1)]);
        let mut buffer = [0; 8];
        let count = block_on(async {
            line.send_break().await.unwrap();
            line.read(&mut buffer, Duration::from_millis(5)).await.unwrap()
        });
        assert_eq!(count, 0);
        assert!(line.elapsed() < 5_000);
    }

    #[test]
    fn disconnection_is_one_shot() {
        let mut line = PartyLine::<DemoDevice>::new([]);
        line.disconnect();
        let mut buffer = [0; 2];
        block_on(async {
            line.send_break().await.unwrap();
            line.write(&[0x10]).await.unwrap();
            assert!(line.read(&mut buffer, Duration::from_secs(1)).await.is_err());
            line.send_break().await.unwrap();
            line.write(&[0x10]).await.unwrap();
            assert_eq!(line.read(&mut buffer, Duration::from_secs(1)).await.unwrap(), 2);
        });
    }

    #[test]
    fn corruption_is_one_shot() {
        let mut line = PartyLine::<DemoDevice>::new([]);
        line.corrupt(2, 0x01);
        let mut buffer = [0; 3];
        block_on(async {
            line.send_break().await.unwrap();
            line.write(&[0x10, 0x20]).await.unwrap();
            line.read(&mut buffer, Duration::from_secs(1)).await.unwrap();
        });
        assert_eq!(buffer, [0, 0x10, 0x21]);
        block_on(async {
            line.send_break().await.unwrap();
            line.write(&[0x10, 0x20]).await.unwrap();
            line.read(&mut buffer, Duration::from_secs(1)).await.unwrap();
        });
        assert_eq!(buffer, [0, 0x10, 0x20]);
    }
}
