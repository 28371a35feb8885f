use core::time::Duration;
use std::{
    io,
    vec::Vec,
    };
use log::*;

use crate::{
    mutex::*,
    frame::*,
    command::{Request, Indicator, Inquiry, COMMAND_LEN},
    catalog::{Declaration, Directory},
    };
use super::{Error, Settings, mirroring::Mirror};


/// log target of the bus traffic dump
const TRAFFIC: &str = "pmlin::traffic";
/// longest frame the master can send or read back
const MAX_FRAME: usize = BREAK_LEN + HEADER_LEN + u8::MAX as usize + CRC_LEN + ACK_LEN;


/**
    access to the half-duplex line the slaves are connected to

    every byte written is also heard back by the master, after the byte heard for the break.
*/
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// emit a line break, discarding anything not read yet
    async fn send_break(&mut self) -> io::Result<()>;
    /// emit bytes on the line
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;
    /// read bytes heard on the line until `buffer` is full or the line remained silent for `timeout`, return the number of bytes read
    async fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize>;
}


/**
    PMLIN master async implementation

    it owns the transport and the configuration of the bus, all exchanges lock it for their whole duration
*/
pub struct Master<T> {
    bus: BusyMutex<Bus<T>>,
}
/// master state, only accessed under lock
pub(super) struct Bus<T> {
    pub transport: T,
    pub directory: Directory,
    pub mirrors: Vec<Mirror>,
    pub settings: Settings,
}

impl<T: Transport> Master<T> {
    /// initialize a master on the given transport with default settings
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, Settings::default())
    }
    pub fn with_settings(transport: T, settings: Settings) -> Self {
        Self {
            bus: BusyMutex::new(Bus {
                transport,
                directory: Directory::default(),
                mirrors: Vec::new(),
                settings,
            }),
        }
    }
    /// get back the transport, dropping the master's configuration
    pub fn into_transport(self) -> T {
        self.bus.into_inner().transport
    }
    /// exclusive access to the transport between two exchanges
    pub async fn with_transport<R>(&self, action: impl FnOnce(&mut T) -> R) -> R {
        action(&mut self.bus.lock().await.transport)
    }
    pub(super) async fn lock(&self) -> BusyMutexGuard<'_, Bus<T>> {
        self.bus.lock().await
    }

    pub async fn settings(&self) -> Settings {
        self.bus.lock().await.settings.clone()
    }
    pub async fn set_settings(&self, settings: Settings) {
        self.bus.lock().await.settings = settings;
    }

    /// replace the devices expected on the bus, indexed by their addresses
    pub async fn define_devices<'d>(&self, declarations: impl IntoIterator<Item=&'d Declaration>) -> Result<(), Error> {
        let directory = Directory::new(declarations).map_err(Error::Master)?;
        debug!("device directory:\n{}", directory);
        self.bus.lock().await.directory = directory;
        Ok(())
    }
    /// copy of the current device directory
    pub async fn directory(&self) -> Directory {
        self.bus.lock().await.directory.clone()
    }

    /// send a data message to a slave and wait for its acknowledgement
    pub async fn send_message(&self, address: Address, message: u8, payload: &[u8]) -> Result<(), Error> {
        self.bus.lock().await.send_message(address, message, payload).await
    }
    /// request a data message from a slave, `buffer` receives exactly its length in bytes
    pub async fn receive_message(&self, address: Address, message: u8, buffer: &mut [u8]) -> Result<(), Error> {
        self.bus.lock().await.receive_message(address, message, buffer).await
    }
    /// send a command to a slave and return its response
    pub async fn send_command(&self, address: Address, request: [u8; COMMAND_LEN]) -> Result<[u8; COMMAND_LEN], Error> {
        self.bus.lock().await.send_command(address, request).await
    }
    /// check a slave answers at the given address
    pub async fn probe(&self, address: Address) -> Result<(), Error> {
        self.bus.lock().await.probe(address).await
    }
    /// get the identity of a slave, driving its indicator meanwhile
    pub async fn inquire(&self, address: Address, indicator: Indicator) -> Result<Inquiry, Error> {
        self.bus.lock().await.inquire(address, indicator).await
    }
}

impl<T: Transport> Bus<T> {
    pub async fn send_message(&mut self, address: Address, message: u8, payload: &[u8]) -> Result<(), Error> {
        check_message(address, message)?;
        let len = u8::try_from(payload.len())
            .map_err(|_| Error::Master("payload is longer than maximum allowed message"))?;
        let len = usize::from(len);

        let mut frame = [0; MAX_FRAME];
        let sent = HEADER_LEN + len + CRC_LEN;
        write_header(&mut frame, message, address);
        frame[HEADER_LEN ..][.. len].copy_from_slice(payload);
        frame[HEADER_LEN + len] = checksum(payload);

        let mut received = [0; MAX_FRAME];
        let expected = BREAK_LEN + sent + ACK_LEN;
        let count = self.exchange(&frame[.. sent], &mut received[.. expected]).await?;
        let received = &received[.. count];

        let result = if count == sent + BREAK_LEN
            {Err(Error::NoResponse)}
        else if count != expected
            {Err(Error::Timeout)}
        else if received[BREAK_LEN + HEADER_LEN ..][.. len + CRC_LEN] != frame[HEADER_LEN ..][.. len + CRC_LEN]
            {Err(Error::Crc)}
        else if received[expected - 1] != ACK
            {Err(Error::NoAck)}
        else
            {Ok(())};
        dump("send", &frame[.. sent], received, BREAK_LEN + sent, &result);
        result
    }

    pub async fn receive_message(&mut self, address: Address, message: u8, buffer: &mut [u8]) -> Result<(), Error> {
        check_message(address, message)?;
        let len = u8::try_from(buffer.len())
            .map_err(|_| Error::Master("buffer is longer than maximum allowed message"))?;
        let len = usize::from(len);

        let mut frame = [0; HEADER_LEN];
        write_header(&mut frame, message, address);

        let mut received = [0; MAX_FRAME];
        let expected = BREAK_LEN + HEADER_LEN + len + CRC_LEN;
        let count = self.exchange(&frame, &mut received[.. expected]).await?;
        let response = &received[BREAK_LEN + HEADER_LEN .. expected];

        let result = if count == HEADER_LEN + BREAK_LEN
            {Err(Error::NoResponse)}
        else if count != expected
            {Err(Error::Timeout)}
        else if checksum(response) != 0
            {Err(Error::Crc)}
        else {
            buffer.copy_from_slice(&response[.. len]);
            Ok(())
        };
        dump("receive", &frame, &received[.. count], BREAK_LEN + HEADER_LEN, &result);
        result
    }

    pub async fn send_command(&mut self, address: Address, request: [u8; COMMAND_LEN]) -> Result<[u8; COMMAND_LEN], Error> {
        check_address(address)?;
        const SENT: usize = HEADER_LEN + COMMAND_LEN + CRC_LEN;
        const EXPECTED: usize = BREAK_LEN + SENT + COMMAND_LEN + CRC_LEN;

        let mut frame = [0; SENT];
        write_header(&mut frame, COMMAND_CLASS, address);
        frame[HEADER_LEN ..][.. COMMAND_LEN].copy_from_slice(&request);
        frame[HEADER_LEN + COMMAND_LEN] = checksum(&request);

        let mut received = [0; EXPECTED];
        let count = self.exchange(&frame, &mut received).await?;
        let response = &received[BREAK_LEN + SENT ..];

        let result = if count == SENT + BREAK_LEN
            {Err(Error::NoResponse)}
        else if count != EXPECTED
            {Err(Error::Timeout)}
        else if checksum(response) != 0
            {Err(Error::Crc)}
        else {
            let mut dst = [0; COMMAND_LEN];
            dst.copy_from_slice(&response[.. COMMAND_LEN]);
            Ok(dst)
        };
        dump("command", &frame, &received[.. count], BREAK_LEN + SENT, &result);
        result
    }

    pub async fn probe(&mut self, address: Address) -> Result<(), Error> {
        self.send_command(address, Request::probe().to_bytes()).await?;
        Ok(())
    }

    pub async fn inquire(&mut self, address: Address, indicator: Indicator) -> Result<Inquiry, Error> {
        let response = self.send_command(address, Request::inquire(indicator).to_bytes()).await?;
        Ok(Inquiry::from_bytes(&response))
    }

    /// break, send a frame and read back what the line carried after
    async fn exchange(&mut self, frame: &[u8], received: &mut [u8]) -> Result<usize, Error> {
        self.transport.send_break().await?;
        self.transport.write(frame).await?;
        Ok(self.transport.read(received, self.settings.timeout).await?)
    }
}

fn check_address(address: Address) -> Result<(), Error> {
    if usize::from(address) < MAX_ADDRESSES  {Ok(())}
    else {Err(Error::Master("address out of address space"))}
}
fn check_message(address: Address, message: u8) -> Result<(), Error> {
    check_address(address)?;
    if message < COMMAND_CLASS  {Ok(())}
    else {Err(Error::Master("message type is reserved for commands"))}
}
fn write_header(frame: &mut [u8], class: u8, address: Address) {
    let header = make_header(class, address);
    frame[0] = header;
    frame[1] = checksum(&[header]);
}

/// hex dump of an exchange, own echo in parenthesis and slave bytes in brackets
fn dump<R>(kind: &str, sent: &[u8], received: &[u8], echo: usize, result: &Result<R, Error>) {
    if ! log_enabled!(target: TRAFFIC, Level::Trace) {
        return
    }
    use core::fmt::Write;
    let mut line = std::string::String::new();
    for (i, byte) in received.iter().enumerate() {
        let _ = if i < echo {write!(line, "({:02X}) ", byte)} else {write!(line, "[{:02X}] ", byte)};
    }
    match result {
        Ok(_) => trace!(target: TRAFFIC, "{} {:02X?}: {}ok", kind, sent, line),
        Err(error) => trace!(target: TRAFFIC, "{} {:02X?}: {}{}", kind, sent, line, error),
    }
}
