use core::time::Duration;
use std::{
    io,
    path::Path,
    };
use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};

use crate::frame::BAUDRATE;
use super::Transport;


/**
    [Transport] over a serial port, typically an usb adapter wired to the bus through a LIN transceiver

    the line is 8 data bits, 2 stop bits, no parity.
*/
pub struct SerialTransport {
    port: SerialPort,
    rate: u32,
}
impl SerialTransport {
    /// open the given serial port file with the given baud rate
    pub fn open(path: impl AsRef<Path>, rate: u32) -> io::Result<Self> {
        let port = SerialPort::open(path, |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(rate)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::Two);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        port.discard_buffers()?;
        Ok(Self {port, rate})
    }
    /// open the given serial port file at the standard baud rate
    pub fn open_default(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::open(path, BAUDRATE)
    }
    pub fn port(&self) -> &SerialPort {&self.port}
}

impl Transport for SerialTransport {
    /// a zero byte sent at half the baud rate looks like a break at the nominal baud rate, this works with adapters that cannot emit breaks
    async fn send_break(&mut self) -> io::Result<()> {
        self.port.discard_buffers()?;
        let mut settings = self.port.get_configuration()?;
        settings.set_baud_rate(self.rate / 2)?;
        self.port.set_configuration(&settings)?;

        self.port.write_all(&[0]).await?;
        // the byte must have left the uart before switching back
        let char_time = Duration::from_micros(10 * 1_000_000 / u64::from(self.rate / 2));
        tokio::time::sleep(4 * char_time).await;

        settings.set_baud_rate(self.rate)?;
        self.port.set_configuration(&settings)?;
        Ok(())
    }
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }
    async fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let mut count = 0;
        while count < buffer.len() {
            match tokio::time::timeout(timeout, self.port.read(&mut buffer[count ..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(received)) => count += received,
                Ok(Err(error)) if error.kind() == io::ErrorKind::TimedOut => break,
                Ok(Err(error)) => return Err(error),
                // silence on the line
                Err(_) => break,
            }
        }
        Ok(count)
    }
}
