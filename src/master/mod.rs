/*!
    implement an asynchronous PMLIN master in `std` environment.

    The central resource is the [Master] struct which owns the [Transport] to the bus and the knowledge of the devices expected on it. Every exchange is a request from the master immediately answered by one slave, so exchanges are serialized by the master: methods can be called concurrently on a shared master but they never overlap on the line.

    - one-shot exchanges: [Master::send_message], [Master::receive_message], [Master::send_command] and its typed variants
    - periodic exchanges: [Master::define_mirroring] then [Master::mirror_tick] on a steady clock
    - bus configuration: [Master::define_devices], [Master::check_config], [Master::auto_config]
*/

/// implementation of the bus exchanges
mod networking;
/// periodic exchanges of application buffers
mod mirroring;
/// address conflicts resolution
mod autoconfig;
/// transport over a serial port
mod serial;

pub use networking::{Master, Transport};
pub use mirroring::Mirror;
pub use autoconfig::{AutoConfig, Outcome};
pub use serial::SerialTransport;

use core::time::Duration;
use thiserror::Error;

use crate::frame::Address;


/// error regarding PMLIN communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with serial bus: {0}")]
    Bus(std::io::Error),
    #[error("no response from slave")]
    NoResponse,
    #[error("response is shorter than expected")]
    Timeout,
    #[error("response failed integrity check")]
    Crc,
    #[error("message not acknowledged by slave")]
    NoAck,
    #[error("address conflict with no free address to resolve it")]
    NoFreeAddress,
    #[error("device type does not match configuration")]
    TypeConflict,
    #[error("auto configuration did not converge")]
    Unconverged,
    #[error("problem detected on master side: {0}")]
    Master(&'static str),
}
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Bus(error)
    }
}
impl Error {
    /// the bus itself failed, no more exchange can be expected to succeed
    pub fn fatal(&self) -> bool {
        matches!(self, Self::Bus(_))
    }
}

/// error on an exchange with a specific device
#[derive(Error, Debug)]
#[error("device {address}: {source}")]
pub struct Failed {
    pub address: Address,
    #[source]
    pub source: Error,
}
impl Failed {
    pub fn new(address: Address, source: Error) -> Self {
        Self {address, source}
    }
}

/// tuning of the master behavior
#[derive(Clone, Debug)]
pub struct Settings {
    /// maximum silence on the line before an exchange is considered finished
    pub timeout: Duration,
    /// attempts before giving up a renumbering
    pub renumber_retries: u16,
    /// maximum number of corrections applied by auto configuration
    pub autoconfig_passes: u16,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            renumber_retries: 1000,
            autoconfig_passes: 256,
        }
    }
}
