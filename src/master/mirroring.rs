use core::fmt;
use std::{
    sync::Arc,
    vec::Vec,
    };
use log::*;

use crate::{
    mutex::BusyMutex,
    frame::Address,
    catalog::Direction,
    };
use super::{
    Error, Failed,
    networking::{Master, Transport},
    };


/**
    periodic exchange of one message of one device with an application buffer

    the buffer is shared with the application, it is sent to the slave or overwritten by the slave's message depending on the declared direction of the message. It must be at least as long as the declared message.

    [Master::mirror_tick] locks the buffer while holding the bus lock: a buffer guard must not be held across an `.await` on the [Master], or both tasks wait on each other forever.
*/
pub struct Mirror {
    pub address: Address,
    pub message: u8,
    pub buffer: Arc<BusyMutex<Vec<u8>>>,
    /// number of ticks between two exchanges, 0 disables the mirror
    pub period: u16,
    /// tick in the period at which the exchange happens
    pub phase: u16,
    ticker: u16,
}
impl Mirror {
    pub fn new(address: Address, message: u8, buffer: Arc<BusyMutex<Vec<u8>>>, period: u16, phase: u16) -> Self {
        Self {address, message, buffer, period, phase, ticker: 0}
    }
    /// position in the period of the next tick
    pub fn ticker(&self) -> u16 {self.ticker}

    /// move to next tick, return whether the exchange is due on this one
    fn advance(&mut self) -> bool {
        if self.period == 0 {
            return false
        }
        let due = self.ticker == self.phase;
        self.ticker = (self.ticker + 1) % self.period;
        due
    }
}
impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mirror device {} message {} period {} phase {} ticker {}",
            self.address, self.message, self.period, self.phase, self.ticker)
    }
}
impl fmt::Debug for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}


impl<T: Transport> Master<T> {
    /// replace the mirroring table, tickers restart from 0
    pub async fn define_mirroring(&self, mirrors: impl IntoIterator<Item=Mirror>) {
        let mirrors = mirrors.into_iter()
            .map(|mirror| Mirror {ticker: 0, .. mirror})
            .collect::<Vec<_>>();
        for mirror in &mirrors {
            debug!("{}", mirror);
        }
        self.lock().await.mirrors = mirrors;
    }

    /**
        advance all mirrors by one tick, and exchange the buffers whose turn it is

        to be called on a steady clock. Mirrors of devices or messages absent from the device directory are skipped. A failing exchange does not prevent the next ones, the first failure is returned. After a bus failure, the remaining mirrors only advance their tickers.
    */
    pub async fn mirror_tick(&self) -> Result<(), Failed> {
        let mut bus = self.lock().await;
        let mut mirrors = core::mem::take(&mut bus.mirrors);
        let mut failure = None;
        let mut stopped = false;

        for mirror in mirrors.iter_mut() {
            // tickers advance even once the bus failed, to keep the schedule
            if ! mirror.advance() || stopped {
                continue
            }
            let Some(slot) = bus.directory.get(mirror.address)
                .and_then(|declaration| declaration.slot(mirror.message))
                .filter(|slot| slot.used())
                .copied()
                else {continue};
            let len = usize::from(slot.length);

            let result = {
                let mut buffer = mirror.buffer.lock().await;
                if buffer.len() < len {
                    Err(Error::Master("mirror buffer is shorter than declared message"))
                }
                else {
                    match slot.direction {
                        Direction::ToSlave => bus.send_message(mirror.address, mirror.message, &buffer[.. len]).await,
                        Direction::ToMaster => bus.receive_message(mirror.address, mirror.message, &mut buffer[.. len]).await,
                    }
                }
            };
            if let Err(error) = result {
                debug!("mirror of device {} message {} failed: {}", mirror.address, mirror.message, error);
                stopped = error.fatal();
                failure.get_or_insert(Failed::new(mirror.address, error));
            }
        }
        bus.mirrors = mirrors;
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule() {
        let buffer = Arc::new(BusyMutex::new(Vec::new()));
        let mut mirror = Mirror::new(1, 0, buffer.clone(), 4, 1);
        let due = (0 .. 12).filter(|_| mirror.advance()).collect::<Vec<_>>();
        assert_eq!(due, [1, 5, 9]);

        let mut disabled = Mirror::new(1, 0, buffer.clone(), 0, 0);
        assert!((0 .. 12).all(|_| ! disabled.advance()));

        let mut every = Mirror::new(1, 0, buffer, 1, 0);
        assert!((0 .. 12).all(|_| every.advance()));
    }
}
