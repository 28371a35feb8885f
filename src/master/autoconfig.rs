/*!
    bring the slaves' addresses in agreement with the device directory

    Slaves have no identity besides their address and device type, and several slaves can share the same address after being plugged. The auto configuration relies on the wired-AND line: two slaves answering together garble their random responses, so a corrupted response reveals an address conflict. Conflicts are resolved using the slaves' randomized renumbering, which only lets one of the conflicting slaves move.

    Corrections are applied one at a time, each followed by a new pass on the updated knowledge of the bus:

    1. scan the addresses with unknown state
    2. move one slave out of a conflicting address to a free address
    3. move an undeclared slave to the address of a declared but missing one
    4. swap two slaves whose device types are at each other's declared address
*/

use core::fmt;
use log::*;

use crate::{
    frame::*,
    command::{Indicator, Request},
    };
use super::{
    Error, Failed,
    networking::{Master, Transport, Bus},
    };


/// overall effect of an auto configuration
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Outcome {
    /// the bus already matched the directory
    Unchanged,
    /// some slaves were renumbered, see [AutoConfig::renumbered]
    Renumbered,
    /// slaves had to be swapped to match device types
    Swapped,
}

/// report of a successful auto configuration
#[derive(Clone, Debug)]
pub struct AutoConfig {
    pub outcome: Outcome,
    /// addresses involved in a renumbering, their slaves might not be the expected ones
    pub renumbered: [bool; MAX_ADDRESSES],
}
impl AutoConfig {
    fn record(&mut self, correction: Correction) {
        match correction {
            Correction::Conflict {from, to} | Correction::Moved {from, to} => {
                self.renumbered[usize::from(from)] = true;
                self.renumbered[usize::from(to)] = true;
                self.outcome = self.outcome.max(Outcome::Renumbered);
            },
            Correction::Swapped {..} => {
                self.outcome = self.outcome.max(Outcome::Swapped);
            },
        }
    }
}

/// what is known of an address
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Presence {
    Unknown,
    /// one slave answered
    Present,
    /// nobody answered
    Absent,
    /// the answer was corrupted, most likely several slaves answered
    Garbled,
}

/// knowledge of the bus gathered by the passes
struct Survey {
    presence: [Presence; MAX_ADDRESSES],
    types: [Option<u16>; MAX_ADDRESSES],
}

/// one change applied to the bus
#[derive(Copy, Clone, Debug)]
enum Correction {
    Conflict {from: Address, to: Address},
    Moved {from: Address, to: Address},
    Swapped {first: Address, second: Address},
}
impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict {from, to} => write!(f, "address conflict on {}, one slave moved to {}", from, to),
            Self::Moved {from, to} => write!(f, "undeclared slave {} moved to missing {}", from, to),
            Self::Swapped {first, second} => write!(f, "slaves {} and {} swapped to match device types", first, second),
        }
    }
}

enum Pass {
    Converged,
    Retry(Correction),
}

/// addresses a slave can have
fn usable() -> impl Iterator<Item=Address> {
    FIRST_ADDRESS .. RESERVED
}


impl<T: Transport> Master<T> {
    /**
        move the slave at `old` address to `new` address

        the command is repeated until one slave confirms the move. When several slaves share `old` address, only one of them moves. `new` can be any usable address or [BROADCAST], which serves as a scratch address.
    */
    pub async fn renumber(&self, old: Address, new: Address) -> Result<(), Error> {
        self.lock().await.renumber(old, new).await
    }

    /// check every declared device answers with the declared device type
    pub async fn check_config(&self) -> Result<(), Failed> {
        self.lock().await.check_config().await
    }

    /**
        renumber slaves until the bus matches the device directory

        fails when an address conflict or type conflict cannot be resolved, or when renumbering fails. A success does not mean all declared devices are present, use [Self::check_config] for this.
    */
    pub async fn auto_config(&self) -> Result<AutoConfig, Error> {
        self.lock().await.auto_config().await
    }
}

impl<T: Transport> Bus<T> {
    async fn renumber(&mut self, old: Address, new: Address) -> Result<(), Error> {
        // the slave only keeps 5 bits of its new address
        if new >= RESERVED {
            return Err(Error::Master("renumbering target is not a usable address"))
        }
        let mut last = Error::Master("no renumbering attempt allowed");
        for _ in 0 .. self.settings.renumber_retries {
            match self.send_command(old, Request::renumber(new).to_bytes()).await {
                Ok(_) => return Ok(()),
                Err(error) if error.fatal() => return Err(error),
                Err(error) => last = error,
            }
        }
        Err(last)
    }

    async fn check_config(&mut self) -> Result<(), Failed> {
        let directory = self.directory.clone();
        for declaration in directory.iter() {
            let address = declaration.address;
            if ! usable().any(|usable| usable == address) {
                continue
            }
            self.probe(address).await
                .map_err(|error| Failed::new(address, error))?;
            let inquiry = self.inquire(address, Indicator::released()).await
                .map_err(|error| Failed::new(address, error))?;
            if inquiry.device_type != declaration.device_type {
                return Err(Failed::new(address, Error::TypeConflict));
            }
        }
        Ok(())
    }

    async fn auto_config(&mut self) -> Result<AutoConfig, Error> {
        info!("auto configuration starting");
        let mut survey = Survey {
            presence: [Presence::Unknown; MAX_ADDRESSES],
            types: [None; MAX_ADDRESSES],
        };
        let mut report = AutoConfig {
            outcome: Outcome::Unchanged,
            renumbered: [false; MAX_ADDRESSES],
        };
        for _ in 0 .. self.settings.autoconfig_passes {
            match self.autoconfig_pass(&mut survey).await? {
                Pass::Converged => {
                    for address in usable() {
                        if survey.presence[usize::from(address)] == Presence::Present && self.directory.get(address).is_none() {
                            warn!("undeclared slave at address {}", address);
                        }
                    }
                    info!("auto configuration done: {:?}", report.outcome);
                    return Ok(report)
                },
                Pass::Retry(correction) => {
                    warn!("{}", correction);
                    report.record(correction);
                },
            }
        }
        Err(Error::Unconverged)
    }

    async fn autoconfig_pass(&mut self, survey: &mut Survey) -> Result<Pass, Error> {
        self.scan(survey).await?;

        // one address conflict
        if let Some(conflict) = usable().find(|&address| survey.presence[usize::from(address)] == Presence::Garbled) {
            let free = usable().find(|&address| survey.presence[usize::from(address)] == Presence::Absent)
                .ok_or(Error::NoFreeAddress)?;
            self.renumber(conflict, free).await?;
            // both must be scanned again
            survey.presence[usize::from(conflict)] = Presence::Unknown;
            survey.presence[usize::from(free)] = Presence::Unknown;
            return Ok(Pass::Retry(Correction::Conflict {from: conflict, to: free}));
        }

        // one extra device replacing a missing one
        let (mut extra, mut missing) = (None, None);
        for address in usable() {
            let declared = self.directory.get(address).is_some();
            match survey.presence[usize::from(address)] {
                Presence::Absent if declared => missing = Some(address),
                Presence::Present if ! declared => extra = Some(address),
                _ => {},
            }
            if let (Some(from), Some(to)) = (extra, missing) {
                self.renumber(from, to).await?;
                survey.presence[usize::from(to)] = Presence::Present;
                survey.presence[usize::from(from)] = Presence::Absent;
                survey.types[usize::from(to)] = survey.types[usize::from(from)].take();
                return Ok(Pass::Retry(Correction::Moved {from, to}));
            }
        }

        // one type conflict
        let conflict = usable().find(|&address| {
            survey.presence[usize::from(address)] == Presence::Present
            && self.directory.device_type(address)
                .is_some_and(|declared| survey.types[usize::from(address)] != Some(declared))
        });
        if let Some(first) = conflict {
            let declared = self.directory.device_type(first);
            debug!("device {} has type {:?} instead of {:?}", first, survey.types[usize::from(first)], declared);
            // a device of the expected type that is not at its right place either
            let Some(second) = (first + 1 .. RESERVED).find(|&address| {
                survey.types[usize::from(address)] == declared
                && self.directory.device_type(address) != declared
            })
            else {
                warn!("type conflict on device {} cannot be resolved", first);
                return Err(Error::TypeConflict);
            };
            self.renumber(second, BROADCAST).await?;
            self.renumber(first, second).await?;
            self.renumber(BROADCAST, first).await?;
            survey.types.swap(usize::from(first), usize::from(second));
            return Ok(Pass::Retry(Correction::Swapped {first, second}));
        }

        Ok(Pass::Converged)
    }

    /// probe and inquire every address whose state is not known
    async fn scan(&mut self, survey: &mut Survey) -> Result<(), Error> {
        for address in usable() {
            let index = usize::from(address);
            if matches!(survey.presence[index], Presence::Present | Presence::Absent) {
                continue
            }
            survey.types[index] = None;
            survey.presence[index] = match self.probe(address).await {
                Ok(()) => {
                    match self.inquire(address, Indicator::released()).await {
                        Ok(inquiry) => {
                            survey.types[index] = Some(inquiry.device_type);
                        },
                        Err(error) if error.fatal() => return Err(error),
                        Err(error) => debug!("device {} answered probe but not inquiry: {}", address, error),
                    }
                    Presence::Present
                },
                Err(Error::NoResponse) => Presence::Absent,
                Err(error) if error.fatal() => return Err(error),
                Err(error) => {
                    debug!("device {} garbled: {}", address, error);
                    Presence::Garbled
                },
            };
            debug!("scanned device {}: {:?} type {:?}", address, survey.presence[index], survey.types[index]);
        }
        Ok(())
    }
}
