/*!
    PMLIN is a master/slave protocol for cheap multi-drop device networks.

    One master polls up to 30 slaves over a single half-duplex wired-AND serial line. Every frame starts with a line break, carries a one byte header packing a message class and a slave address, and is protected by CRC8. Slaves hold no pre-flashed identity: the master finds and resolves address collisions itself thanks to the slaves' randomized and self-verifying renumbering.

    - [frame] and [command] are the wire definitions shared by both sides
    - [catalog] describes the messages a device exposes
    - [master] is the async bus master (feature `master`)
    - [slave] is the interrupt driven slave state machine (feature `slave`), it does not need `std` nor an allocator
    - [emulator] connects a master to emulated slaves in the same process (feature `emulator`)
*/
#![no_std]
#[cfg(feature = "std")]
extern crate std;

mod utils;

pub mod frame;
pub mod command;
pub mod catalog;
#[cfg(feature = "master")]
mod mutex;
#[cfg(feature = "master")]
pub mod master;
#[cfg(feature = "slave")]
pub mod slave;
#[cfg(feature = "emulator")]
pub mod emulator;

#[cfg(feature = "master")]
pub use mutex::{BusyMutex, BusyMutexGuard};
