//! USB control-transfer race primitives for DFU-mode devices, based on [`nusb`]
//!
//! The core is [RaceDriver::race_transfer]: a control request is submitted
//! asynchronously on endpoint 0, held open for a precisely bounded window
//! (an active spin, not a sleep) and cancelled before it completes. Plain
//! blocking control transfers ([RaceDriver::synchronous_transfer]) probe
//! the device state around the race.
//!
//! Requests are built byte-exact by [build_setup] and [build_transfer];
//! the host stack sits behind the [ControlHost] trait, implemented for
//! real devices by [NusbHost].
//!
//! # Example
//!
//! ```no_run
//! use dfu_race::{RaceConfig, find_dfu_targets};
//!
//! let targets = find_dfu_targets(Some(0x05ac), Some(0x1227))?;
//! if let Some(target) = targets.first() {
//!     let mut session = target.open(RaceConfig::default())?;
//!     session.usb_req_stall();
//!     if let Err(e) = session.stall() {
//!         eprintln!("Error: {e}");
//!     }
//!     session.release();
//! }
//! # Ok::<(), dfu_race::RaceError>(())
//! ```
//!
//! [`nusb`]: https://docs.rs/nusb

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000u64);

mod connection;
mod device;
mod error;
mod host;
#[cfg(test)]
mod mock;
mod race;
mod serial;
mod setup;
mod spin;

use std::time::Duration;

// Re-exports
pub use connection::{NusbHost, NusbPending};
pub use device::{DfuSession, DfuTarget, find_dfu_targets};
pub use error::{HostError, RaceError};
pub use host::{ControlHost, TransferState};
pub use race::{
    CLEAR_HALT_REQUEST, DEFAULT_STALL_WINDOW, DESCRIPTOR_REQUEST,
    DFU_DOWNLOAD_REQUEST, MAX_PACKET_SIZE, RaceConfig, RaceDriver,
    STALL_PAYLOAD_LEN,
};
pub use serial::{EXPLOITED_MARKER, SerialInfo, is_exploited};
pub use setup::{
    CONTROL_ENDPOINT, ControlRequest, Direction, RequestKind,
    RequestRecipient, SETUP_PACKET_LEN, SetupPacket, TransferDescriptor,
    TransferKind, build_setup, build_transfer, to_hex,
};
pub use spin::SpinWait;
