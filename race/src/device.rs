use std::{num::NonZeroU8, time::Duration};

use log::{info, warn};
use nusb::{self, MaybeFuture};

use crate::{
    DEFAULT_TIMEOUT, NusbHost, RaceConfig, RaceDriver, RaceError,
    serial::{SerialInfo, is_exploited},
};

/// Interface claimed for the duration of a session
const DFU_INTERFACE: u8 = 0;

/// Race session over a real device
pub type DfuSession = RaceDriver<NusbHost>;

/// A device matching the requested identifiers, not opened yet
pub struct DfuTarget {
    dev: nusb::DeviceInfo,
}

impl DfuTarget {
    pub fn device_info(&self) -> &nusb::DeviceInfo {
        &self.dev
    }

    pub fn bus_id(&self) -> &str {
        self.dev.bus_id()
    }

    pub fn device_address(&self) -> u8 {
        self.dev.device_address()
    }

    pub fn vendor_id(&self) -> u16 {
        self.dev.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.dev.product_id()
    }

    /// Serial number as cached by the OS at enumeration.
    pub fn serial_number(&self) -> Option<&str> {
        self.dev.serial_number()
    }

    /// Open the device and claim its DFU interface
    ///
    /// The serial number is read from the device itself, since it changes
    /// once the device has been exploited.
    pub fn open(&self, config: RaceConfig) -> Result<DfuSession, RaceError> {
        let device = self.dev.open().wait()?;
        let serial_number = device
            .device_descriptor()
            .serial_number_string_index()
            .and_then(|idx| {
                get_string_descriptor(&device, idx, DEFAULT_TIMEOUT)
            });
        match &serial_number {
            Some(serial) => info!("Device Serial Number: {serial}"),
            None => warn!("Could not read the device serial number"),
        }

        let interface = device.claim_interface(DFU_INTERFACE).wait()?;
        let host = NusbHost::new(device, interface, serial_number);
        Ok(RaceDriver::with_config(host, config))
    }
}

impl DfuSession {
    pub fn serial_number(&self) -> Option<&str> {
        self.host().serial_number()
    }

    pub fn serial_info(&self) -> Option<SerialInfo> {
        SerialInfo::parse(self.serial_number()?)
    }

    pub fn is_exploited(&self) -> bool {
        self.serial_number().is_some_and(is_exploited)
    }

    /// Reset the USB port. The device re-enumerates and the session
    /// should be released afterwards.
    pub fn reset(&self) -> Result<(), RaceError> {
        Ok(self.host().device().reset().wait()?)
    }

    /// Release the interface and close the device.
    pub fn release(self) {
        let host = self.into_host();
        info!("Releasing interface {}", host.interface_number());
        drop(host);
    }
}

fn get_string_descriptor(
    device: &nusb::Device,
    desc_index: NonZeroU8,
    timeout: Duration,
) -> Option<String> {
    let language: u16 = device
        .get_string_descriptor_supported_languages(timeout)
        .wait()
        .ok()?
        .next()
        .unwrap_or(nusb::descriptors::language_id::US_ENGLISH);

    device
        .get_string_descriptor(desc_index, language, timeout)
        .wait()
        .ok()
}

/// List connected devices, optionally filtered by vendor and product ID
pub fn find_dfu_targets(
    vid: Option<u16>,
    pid: Option<u16>,
) -> Result<Vec<DfuTarget>, RaceError> {
    Ok(nusb::list_devices()
        .wait()?
        .filter(|dev| {
            vid.is_none_or(|id| dev.vendor_id() == id)
                && pid.is_none_or(|id| dev.product_id() == id)
        })
        .map(|dev| DfuTarget { dev })
        .collect())
}
