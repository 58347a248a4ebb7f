use std::time::{Duration, Instant};

use log::{Level, debug, error, log_enabled, trace};

use crate::{
    error::{HostError, RaceError},
    host::{ControlHost, TransferState},
    setup::{ControlRequest, SetupPacket, build_transfer, to_hex},
    spin::SpinWait,
};

/// `GET_DESCRIPTOR` (string descriptor 4, language 0x040A)
pub const DESCRIPTOR_REQUEST: ControlRequest =
    ControlRequest::new(0x80, 6, 0x0304, 0x040A);

/// `CLEAR_FEATURE(ENDPOINT_HALT)` on endpoint 0x80
pub const CLEAR_HALT_REQUEST: ControlRequest =
    ControlRequest::new(0x02, 3, 0x0000, 0x0080);

/// `DFU_DNLOAD`, block 0
pub const DFU_DOWNLOAD_REQUEST: ControlRequest =
    ControlRequest::new(0x21, DFU_CMD_DOWNLOAD, 0, 0);

const DFU_CMD_DOWNLOAD: u8 = 1;

/// Largest data stage sent by [RaceDriver::send_data]
pub const MAX_PACKET_SIZE: usize = 0x800;

/// Data stage length of the stall request
pub const STALL_PAYLOAD_LEN: usize = 0xC0;

/// Empirical hold time of the stall transfer before it is cancelled.
pub const DEFAULT_STALL_WINDOW: Duration = Duration::from_micros(10);

const NO_LEAK_LEN: u16 = 0xC1;
const LEAK_LEN: u16 = 0x40;
const PROBE_TIMEOUT: Duration = Duration::from_millis(1);
const CLEAR_HALT_TIMEOUT: Duration = Duration::from_millis(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tunables of the race
///
/// `stall_window` is a calibration value for the target hardware; there
/// is no formula behind the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceConfig {
    pub stall_window: Duration,
    pub spin: SpinWait,
}

impl Default for RaceConfig {
    fn default() -> Self {
        RaceConfig {
            stall_window: DEFAULT_STALL_WINDOW,
            spin: SpinWait::default(),
        }
    }
}

/// Session driving control transfers against one device
///
/// The driver is the sole owner of the host handle. Races run to completion
/// (submit, hold, cancel) inside a single `&mut self` call, so there is
/// never more than one race transfer outstanding.
pub struct RaceDriver<H: ControlHost> {
    host: H,
    config: RaceConfig,
}

impl<H: ControlHost> RaceDriver<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, RaceConfig::default())
    }

    pub fn with_config(host: H, config: RaceConfig) -> Self {
        RaceDriver { host, config }
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RaceConfig) {
        self.config = config;
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// End the session and hand the host back.
    pub fn into_host(self) -> H {
        self.host
    }

    /// Blocking control transfer
    ///
    /// Pass `None` as `buffer` unless data should actually move through
    /// it: the stack then sees no buffer at all, which some hosts require
    /// for these requests. Errors come back as-is; whether they matter is
    /// up to the caller.
    pub fn synchronous_transfer(
        &self,
        request: ControlRequest,
        buffer: Option<&mut [u8]>,
        length: u16,
        timeout: Duration,
    ) -> Result<usize, HostError> {
        if buffer.as_ref().is_some_and(|b| b.len() < length as usize) {
            return Err(HostError::InvalidArgument);
        }
        let setup = SetupPacket {
            request_type: request.request_type,
            request: request.request,
            value: request.value,
            index: request.index,
            length,
        };
        trace!("Control transfer {:02X?}", setup.to_bytes());
        self.host.control_transfer(&setup, buffer, timeout)
    }

    /// Submit `payload` asynchronously, hold it for `window`, then cancel
    ///
    /// The host gets `window` as the request's deadline. Returns once the
    /// host has stopped the request, with the state it ended in. Submission
    /// and cancellation failures are fatal (see [RaceError::is_fatal]).
    pub fn race_transfer(
        &mut self,
        request: ControlRequest,
        payload: &[u8],
        window: Duration,
    ) -> Result<TransferState, RaceError> {
        let setup = request.setup(payload.len())?;
        let transfer = build_transfer(&setup, payload, race_timeout(window));
        if log_enabled!(Level::Debug) {
            debug!(
                "Race request ({} bytes): {}",
                transfer.len(),
                to_hex(transfer.as_bytes())
            );
        }

        let pending = self.host.submit(transfer, window).map_err(|err| {
            error!("Transfer submission failed: {err}");
            RaceError::Submit(err)
        })?;
        let start = Instant::now();
        let held = self.config.spin.until(start, window);

        let state = self.host.cancel(pending).map_err(|err| {
            error!("Transfer cancellation failed: {err}");
            RaceError::Cancel(err)
        })?;
        debug!("Race transfer held for {held:?}, {state:?}");
        Ok(state)
    }

    /// Leave the control endpoint with a half-processed request.
    pub fn stall(&mut self) -> Result<TransferState, RaceError> {
        let payload = [b'A'; STALL_PAYLOAD_LEN];
        let window = self.config.stall_window;
        self.race_transfer(DESCRIPTOR_REQUEST, &payload, window)
    }

    /// Synchronous transfer issued only for its effect on the device.
    pub fn probe_without_error(
        &self,
        request: ControlRequest,
        length: u16,
        timeout: Duration,
    ) {
        let res = self.synchronous_transfer(request, None, length, timeout);
        trace!("Probe {request:02X?} returned {res:?}");
    }

    pub fn no_leak(&self) {
        self.probe_without_error(
            DESCRIPTOR_REQUEST,
            NO_LEAK_LEN,
            PROBE_TIMEOUT,
        );
    }

    pub fn usb_req_stall(&self) {
        self.probe_without_error(CLEAR_HALT_REQUEST, 0, CLEAR_HALT_TIMEOUT);
    }

    pub fn usb_req_leak(&self) {
        self.probe_without_error(DESCRIPTOR_REQUEST, LEAK_LEN, PROBE_TIMEOUT);
    }

    /// Blocking OUT transfer with `data` as the data stage.
    pub fn write_transfer(
        &self,
        request: ControlRequest,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError> {
        let setup = request
            .setup(data.len())
            .map_err(|_| HostError::InvalidArgument)?;
        trace!("Control write {:02X?}", setup.to_bytes());
        self.host.control_write(&setup, data, timeout)
    }

    /// DFU download of `data`, split into [MAX_PACKET_SIZE] chunks.
    pub fn send_data(&self, data: &[u8]) -> Result<(), RaceError> {
        let total = data.len();
        let mut sent = 0;
        for chunk in data.chunks(MAX_PACKET_SIZE) {
            self.write_transfer(DFU_DOWNLOAD_REQUEST, chunk, DOWNLOAD_TIMEOUT)?;
            sent += chunk.len();
            debug!("Sent {sent}/{total} bytes");
        }
        Ok(())
    }
}

/// Own timeout of a race transfer: whole milliseconds of the window, or
/// none below one millisecond.
fn race_timeout(window: Duration) -> u32 {
    if window >= Duration::from_millis(1) {
        u32::try_from(window.as_millis()).unwrap_or(u32::MAX)
    } else {
        0
    }
}
