use nusb::transfer::TransferError;

/// Failure reported by the host USB stack for a single transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    Cancelled,
    Stall,
    Disconnected,
    Fault,
    InvalidArgument,
    /// The stack did not finish the transfer in time.
    Timeout,
    Other,
}

impl HostError {
    /// libusb-compatible error code, used in diagnostics.
    pub fn code(&self) -> i32 {
        match self {
            HostError::Fault => -1,
            HostError::InvalidArgument => -2,
            HostError::Disconnected => -4,
            HostError::Timeout => -7,
            HostError::Stall => -9,
            HostError::Cancelled => -10,
            HostError::Other => -99,
        }
    }
}

impl std::error::Error for HostError {}

impl std::fmt::Display for HostError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            HostError::Cancelled => "transfer cancelled",
            HostError::Stall => "endpoint stalled",
            HostError::Disconnected => "device disconnected",
            HostError::Fault => "hardware fault or protocol violation",
            HostError::InvalidArgument => "invalid argument",
            HostError::Timeout => "operation timed out",
            HostError::Other => "unknown host error",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

impl From<TransferError> for HostError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => HostError::Cancelled,
            TransferError::Stall => HostError::Stall,
            TransferError::Disconnected => HostError::Disconnected,
            TransferError::Fault => HostError::Fault,
            _ => HostError::Other,
        }
    }
}

#[derive(Debug)]
pub enum RaceError {
    Usb(nusb::Error),
    /// Asynchronous submission failed. Fatal for the current attempt.
    Submit(HostError),
    /// Cancellation of an in-flight transfer failed. Fatal for the current
    /// attempt.
    Cancel(HostError),
    /// A synchronous transfer returned an error.
    Transfer(HostError),
    PayloadTooLarge(usize),
}

impl RaceError {
    /// Whether the device may have been left mid-race.
    ///
    /// Callers are expected to abandon the session on fatal errors.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RaceError::Submit(_) | RaceError::Cancel(_))
    }
}

impl std::error::Error for RaceError {}

impl std::fmt::Display for RaceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaceError::Usb(err) => write!(f, "USB error: {}", err),
            RaceError::Submit(err) => {
                write!(f, "Transfer submission failed: {}", err)
            }
            RaceError::Cancel(err) => {
                write!(f, "Transfer cancellation failed: {}", err)
            }
            RaceError::Transfer(err) => write!(f, "Transfer error: {}", err),
            RaceError::PayloadTooLarge(len) => {
                write!(f, "Payload of {} bytes exceeds wLength", len)
            }
        }
    }
}

impl From<nusb::Error> for RaceError {
    fn from(err: nusb::Error) -> Self {
        RaceError::Usb(err)
    }
}

impl From<HostError> for RaceError {
    fn from(err: HostError) -> Self {
        RaceError::Transfer(err)
    }
}
