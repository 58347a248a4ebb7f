use std::time::Duration;

use crate::{
    error::HostError,
    setup::{SetupPacket, TransferDescriptor},
};

/// Lifecycle of an asynchronous transfer
///
/// `Constructed -> Submitted -> {Completed | Cancelled | Errored}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Constructed,
    Submitted,
    Completed,
    Cancelled,
    Errored,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed
                | TransferState::Cancelled
                | TransferState::Errored
        )
    }
}

/// Control transfer primitives of the host USB stack
///
/// Implementations own the opened device. Ownership of a submitted
/// descriptor passes to `Pending`, which must release the request buffer
/// on every terminal state, including after `cancel`.
pub trait ControlHost {
    /// A submitted, not yet cancelled, transfer.
    type Pending;

    /// Blocking control transfer on endpoint 0.
    ///
    /// The data stage length is `setup.length`. `buffer` is `None` when the
    /// caller has no data to send and does not want the data received;
    /// this must reach the stack as "no buffer", not as an empty one.
    fn control_transfer(
        &self,
        setup: &SetupPacket,
        buffer: Option<&mut [u8]>,
        timeout: Duration,
    ) -> Result<usize, HostError>;

    /// Blocking control transfer sending `data` as the data stage.
    ///
    /// `setup.length` must equal `data.len()`.
    fn control_write(
        &self,
        setup: &SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError>;

    /// Submit without waiting for completion.
    ///
    /// The request must not outlive `deadline` after submission. Stacks
    /// without an explicit cancel use it to discard the request.
    fn submit(
        &self,
        transfer: TransferDescriptor,
        deadline: Duration,
    ) -> Result<Self::Pending, HostError>;

    /// Cancel the transfer and give it back to the stack.
    ///
    /// Must be harmless on a transfer that already reached a terminal
    /// state. Returns the terminal state the transfer ended in; failing to
    /// stop the request is an error.
    fn cancel(
        &self,
        pending: Self::Pending,
    ) -> Result<TransferState, HostError>;
}
