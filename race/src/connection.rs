use std::{
    future::Future,
    hint,
    pin::Pin,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use nusb::{
    MaybeFuture,
    transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError},
};

use crate::{
    error::HostError,
    host::{ControlHost, TransferState},
    setup::{
        Direction, RequestKind, RequestRecipient, SetupPacket,
        TransferDescriptor,
    },
};

// A zero timeout may read as "none" to the stack.
const MIN_DEADLINE: Duration = Duration::from_micros(1);

/// How long `cancel` waits for the stack to discard a transfer past its
/// deadline.
const CANCEL_GRACE: Duration = Duration::from_millis(100);

type TransferFuture =
    Pin<Box<dyn Future<Output = Result<usize, TransferError>>>>;

/// Host stack backed by a claimed [`nusb::Interface`]
pub struct NusbHost {
    device: nusb::Device,
    interface: nusb::Interface,
    serial_number: Option<String>,
}

/// An asynchronous control transfer handed to `nusb`
///
/// The request is submitted with a deadline. Once it passes, `nusb`
/// discards the request and the future resolves with
/// [`TransferError::Cancelled`]. Dropping the future alone does not stop
/// the request.
pub struct NusbPending {
    transfer: TransferFuture,
    outcome: Option<Result<usize, TransferError>>,
}

impl NusbPending {
    /// Issue the request with a first poll.
    ///
    /// `nusb` reports a rejected submission by completing the transfer in
    /// place, so an error seen here is a submission failure.
    fn submitted(transfer: TransferFuture) -> Result<Self, HostError> {
        let mut pending = NusbPending {
            transfer,
            outcome: None,
        };
        pending.poll_once();
        match pending.outcome {
            Some(Err(err)) => Err(err.into()),
            _ => Ok(pending),
        }
    }

    fn poll_once(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let mut cx = Context::from_waker(Waker::noop());
        if let Poll::Ready(res) = self.transfer.as_mut().poll(&mut cx) {
            self.outcome = Some(res);
        }
    }

    pub fn state(&self) -> TransferState {
        match self.outcome {
            None => TransferState::Submitted,
            Some(Ok(_)) => TransferState::Completed,
            Some(Err(TransferError::Cancelled)) => TransferState::Cancelled,
            Some(Err(_)) => TransferState::Errored,
        }
    }

    /// Spin until the transfer reaches a terminal state.
    ///
    /// A transfer still running after `grace` was never discarded.
    fn settle(mut self, grace: Duration) -> Result<TransferState, HostError> {
        let start = Instant::now();
        loop {
            self.poll_once();
            let state = self.state();
            if state.is_terminal() {
                return Ok(state);
            }
            if start.elapsed() >= grace {
                return Err(HostError::Timeout);
            }
            hint::spin_loop();
        }
    }
}

impl NusbHost {
    pub(crate) fn new(
        device: nusb::Device,
        interface: nusb::Interface,
        serial_number: Option<String>,
    ) -> Self {
        NusbHost {
            device,
            interface,
            serial_number,
        }
    }

    pub fn device(&self) -> &nusb::Device {
        &self.device
    }

    pub fn interface_number(&self) -> u8 {
        self.interface.interface_number()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    fn control_in(
        &self,
        setup: &SetupPacket,
        timeout: Duration,
    ) -> Result<Vec<u8>, HostError> {
        let (control_type, recipient) = control_params(setup)?;
        Ok(self
            .interface
            .control_in(
                ControlIn {
                    control_type,
                    recipient,
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    length: setup.length,
                },
                timeout,
            )
            .wait()?)
    }

    fn control_out(
        &self,
        setup: &SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), HostError> {
        let (control_type, recipient) = control_params(setup)?;
        Ok(self
            .interface
            .control_out(
                ControlOut {
                    control_type,
                    recipient,
                    request: setup.request,
                    value: setup.value,
                    index: setup.index,
                    data,
                },
                timeout,
            )
            .wait()?)
    }
}

impl ControlHost for NusbHost {
    type Pending = NusbPending;

    fn control_transfer(
        &self,
        setup: &SetupPacket,
        buffer: Option<&mut [u8]>,
        timeout: Duration,
    ) -> Result<usize, HostError> {
        let length = setup.length as usize;
        match setup.direction() {
            Direction::In => {
                let data = self.control_in(setup, timeout)?;
                if let Some(buffer) = buffer {
                    let n = data.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&data[..n]);
                }
                Ok(data.len())
            }
            Direction::Out => {
                let data: &[u8] = match buffer.as_deref() {
                    Some(buffer) => buffer
                        .get(..length)
                        .ok_or(HostError::InvalidArgument)?,
                    None if length == 0 => &[],
                    None => return Err(HostError::InvalidArgument),
                };
                self.control_write(setup, data, timeout)
            }
        }
    }

    fn control_write(
        &self,
        setup: &SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError> {
        if setup.direction() != Direction::Out
            || setup.length as usize != data.len()
        {
            return Err(HostError::InvalidArgument);
        }
        self.control_out(setup, data, timeout)?;
        Ok(data.len())
    }

    fn submit(
        &self,
        transfer: TransferDescriptor,
        deadline: Duration,
    ) -> Result<NusbPending, HostError> {
        let setup = transfer.setup();
        let (control_type, recipient) = control_params(&setup)?;
        let timeout = submit_timeout(transfer.timeout(), deadline);
        let interface = self.interface.clone();

        let future: TransferFuture = match setup.direction() {
            Direction::In => Box::pin(async move {
                interface
                    .control_in(
                        ControlIn {
                            control_type,
                            recipient,
                            request: setup.request,
                            value: setup.value,
                            index: setup.index,
                            length: setup.length,
                        },
                        timeout,
                    )
                    .await
                    .map(|data| data.len())
            }),
            Direction::Out => Box::pin(async move {
                let data = transfer.payload();
                interface
                    .control_out(
                        ControlOut {
                            control_type,
                            recipient,
                            request: setup.request,
                            value: setup.value,
                            index: setup.index,
                            data,
                        },
                        timeout,
                    )
                    .await
                    .map(|()| data.len())
            }),
        };
        NusbPending::submitted(future)
    }

    fn cancel(
        &self,
        pending: NusbPending,
    ) -> Result<TransferState, HostError> {
        pending.settle(CANCEL_GRACE)
    }
}

/// Timeout handed to `nusb`: the deadline, or the transfer's own timeout
/// when that is shorter.
fn submit_timeout(timeout: Option<Duration>, deadline: Duration) -> Duration {
    timeout
        .map_or(deadline, |timeout| timeout.min(deadline))
        .max(MIN_DEADLINE)
}

fn control_params(
    setup: &SetupPacket,
) -> Result<(ControlType, Recipient), HostError> {
    let control_type = match setup.kind() {
        RequestKind::Standard => ControlType::Standard,
        RequestKind::Class => ControlType::Class,
        RequestKind::Vendor => ControlType::Vendor,
        RequestKind::Reserved => return Err(HostError::InvalidArgument),
    };
    let recipient = match setup.recipient() {
        RequestRecipient::Device => Recipient::Device,
        RequestRecipient::Interface => Recipient::Interface,
        RequestRecipient::Endpoint => Recipient::Endpoint,
        RequestRecipient::Other => Recipient::Other,
        RequestRecipient::Reserved(_) => {
            return Err(HostError::InvalidArgument);
        }
    };
    Ok((control_type, recipient))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::build_setup;

    /// Stays pending for `polls` polls, then resolves with `result`.
    struct Delayed {
        polls: usize,
        result: Result<usize, TransferError>,
    }

    impl Future for Delayed {
        type Output = Result<usize, TransferError>;

        fn poll(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Self::Output> {
            if self.polls == 0 {
                Poll::Ready(self.result.clone())
            } else {
                self.polls -= 1;
                Poll::Pending
            }
        }
    }

    fn delayed(
        polls: usize,
        result: Result<usize, TransferError>,
    ) -> TransferFuture {
        Box::pin(Delayed { polls, result })
    }

    fn ready(result: Result<usize, TransferError>) -> TransferFuture {
        Box::pin(std::future::ready(result))
    }

    #[test]
    fn test_rejected_submission() {
        let res =
            NusbPending::submitted(ready(Err(TransferError::Disconnected)));
        assert_eq!(res.err(), Some(HostError::Disconnected));

        let res = NusbPending::submitted(delayed(0, Err(TransferError::Stall)));
        assert_eq!(res.err(), Some(HostError::Stall));
    }

    #[test]
    fn test_discarded_at_deadline() {
        let pending =
            NusbPending::submitted(delayed(3, Err(TransferError::Cancelled)))
                .unwrap();
        assert_eq!(pending.state(), TransferState::Submitted);
        assert_eq!(pending.settle(CANCEL_GRACE), Ok(TransferState::Cancelled));
    }

    #[test]
    fn test_completed_before_cancel() {
        let pending = NusbPending::submitted(ready(Ok(0xC0))).unwrap();
        assert_eq!(pending.state(), TransferState::Completed);
        assert_eq!(pending.settle(CANCEL_GRACE), Ok(TransferState::Completed));
    }

    #[test]
    fn test_failed_while_held() {
        let pending =
            NusbPending::submitted(delayed(1, Err(TransferError::Stall)))
                .unwrap();
        assert_eq!(pending.state(), TransferState::Submitted);
        assert_eq!(pending.settle(CANCEL_GRACE), Ok(TransferState::Errored));
    }

    #[test]
    fn test_cancel_never_confirmed() {
        let pending = NusbPending::submitted(Box::pin(
            std::future::pending::<Result<usize, TransferError>>(),
        ))
        .unwrap();
        let grace = Duration::from_millis(5);
        let start = Instant::now();
        assert_eq!(pending.settle(grace), Err(HostError::Timeout));
        assert!(start.elapsed() >= grace);
    }

    #[test]
    fn test_submit_timeout() {
        let window = Duration::from_micros(10);
        assert_eq!(submit_timeout(None, window), window);
        assert_eq!(submit_timeout(None, Duration::ZERO), MIN_DEADLINE);
        assert_eq!(
            submit_timeout(Some(Duration::from_millis(2)), window),
            window
        );
        assert_eq!(
            submit_timeout(
                Some(Duration::from_millis(2)),
                Duration::from_millis(3)
            ),
            Duration::from_millis(2)
        );
    }

    #[test]
    fn test_control_params() {
        let setup = build_setup(0x80, 6, 0x0304, 0x040A, 0xC0).unwrap();
        assert!(matches!(
            control_params(&setup),
            Ok((ControlType::Standard, Recipient::Device))
        ));

        let setup = build_setup(0x21, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            control_params(&setup),
            Ok((ControlType::Class, Recipient::Interface))
        ));

        let setup = build_setup(0x02, 3, 0, 0x80, 0).unwrap();
        assert!(matches!(
            control_params(&setup),
            Ok((ControlType::Standard, Recipient::Endpoint))
        ));
    }

    #[test]
    fn test_reserved_request_type() {
        let setup = build_setup(0xE0, 0, 0, 0, 0).unwrap();
        assert_eq!(
            control_params(&setup).err(),
            Some(HostError::InvalidArgument)
        );
        let setup = build_setup(0x1F, 0, 0, 0, 0).unwrap();
        assert_eq!(
            control_params(&setup).err(),
            Some(HostError::InvalidArgument)
        );
    }
}
