//! Scriptable host stack for driver tests

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

use crate::{
    error::HostError,
    host::{ControlHost, TransferState},
    setup::{SetupPacket, TransferDescriptor},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Control {
        setup: SetupPacket,
        /// Length of the buffer handed to the stack, `None` for no buffer.
        buffer: Option<usize>,
        timeout: Duration,
    },
    Submit {
        bytes: Vec<u8>,
        timeout: Option<Duration>,
        deadline: Duration,
    },
    Cancel,
}

/// Request buffer that counts its own release
struct TrackedBuffer {
    _data: Vec<u8>,
    released: Rc<Cell<usize>>,
}

impl Drop for TrackedBuffer {
    fn drop(&mut self) {
        self.released.set(self.released.get() + 1);
    }
}

pub(crate) struct MockPending {
    _buffer: TrackedBuffer,
    completed: bool,
}

pub(crate) struct MockHost {
    pub calls: RefCell<Vec<Call>>,
    pub control_result: Cell<Result<usize, HostError>>,
    /// Data stages received through `control_write`, in order.
    pub written: RefCell<Vec<u8>>,
    pub submit_error: Cell<Option<HostError>>,
    pub cancel_error: Cell<Option<HostError>>,
    /// Report submitted transfers as finished before they get cancelled.
    pub complete_early: Cell<bool>,
    pub submitted_at: Cell<Option<Instant>>,
    pub cancelled_at: Cell<Option<Instant>>,
    pub released: Rc<Cell<usize>>,
}

impl MockHost {
    pub fn new() -> Self {
        MockHost {
            calls: RefCell::new(Vec::new()),
            control_result: Cell::new(Ok(0)),
            written: RefCell::new(Vec::new()),
            submit_error: Cell::new(None),
            cancel_error: Cell::new(None),
            complete_early: Cell::new(false),
            submitted_at: Cell::new(None),
            cancelled_at: Cell::new(None),
            released: Rc::new(Cell::new(0)),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| f(c)).count()
    }
}

impl ControlHost for MockHost {
    type Pending = MockPending;

    fn control_transfer(
        &self,
        setup: &SetupPacket,
        buffer: Option<&mut [u8]>,
        timeout: Duration,
    ) -> Result<usize, HostError> {
        self.calls.borrow_mut().push(Call::Control {
            setup: *setup,
            buffer: buffer.map(|b| b.len()),
            timeout,
        });
        self.control_result.get()
    }

    fn control_write(
        &self,
        setup: &SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, HostError> {
        self.calls.borrow_mut().push(Call::Control {
            setup: *setup,
            buffer: Some(data.len()),
            timeout,
        });
        let res = self.control_result.get();
        if res.is_ok() {
            self.written.borrow_mut().extend_from_slice(data);
        }
        res
    }

    fn submit(
        &self,
        transfer: TransferDescriptor,
        deadline: Duration,
    ) -> Result<MockPending, HostError> {
        self.calls.borrow_mut().push(Call::Submit {
            bytes: transfer.as_bytes().to_vec(),
            timeout: transfer.timeout(),
            deadline,
        });
        if let Some(err) = self.submit_error.get() {
            return Err(err);
        }
        self.submitted_at.set(Some(Instant::now()));
        Ok(MockPending {
            _buffer: TrackedBuffer {
                _data: transfer.into_buffer(),
                released: Rc::clone(&self.released),
            },
            completed: self.complete_early.get(),
        })
    }

    fn cancel(
        &self,
        pending: MockPending,
    ) -> Result<TransferState, HostError> {
        self.calls.borrow_mut().push(Call::Cancel);
        self.cancelled_at.set(Some(Instant::now()));
        if let Some(err) = self.cancel_error.get() {
            return Err(err);
        }
        Ok(if pending.completed {
            TransferState::Completed
        } else {
            TransferState::Cancelled
        })
    }
}
