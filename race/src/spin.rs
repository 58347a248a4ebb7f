use std::{
    hint,
    num::NonZeroU32,
    time::{Duration, Instant},
};

/// Active wait on the monotonic clock
///
/// The race window between submission and cancellation is often shorter
/// than the scheduler's sleep resolution, so the wait never yields to the
/// OS. `granularity` is the number of spin-loop hints issued between two
/// clock reads; raise it on platforms where reading the clock is expensive
/// relative to the window being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinWait {
    granularity: NonZeroU32,
}

impl Default for SpinWait {
    fn default() -> Self {
        SpinWait {
            granularity: NonZeroU32::MIN,
        }
    }
}

impl SpinWait {
    pub fn new(granularity: NonZeroU32) -> Self {
        SpinWait { granularity }
    }

    pub fn granularity(&self) -> NonZeroU32 {
        self.granularity
    }

    /// Spin until `window` has elapsed since `start`.
    ///
    /// Returns the elapsed time at the last clock read, never less than
    /// `window`.
    pub fn until(&self, start: Instant, window: Duration) -> Duration {
        loop {
            let elapsed = start.elapsed();
            if elapsed >= window {
                return elapsed;
            }
            for _ in 0..self.granularity.get() {
                hint::spin_loop();
            }
        }
    }
}
