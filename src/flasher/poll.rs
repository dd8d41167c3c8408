//! Waiting on ready flags published by the target

use std::{
    thread::sleep,
    time::{Duration, Instant},
};

use log::trace;

use crate::error::Error;

/// How to wait for the target to raise a flag in its memory.
///
/// The default spins without pausing and never gives up, which is what
/// existing flasher firmware expects. A pause between reads and an overall
/// timeout can be configured; neither changes what is being waited for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollPolicy {
    /// Pause between two reads of the flag
    pub interval: Duration,
    /// Give up after this long, `None` waits forever
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read the 32-bit word at `addr` with `read` until it is non-zero and
    /// return it.
    ///
    /// `read` is called once per poll and nothing is held between two calls,
    /// so the cable can be shared while waiting.
    pub fn wait_nonzero(
        &self,
        addr: u64,
        mut read: impl FnMut(u64) -> Result<u32, Error>,
    ) -> Result<u32, Error> {
        let start = Instant::now();
        let mut polls = 0u64;

        loop {
            let value = read(addr)?;
            polls += 1;

            if value != 0 {
                trace!("Word at {addr:#x} became {value:#x} after {polls} reads");
                return Ok(value);
            }

            if let Some(timeout) = self.timeout {
                if start.elapsed() >= timeout {
                    return Err(Error::PollTimeout { addr, timeout });
                }
            }

            if !self.interval.is_zero() {
                sleep(self.interval);
            }
        }
    }
}
