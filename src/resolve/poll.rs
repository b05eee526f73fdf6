//! Bounded polling for pointers the host initializes after the module is loaded

use std::thread;
use std::time::Duration;

use tracing::debug;

use super::follow_indirection;
use crate::error::{Error, Result};

/// Something that can suspend the setup thread between polls
pub trait Sleep {
    /// Suspends for `duration`
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Sleep for ThreadSleep {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Retry interval and attempt ceiling for [`poll_non_null`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Time slept after each null read
    pub interval: Duration,
    /// Number of null reads tolerated before giving up
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    /// 100 ms for 100 attempts, ten seconds in total
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_attempts: 100,
        }
    }
}

/// Reads the pointer stored at `slot` until it becomes non-null.
///
/// Sleeps `policy.interval` after every null read and gives up with
/// [`Error::ResolutionTimeout`] after `policy.max_attempts` null reads.
///
/// # Safety
///
/// `slot` must stay valid for reads of `usize` for the whole polling period
pub unsafe fn poll_non_null<S: Sleep>(
    name: &str,
    slot: usize,
    policy: PollPolicy,
    sleeper: &S,
) -> Result<usize> {
    for attempt in 0..policy.max_attempts {
        let value = follow_indirection(slot);
        if value != 0 {
            debug!("{name}: non-null after {attempt} retries");
            return Ok(value);
        }
        sleeper.sleep(policy.interval);
    }
    Err(Error::ResolutionTimeout {
        name: name.to_owned(),
        attempts: policy.max_attempts,
    })
}
