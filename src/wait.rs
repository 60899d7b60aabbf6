//! Bounded polling.

use crate::{Error, Result};
use std::time::{Duration, Instant};

/// Poll `check` every `interval` until it returns `true` or `timeout` has
/// elapsed. `check` runs at least once; its errors end the wait immediately.
pub fn poll_until<F>(what: &str, timeout: Duration, interval: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    loop {
        if check()? {
            return Ok(());
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(Error::Timeout {
                what: what.to_string(),
                ms: timeout.as_millis() as u64,
            });
        }
        std::thread::sleep(interval.min(timeout - elapsed));
    }
}
