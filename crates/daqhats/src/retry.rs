//! Bounded read-until-stable helper.
//!
//! Some converters need two identical consecutive readings before a value is
//! trusted. The loop is capped so a noisy or failing source surfaces as a
//! [`HatError::Timeout`] instead of spinning forever.

use std::thread;
use std::time::Duration;

use tracing::{trace, warn};

use crate::error::{HatError, Result};

/// Default cap on readings per stable-read attempt.
pub const DEFAULT_MAX_ATTEMPTS: usize = 20;

/// Call `read` until two consecutive results are equal, at most
/// `max_attempts` times, sleeping `interval` between calls.
///
/// Errors from `read` propagate immediately.
pub fn read_until_stable<T, F>(max_attempts: usize, interval: Duration, mut read: F) -> Result<T>
where
    T: PartialEq + Copy + std::fmt::Debug,
    F: FnMut() -> Result<T>,
{
    if max_attempts < 2 {
        return Err(HatError::bad_parameter(
            "stable read needs at least two attempts",
        ));
    }

    let mut previous = read()?;
    for attempt in 2..=max_attempts {
        if !interval.is_zero() {
            thread::sleep(interval);
        }
        let current = read()?;
        if current == previous {
            trace!(attempt, value = ?current, "reading stable");
            return Ok(current);
        }
        previous = current;
    }

    warn!(max_attempts, last = ?previous, "reading never stabilized");
    Err(HatError::timeout(format!(
        "reading did not stabilize after {max_attempts} attempts"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_stable_on_second_read() {
        let mut calls = 0;
        let value = read_until_stable(5, Duration::ZERO, || {
            calls += 1;
            Ok(42u32)
        })
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_settles_after_drift() {
        let mut readings = [1, 2, 3, 3].into_iter();
        let value = read_until_stable(10, Duration::ZERO, || Ok(readings.next().unwrap_or(0))).unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    #[traced_test]
    fn test_never_stable_times_out() {
        let mut n = 0u32;
        let err = read_until_stable(6, Duration::ZERO, || {
            n += 1;
            Ok(n)
        })
        .unwrap_err();
        assert!(matches!(err, HatError::Timeout { .. }));
        assert_eq!(n, 6);
        assert!(logs_contain("reading never stabilized"));
    }

    #[test]
    fn test_error_propagates() {
        let err = read_until_stable::<u32, _>(4, Duration::ZERO, || Err(HatError::busy("bus")))
            .unwrap_err();
        assert!(err.is_busy());
    }

    #[test]
    fn test_requires_two_attempts() {
        assert!(read_until_stable(1, Duration::ZERO, || Ok(0u8))
            .unwrap_err()
            .is_bad_parameter());
    }
}
