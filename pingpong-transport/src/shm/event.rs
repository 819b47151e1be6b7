//! Polled two-state event lock.
//!
//! An [`EventLock`] wraps one side's 2-byte flag in the shared segment. A side
//! only ever calls [`EventLock::set`] on its own flag and only ever waits on the
//! peer's. Waiting is a poll loop with no kernel object behind it; the
//! [`WaitStrategy`] decides what happens between polls.

use crate::error::TransportError;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

/// State of one side's flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EventState {
    /// The side is about to write, or has not written yet.
    Clear = 0,
    /// The side finished writing the data buffer.
    Signaled = 1,
}

impl EventState {
    const fn from_raw(raw: u16) -> Self {
        if raw == Self::Signaled as u16 {
            Self::Signaled
        } else {
            Self::Clear
        }
    }
}

/// Bound on how long a wait may poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitTimeout {
    /// Poll until the state is observed.
    #[default]
    Infinite,
    /// Give up after the duration.
    After(Duration),
}

/// What a waiter does between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Spin with a CPU pause hint. Never enters the kernel.
    #[default]
    Spin,
    /// Yield the time slice to the scheduler after every poll.
    Yield,
    /// Sleep for the given interval after every poll.
    Sleep(Duration),
}

impl WaitStrategy {
    #[inline]
    fn pause(self) {
        match self {
            Self::Spin => std::hint::spin_loop(),
            Self::Yield => std::thread::yield_now(),
            Self::Sleep(interval) => std::thread::sleep(interval),
        }
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spin => f.write_str("spin"),
            Self::Yield => f.write_str("yield"),
            Self::Sleep(interval) => write!(f, "sleep-us={}", interval.as_micros()),
        }
    }
}

impl FromStr for WaitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spin" => Ok(Self::Spin),
            "yield" => Ok(Self::Yield),
            other => other
                .strip_prefix("sleep-us=")
                .and_then(|us| us.parse::<u64>().ok())
                .map(|us| Self::Sleep(Duration::from_micros(us)))
                .ok_or_else(|| {
                    format!("invalid wait strategy \"{other}\", expected spin, yield or sleep-us=N")
                }),
        }
    }
}

/// View of one side's flag.
#[derive(Debug, Clone, Copy)]
pub struct EventLock<'a> {
    flag: &'a AtomicU16,
    strategy: WaitStrategy,
}

impl<'a> EventLock<'a> {
    /// Wraps a flag.
    #[must_use]
    pub fn new(flag: &'a AtomicU16, strategy: WaitStrategy) -> Self {
        Self { flag, strategy }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> EventState {
        EventState::from_raw(self.flag.load(Ordering::Acquire))
    }

    /// Publishes a new state.
    ///
    /// The store releases every data-buffer write made before it.
    #[inline]
    pub fn set(&self, state: EventState) {
        self.flag.store(state as u16, Ordering::Release);
    }

    /// Waits until the flag is `Signaled`.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if a finite timeout elapses first.
    #[inline]
    pub fn wait(&self, timeout: WaitTimeout) -> Result<(), TransportError> {
        self.wait_for(EventState::Signaled, timeout)
    }

    /// Waits until the flag holds `target`.
    ///
    /// With [`WaitTimeout::Infinite`] this only returns `Ok`.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if a finite timeout elapses first.
    #[inline]
    pub fn wait_for(&self, target: EventState, timeout: WaitTimeout) -> Result<(), TransportError> {
        match timeout {
            WaitTimeout::Infinite => {
                while self.state() != target {
                    self.strategy.pause();
                }
                Ok(())
            }
            WaitTimeout::After(limit) => {
                let start = Instant::now();
                loop {
                    if self.state() == target {
                        return Ok(());
                    }
                    let waited = start.elapsed();
                    if waited >= limit {
                        return Err(TransportError::timeout(waited));
                    }
                    self.strategy.pause();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_state() {
        let flag = AtomicU16::new(0);
        let lock = EventLock::new(&flag, WaitStrategy::Spin);
        assert_eq!(lock.state(), EventState::Clear);

        lock.set(EventState::Signaled);
        assert_eq!(lock.state(), EventState::Signaled);
        assert_eq!(flag.load(Ordering::Relaxed), 1);

        lock.set(EventState::Clear);
        assert_eq!(lock.state(), EventState::Clear);
    }

    #[test]
    fn test_wait_returns_when_already_signaled() {
        let flag = AtomicU16::new(EventState::Signaled as u16);
        let lock = EventLock::new(&flag, WaitStrategy::Spin);
        lock.wait(WaitTimeout::Infinite).unwrap();
        lock.wait(WaitTimeout::After(Duration::ZERO)).unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let flag = AtomicU16::new(0);
        let lock = EventLock::new(&flag, WaitStrategy::Yield);
        let err = lock
            .wait(WaitTimeout::After(Duration::from_millis(10)))
            .unwrap_err();
        match err {
            TransportError::Timeout { waited } => assert!(waited >= Duration::from_millis(10)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_for_clear() {
        let flag = AtomicU16::new(EventState::Signaled as u16);
        let lock = EventLock::new(&flag, WaitStrategy::Spin);
        let short = WaitTimeout::After(Duration::from_millis(1));
        assert!(lock.wait_for(EventState::Clear, short).is_err());
        lock.set(EventState::Clear);
        lock.wait_for(EventState::Clear, WaitTimeout::Infinite).unwrap();
    }

    #[test]
    fn test_wait_observes_other_thread() {
        for strategy in [
            WaitStrategy::Spin,
            WaitStrategy::Yield,
            WaitStrategy::Sleep(Duration::from_micros(50)),
        ] {
            let flag = Arc::new(AtomicU16::new(0));
            let setter = {
                let flag = Arc::clone(&flag);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    EventLock::new(&flag, strategy).set(EventState::Signaled);
                })
            };

            EventLock::new(&flag, strategy)
                .wait(WaitTimeout::After(Duration::from_secs(10)))
                .unwrap();
            setter.join().unwrap();
        }
    }

    #[test]
    fn test_strategy_parse_and_display() {
        for strategy in [
            WaitStrategy::Spin,
            WaitStrategy::Yield,
            WaitStrategy::Sleep(Duration::from_micros(25)),
        ] {
            assert_eq!(strategy.to_string().parse::<WaitStrategy>(), Ok(strategy));
        }
        assert!("busy".parse::<WaitStrategy>().is_err());
        assert!("sleep-us=abc".parse::<WaitStrategy>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(WaitStrategy::default(), WaitStrategy::Spin);
        assert_eq!(WaitTimeout::default(), WaitTimeout::Infinite);
    }
}
