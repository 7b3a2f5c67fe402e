//! Microsecond stopwatch used to time stage iterations.

use std::time::{Duration, Instant};

/// A stopwatch that may be created before it is started.
///
/// A stage creates one per iteration before taking a unit and starts it
/// only once a unit is in hand, so time spent idle in `take` is never
/// counted as processing time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    started: Option<Instant>,
}

impl Stopwatch {
    /// Creates a stopwatch that has not been started.
    #[must_use]
    pub const fn unstarted() -> Self {
        Self { started: None }
    }

    /// Starts the stopwatch. Restarting a running stopwatch resets it.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Returns the elapsed time, or zero if never started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// Returns the elapsed time in whole microseconds.
    #[must_use]
    pub fn elapsed_us(&self) -> u64 {
        u64::try_from(self.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstarted_reads_zero() {
        let watch = Stopwatch::unstarted();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(watch.elapsed_us(), 0);
    }

    #[test]
    fn test_started_measures_time() {
        let mut watch = Stopwatch::unstarted();
        watch.start();
        std::thread::sleep(Duration::from_millis(10));
        assert!(watch.elapsed_us() >= 10_000);
    }
}
