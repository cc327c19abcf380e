//! Environment abstraction for deterministic testing.
//!
//! Decouples sync logic from system resources (time, randomness). Production
//! drivers use the real clock and OS entropy; the simulation harness uses a
//! virtual clock and a seeded RNG so every run is reproducible.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Monotonic instant usable by the state machines.
///
/// Blanket-implemented for any type with the required arithmetic, so both
/// `std::time::Instant` and virtual instants qualify.
pub trait Moment:
    Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> Moment for T where
    T: Copy + Ord + Debug + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = T>
{
}

/// Abstract environment providing time, randomness, and async primitives.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type used by this environment.
    type Instant: Moment;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Only used to stamp optimistic messages; ordering never depends on it
    /// being monotonic.
    fn wall_clock_millis(&self) -> i64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this. State machines take `now` as a
    /// parameter instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Minimal environment for unit tests.
pub mod test_utils {
    use std::{
        sync::{
            Arc, Mutex, PoisonError,
            atomic::{AtomicU64, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::Environment;

    /// Epoch milliseconds reported by a fresh [`MockEnv`] (2024-01-01T00:00Z).
    pub const MOCK_EPOCH_MILLIS: i64 = 1_704_067_200_000;

    /// Manually advanced clock with counter-based randomness.
    ///
    /// Clones share the clock and the counter.
    #[derive(Clone, Debug)]
    pub struct MockEnv {
        base: Instant,
        elapsed: Arc<Mutex<Duration>>,
        counter: Arc<AtomicU64>,
    }

    impl MockEnv {
        /// Clock at zero elapsed time.
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                elapsed: Arc::new(Mutex::new(Duration::ZERO)),
                counter: Arc::new(AtomicU64::new(1)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
            *elapsed += by;
        }

        fn elapsed(&self) -> Duration {
            *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.base + self.elapsed()
        }

        fn wall_clock_millis(&self) -> i64 {
            let elapsed = i64::try_from(self.elapsed().as_millis()).unwrap_or(i64::MAX);
            MOCK_EPOCH_MILLIS.saturating_add(elapsed)
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            std::future::ready(())
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for chunk in buffer.chunks_mut(8) {
                let n = self.counter.fetch_add(1, Ordering::Relaxed);
                let bytes = n.to_be_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_utils::MockEnv, *};

    #[test]
    fn mock_clock_only_moves_when_advanced() {
        let env = MockEnv::new();
        let start = env.now();

        assert_eq!(env.now(), start);
        env.advance(Duration::from_secs(3));
        assert_eq!(env.now() - start, Duration::from_secs(3));
        assert_eq!(env.wall_clock_millis(), test_utils::MOCK_EPOCH_MILLIS + 3000);
    }

    #[test]
    fn mock_randomness_never_repeats() {
        let env = MockEnv::new();
        assert_ne!(env.random_u64(), env.random_u64());
    }
}
