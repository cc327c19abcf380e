//! Simulated environment with a virtual clock and seeded randomness.
//!
//! Time only moves when the harness advances it, and every random byte comes
//! from a ChaCha stream, so a seed fully determines a run.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use murmur_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall clock reported at virtual time zero (2024-01-01T00:00Z).
pub const SIM_EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// Deterministic environment for simulation.
///
/// Clones share the clock and the RNG stream.
#[derive(Clone, Debug)]
pub struct SimEnv {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment seeded with zero.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment seeded for a reproducible run.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Move the clock to `instant` if it lies in the future.
    pub fn advance_to(&self, instant: Instant) {
        let now = self.now();
        if instant > now {
            self.advance(instant - now);
        }
    }

    /// Uniform index below `len`. `len` must be non-zero.
    pub fn pick(&self, len: usize) -> usize {
        (self.random_u64() % len as u64) as usize
    }

    /// True with probability `percent / 100`.
    pub fn chance(&self, percent: u8) -> bool {
        self.random_u64() % 100 < u64::from(percent)
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_clock_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.elapsed().as_millis()).unwrap_or(i64::MAX);
        SIM_EPOCH_MILLIS.saturating_add(elapsed)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);

        let left: Vec<u64> = (0..4).map(|_| a.random_u64()).collect();
        let right: Vec<u64> = (0..4).map(|_| b.random_u64()).collect();

        assert_eq!(left, right);
    }

    #[test]
    fn clock_moves_only_when_advanced() {
        let env = SimEnv::new();
        let t0 = env.now();

        assert_eq!(env.now(), t0);
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MILLIS);

        env.advance(Duration::from_millis(1500));

        assert_eq!(env.now() - t0, Duration::from_millis(1500));
        assert_eq!(env.wall_clock_millis(), SIM_EPOCH_MILLIS + 1500);
    }

    #[test]
    fn advance_to_never_goes_back() {
        let env = SimEnv::new();
        let t0 = env.now();
        env.advance(Duration::from_secs(2));

        env.advance_to(t0);

        assert_eq!(env.elapsed(), Duration::from_secs(2));
    }
}
