//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples protocol logic from system resources
//! (time, randomness). The heartbeat engine only needs randomness, for
//! backoff jitter; drivers additionally use the clock and `sleep`.
//!
//! The environment is implemented twice:
//!
//! 1. `SimEnv` (hostbeat-harness): seeded ChaCha RNG, Turmoil/Tokio virtual
//!    time
//! 2. `SystemEnv` (hostbeat-client): real system clock and OS entropy
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Type Parameters
///
/// - `Instant`: Represents a point in time. In simulation, this is virtual
///   time. In production, this is `std::time::Instant`.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Type representing a point in time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Returns the current time.
    ///
    /// Must never return a value smaller than a previous call.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code may call this. Protocol logic returns `SetTimer`
    /// actions instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Production implementations use OS entropy; simulations use a seeded
    /// RNG whose seed is logged for reproducibility.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a uniformly distributed fraction in `[0, 1)`.
    ///
    /// Uses the top 53 bits of [`Environment::random_u64`] so every value is
    /// exactly representable as an `f64`.
    #[allow(clippy::cast_precision_loss)]
    fn random_fraction(&self) -> f64 {
        (self.random_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
