//! Seeded Environment implementation for deterministic testing.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ed25519_dalek::SigningKey;
use hostbeat_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Simulation environment using Tokio/Turmoil virtual time and a seeded RNG.
///
/// - **Virtual Time**: `now()` and `sleep()` go through Tokio's clock, which
///   Turmoil and `start_paused` tests advance instantly.
/// - **Seeded RNG**: `random_bytes()` uses ChaCha20Rng, so backoff jitter and
///   derived keys are identical on every run with the same seed.
///
/// # Panics
///
/// `now()` panics outside a Tokio runtime. The scenario framework never calls
/// it; it keeps its own virtual clock.
#[derive(Clone)]
pub struct SimEnv {
    /// Shared across clones so every clone continues one sequence
    rng: Arc<Mutex<ChaCha20Rng>>,
    seed: u64,
}

impl SimEnv {
    /// Create a new SimEnv with default seed (0)
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a new SimEnv with a specific seed
    pub fn with_seed(seed: u64) -> Self {
        tracing::debug!(seed, "simulation rng seeded");
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))), seed }
    }

    /// Seed this environment was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw a signing key from the seeded stream
    pub fn signing_key(&self) -> SigningKey {
        let mut secret = [0u8; 32];
        self.random_bytes(&mut secret);
        SigningKey::from_bytes(&secret)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        // A poisoned lock still holds a usable RNG; a panicking test already
        // failed.
        self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner).fill_bytes(dest);
    }
}
