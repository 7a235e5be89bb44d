//! Production `Environment` backed by the system clock and OS entropy.

use std::time::{Duration, Instant};

use hostbeat_core::env::Environment;
use rand::{RngCore, rngs::OsRng};

/// Real clock, Tokio sleep, OS RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        OsRng.fill_bytes(buffer);
    }
}
