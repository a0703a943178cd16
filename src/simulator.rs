//! Fault injection for deterministic testing.
//!
//! A real serial line drops and corrupts bytes; exercising retransmission
//! against real hardware makes tests flaky and slow.  [`lossy_pair`] builds
//! an in-process bidirectional byte pipe whose two directions independently
//! drop bytes with configured probabilities.  The loss pattern comes from a
//! seeded RNG, so a failing test reproduces byte for byte.
//!
//! With both loss rates at `0.0` the pair is a transparent pass-through,
//! usable anywhere a connected transport pair is needed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Configuration for the fault model.  Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that a byte travelling from endpoint A to B is dropped.
    pub loss_a_to_b: f64,
    /// Probability that a byte travelling from endpoint B to A is dropped.
    pub loss_b_to_a: f64,
    /// RNG seed; equal seeds reproduce the exact same loss pattern.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the pair is a transparent pass-through.
        Self {
            loss_a_to_b: 0.0,
            loss_b_to_a: 0.0,
            seed: 0,
        }
    }
}

/// Create a connected pair of byte-stream endpoints with fault injection
/// applied independently in each direction.
///
/// The forwarding task lives until either endpoint is dropped.
pub fn lossy_pair(config: SimulatorConfig) -> (DuplexStream, DuplexStream) {
    let (a_user, mut a_inner) = tokio::io::duplex(4096);
    let (b_user, mut b_inner) = tokio::io::duplex(4096);

    tokio::spawn(async move {
        let mut rng_ab = StdRng::seed_from_u64(config.seed);
        let mut rng_ba = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let mut buf_a = [0u8; 512];
        let mut buf_b = [0u8; 512];

        loop {
            tokio::select! {
                r = a_inner.read(&mut buf_a) => match r {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let kept = filter(&buf_a[..n], config.loss_a_to_b, &mut rng_ab);
                        if !kept.is_empty() && b_inner.write_all(&kept).await.is_err() {
                            break;
                        }
                    }
                },
                r = b_inner.read(&mut buf_b) => match r {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let kept = filter(&buf_b[..n], config.loss_b_to_a, &mut rng_ba);
                        if !kept.is_empty() && a_inner.write_all(&kept).await.is_err() {
                            break;
                        }
                    }
                },
            }
        }
    });

    (a_user, b_user)
}

/// Keep each byte with probability `1 - loss_rate`.
fn filter(bytes: &[u8], loss_rate: f64, rng: &mut StdRng) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|_| rng.gen::<f64>() >= loss_rate)
        .collect()
}
