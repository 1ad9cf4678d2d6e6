//! Synthetic messages used to fill an empty source.
//!
//! Message sizes follow a Pareto distribution with shape 1 and scale 1, so most messages are a
//! few bytes long and a few are very large. Sizes are capped by the caller.

use rand::Rng;

/// Shape of the size distribution.
const PARETO_SHAPE: f64 = 1.0;

/// Samples the number of random bytes behind a message, between 1 and `max_bytes`.
pub fn message_size<R>(rng: &mut R, max_bytes: usize) -> usize
where
    R: Rng + ?Sized,
{
    // Inverse transform sampling: for U uniform on (0, 1], U^(-1/shape) is Pareto distributed.
    let uniform: f64 = 1.0 - rng.r#gen::<f64>();
    let sample = uniform.powf(-1.0 / PARETO_SHAPE);

    if !sample.is_finite() || sample >= max_bytes as f64 {
        return max_bytes.max(1);
    }

    (sample as usize).max(1)
}

/// Generates a message made of `message_size` random bytes, encoded as upper-case hex.
pub fn random_message<R>(rng: &mut R, max_bytes: usize) -> String
where
    R: Rng + ?Sized,
{
    let mut bytes = vec![0u8; message_size(rng, max_bytes)];
    rng.fill(bytes.as_mut_slice());

    hex::encode_upper(bytes)
}
