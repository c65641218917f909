//! Seeding of the protocol randomness.

use crate::error::MpsuError;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use scuttlebutt::{AesRng, Block};

/// Draws a fresh seed from the operating system and expands it with AES.
///
/// Unlike [AesRng::new], a failing entropy source is reported instead of panicking.
pub fn seeded_rng() -> Result<AesRng, MpsuError> {
    let mut seed = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| MpsuError::InsufficientEntropy(e.to_string()))?;
    Ok(AesRng::from_seed(Block::from(seed)))
}

/// Deterministic generator for material that must be identical on every party.
pub(crate) fn public_rng(seed: u128) -> AesRng {
    AesRng::from_seed(Block::from(seed.to_le_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seeded_rngs_differ() {
        let mut a = seeded_rng().unwrap();
        let mut b = seeded_rng().unwrap();
        assert_ne!(a.gen::<u128>(), b.gen::<u128>());
    }

    #[test]
    fn test_public_rng_is_reproducible() {
        let mut a = public_rng(42);
        let mut b = public_rng(42);
        assert_eq!(a.gen::<[u64; 4]>(), b.gen::<[u64; 4]>());
    }
}
