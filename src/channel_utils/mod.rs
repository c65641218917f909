//! Transport for the protocol: framed sessions over [AbstractChannel]s, the per-party mesh,
//! and constructors for unix socket, TCP and in-memory channels.
//!
//! The helpers below turn shares into the byte payloads carried by [session::PeerLink].

use anyhow::{bail, Result};

pub mod mesh;
pub mod session;
pub mod sync_channel;
pub mod sync_channel_by_cb;
pub mod tcp_channel;

pub use mesh::Mesh;
pub use scuttlebutt::AbstractChannel;
pub use session::{PeerLink, Phase, SessionId};

/// Bytes needed for `n` packed bits.
pub fn packed_len(n: usize) -> usize {
    (n + 7) / 8
}

/// Packs bits LSB first.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; packed_len(bits.len())];
    for (i, &b) in bits.iter().enumerate() {
        out[i / 8] |= (b as u8) << (i % 8);
    }
    out
}

/// Inverse of [pack_bits] for the first `n` bits.
pub fn unpack_bits(bytes: &[u8], n: usize) -> Result<Vec<bool>> {
    if bytes.len() != packed_len(n) {
        bail!(
            "{} bytes cannot hold exactly {} packed bits @{}:{}",
            bytes.len(),
            n,
            file!(),
            line!()
        );
    }
    Ok((0..n).map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1).collect())
}

/// Little-endian encoding of 128-bit words.
pub fn words_to_bytes(words: &[u128]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Inverse of [words_to_bytes].
pub fn bytes_to_words(bytes: &[u8]) -> Result<Vec<u128>> {
    if bytes.len() % 16 != 0 {
        bail!(
            "{} bytes is not a whole number of 128-bit words @{}:{}",
            bytes.len(),
            file!(),
            line!()
        );
    }
    Ok(bytes
        .chunks_exact(16)
        .map(|c| {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(c);
            u128::from_le_bytes(buf)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use scuttlebutt::AesRng;

    #[test]
    fn test_pack_bits() {
        let mut rng = AesRng::new();
        for n in [0, 1, 7, 8, 9, 100] {
            let bits = (0..n).map(|_| rng.gen::<bool>()).collect::<Vec<_>>();
            let packed = pack_bits(&bits);
            assert_eq!(packed.len(), packed_len(n));
            assert_eq!(unpack_bits(&packed, n).unwrap(), bits);
        }
        assert_eq!(pack_bits(&[true, false, true]), vec![0b101]);
        assert!(unpack_bits(&[0, 0], 3).is_err());
    }

    #[test]
    fn test_words() {
        let words = vec![0u128, 1, u128::MAX, 0x0123_4567_89ab_cdef << 64];
        let bytes = words_to_bytes(&words);
        assert_eq!(bytes.len(), 64);
        assert_eq!(bytes_to_words(&bytes).unwrap(), words);
        assert!(bytes_to_words(&bytes[1..]).is_err());
    }
}
