//! SHA-256 based identifiers and checksums.

use crate::ProtocolParams;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const RUN_ID_DOMAIN: &[u8] = b"mpsu/run-id/v1";
const PARAMS_DOMAIN: &[u8] = b"mpsu/params/v1";

/// Identifier of one protocol run, agreed on by all parties in the handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub [u8; 32]);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // the first eight bytes are plenty for log lines
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

// H(domain || nonce_0 || ... || nonce_{k-1})
pub fn run_id(nonces: &[[u8; 16]]) -> RunId {
    let mut hasher = Sha256::new();
    hasher.update(RUN_ID_DOMAIN);
    for nonce in nonces {
        hasher.update(nonce);
    }
    RunId(hasher.finalize().into())
}

/// Checksum of the public parameters every party must agree on.
pub fn params_digest(params: &ProtocolParams) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(PARAMS_DOMAIN);
    hasher.update((params.nparties as u64).to_le_bytes());
    hasher.update((params.set_size as u64).to_le_bytes());
    hasher.finalize().into()
}

/// Checksum binding an artifact to its run and its public shape.
pub fn artifact_digest(kind: &str, run_id: &RunId, shape: &[u64]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(run_id.0);
    for x in shape {
        hasher.update(x.to_le_bytes());
    }
    hasher.finalize().into()
}

/// Running hash over every value opened during circuit evaluation.
#[derive(Clone)]
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    pub fn new(run_id: &RunId) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"mpsu/transcript/v1");
        hasher.update(run_id.0);
        Self { hasher }
    }

    pub fn absorb(&mut self, round: u32, opened: &[u8]) {
        self.hasher.update(round.to_le_bytes());
        self.hasher.update((opened.len() as u64).to_le_bytes());
        self.hasher.update(opened);
    }

    pub fn digest(&self) -> [u8; 32] {
        self.hasher.clone().finalize().into()
    }
}
