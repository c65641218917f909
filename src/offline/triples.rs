//! Beaver triples for the Boolean circuit.
//!
//! A [Triple] holds XOR shares of a bit `a`, a word `b` and `c = a·b`. AND gates on bits use
//! the lowest bit of `b` and `c`; the concealment gate multiplies a bit by a whole element.
//!
//! Generation follows GMW: every party samples its `a` and `b` locally and each cross term
//! `a_p·b_q` is shared with one chosen-message OT per triple, `q` offering `(r, r ⊕ b_q)`.

use super::store::{read_artifact, write_artifact, Artifact};
use crate::arena::{ConsumptionArena, CursorError};
use crate::channel_utils::Mesh;
use crate::error::MpsuError;
use crate::hash_utils::artifact_digest;
use crate::ot::{BaseOtMode, BlockOtReceiver, BlockOtSender};
use crate::{ProtocolParams, RunId};
use anyhow::{Context, Result};
use rand::Rng;
use scuttlebutt::{AbstractChannel, AesRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroize;

#[cfg(any(test, feature = "insecure-test-modes"))]
const FAKE_TRIPLE_SEED: u128 = 0x6d70_7375_2d66_616b_652d_7472_6970_6c65;

/// One party's share of a multiplication triple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Triple {
    /// Share of the bit factor.
    pub a: bool,
    /// Share of the word factor.
    pub b: u128,
    /// Share of the product.
    pub c: u128,
}

/// Where the triples come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TripleSource {
    /// OT-based generation between all pairs.
    #[default]
    Ot,
    /// Every party derives all shares from one public seed. Offers no privacy.
    #[cfg(any(test, feature = "insecure-test-modes"))]
    InsecureFake,
}

impl TripleSource {
    /// True for sources that must never run outside tests.
    pub fn is_insecure(&self) -> bool {
        match self {
            TripleSource::Ot => false,
            #[cfg(any(test, feature = "insecure-test-modes"))]
            TripleSource::InsecureFake => true,
        }
    }
}

/// A party's triples for one run, handed out through a consumption cursor.
#[derive(Debug, Serialize, Deserialize)]
pub struct TripleBatch {
    run_id: RunId,
    nparties: usize,
    triples: ConsumptionArena<Triple>,
}

impl Artifact for TripleBatch {
    const KIND: &'static str = "triples";

    fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

impl TripleBatch {
    /// Wraps freshly generated triples.
    pub fn new(run_id: RunId, nparties: usize, triples: Vec<Triple>) -> Self {
        Self {
            run_id,
            nparties,
            triples: ConsumptionArena::new(triples),
        }
    }

    /// Run that generated the batch.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Triples ever stored.
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    /// True if the batch holds no triples.
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Triples not consumed yet.
    pub fn remaining(&self) -> usize {
        self.triples.remaining()
    }

    /// Fails with [MpsuError::TripleShortfall] unless `required` triples are left.
    pub fn ensure_covers(&self, required: usize) -> Result<()> {
        if self.remaining() < required {
            return Err(MpsuError::TripleShortfall {
                required,
                produced: self.remaining(),
            }
            .into());
        }
        Ok(())
    }

    /// Hands out the next `count` triples.
    pub fn take(&mut self, count: usize) -> Result<&[Triple]> {
        let cursor = self.triples.cursor();
        self.take_at(cursor, count)
    }

    /// Hands out `count` triples starting at `index`; reading a consumed index is an error.
    pub fn take_at(&mut self, index: usize, count: usize) -> Result<&[Triple]> {
        let cursor = self.triples.cursor();
        match self.triples.take_at(index, count) {
            Ok(triples) => Ok(triples),
            Err(e) => Err(cursor_error(cursor, e).into()),
        }
    }

    #[cfg(test)]
    pub(crate) fn items(&self) -> &[Triple] {
        self.triples.items()
    }

    /// Public checksum all parties must agree on before the batch is used.
    pub fn checksum(&self) -> [u8; 32] {
        artifact_digest(
            Self::KIND,
            &self.run_id,
            &[self.nparties as u64, self.triples.len() as u64],
        )
    }

    /// Writes the batch to `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        write_artifact(self, path)
    }

    /// Reads a batch from `path`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        read_artifact(path)
    }

    /// Overwrites all shares with zeros and frees them.
    pub fn release(mut self) {
        self.triples.zeroize();
    }
}

/// Produces the triples the online circuit consumes.
pub struct TripleGenerator {
    params: ProtocolParams,
    base_ot: BaseOtMode,
    source: TripleSource,
}

impl TripleGenerator {
    /// Generator for the local party.
    pub fn new(params: ProtocolParams, base_ot: BaseOtMode, source: TripleSource) -> Self {
        Self {
            params,
            base_ot,
            source,
        }
    }

    /// Generates exactly `required` triples, one per AND gate of the circuit.
    pub fn generate_triples<C: AbstractChannel + Send>(
        &self,
        mesh: &mut Mesh<C>,
        rng: &mut AesRng,
        run_id: RunId,
        required: usize,
    ) -> Result<TripleBatch> {
        info!(
            "party {} generating {} triples ({:?})",
            self.params.me, required, self.source
        );

        let triples = match self.source {
            TripleSource::Ot => self
                .ot_triples(mesh, rng, required)
                .with_context(|| format!("@{}:{}", file!(), line!()))?,
            #[cfg(any(test, feature = "insecure-test-modes"))]
            TripleSource::InsecureFake => {
                tracing::warn!("party {} uses insecure fake triples", self.params.me);
                fake_triples(&self.params, required)
            }
        };

        let batch = TripleBatch::new(run_id, self.params.nparties, triples);
        batch.ensure_covers(required)?;

        Ok(batch)
    }

    fn ot_triples<C: AbstractChannel + Send>(
        &self,
        mesh: &mut Mesh<C>,
        rng: &mut AesRng,
        count: usize,
    ) -> Result<Vec<Triple>> {
        let a = (0..count).map(|_| rng.gen::<bool>()).collect::<Vec<_>>();
        let b = (0..count).map(|_| rng.gen::<u128>()).collect::<Vec<_>>();
        let mut c = a
            .iter()
            .zip(&b)
            .map(|(&a, &b)| if a { b } else { 0 })
            .collect::<Vec<_>>();

        if count == 0 {
            return Ok(Vec::new());
        }

        let me = self.params.me;
        let base_ot = self.base_ot;
        let (a_ref, b_ref) = (&a, &b);

        let cross_terms = mesh.for_each_peer(rng, |link, rng| {
            let peer = link.peer();
            link.with_raw(|channel| {
                let mut acc = vec![0u128; count];
                // the lower index is OT sender first
                for sending in [me < peer, me > peer] {
                    if sending {
                        let mut ot = BlockOtSender::init(base_ot, channel, rng)?;
                        let masks = (0..count).map(|_| rng.gen::<u128>()).collect::<Vec<_>>();
                        let messages = masks
                            .iter()
                            .zip(b_ref)
                            .map(|(&r, &b)| (r, r ^ b))
                            .collect::<Vec<_>>();
                        ot.send(channel, &messages, rng)?;
                        xor_into(&mut acc, &masks);
                    } else {
                        let mut ot = BlockOtReceiver::init(base_ot, channel, rng)?;
                        let received = ot.receive(channel, a_ref, rng)?;
                        xor_into(&mut acc, &received);
                    }
                }
                Ok(acc)
            })
            .with_context(|| format!("triples with party {} @{}:{}", peer, file!(), line!()))
        })?;

        for (peer, share) in cross_terms {
            debug!("party {} folded {} cross terms of party {}", me, share.len(), peer);
            xor_into(&mut c, &share);
        }

        Ok(a
            .into_iter()
            .zip(b)
            .zip(c)
            .map(|((a, b), c)| Triple { a, b, c })
            .collect())
    }
}

fn cursor_error(cursor: usize, e: CursorError) -> MpsuError {
    match e {
        CursorError::Exhausted {
            requested,
            remaining,
        } => MpsuError::TripleShortfall {
            required: cursor + requested,
            produced: cursor + remaining,
        },
        e => MpsuError::TripleConsistency(e.to_string()),
    }
}

fn xor_into(acc: &mut [u128], other: &[u128]) {
    for (x, y) in acc.iter_mut().zip(other) {
        *x ^= y;
    }
}

#[cfg(any(test, feature = "insecure-test-modes"))]
fn fake_triples(params: &ProtocolParams, count: usize) -> Vec<Triple> {
    use crate::entropy::public_rng;

    let k = params.nparties;
    let mut rng = public_rng(FAKE_TRIPLE_SEED);

    (0..count)
        .map(|_| {
            let shares = (0..k)
                .map(|_| (rng.gen::<bool>(), rng.gen::<u128>()))
                .collect::<Vec<_>>();
            let a = shares.iter().fold(false, |acc, s| acc ^ s.0);
            let b = shares.iter().fold(0u128, |acc, s| acc ^ s.1);

            let mut c_shares = (0..k - 1).map(|_| rng.gen::<u128>()).collect::<Vec<_>>();
            let c_rest = c_shares.iter().fold(if a { b } else { 0 }, |acc, c| acc ^ c);
            c_shares.push(c_rest);

            Triple {
                a: shares[params.me].0,
                b: shares[params.me].1,
                c: c_shares[params.me],
            }
        })
        .collect()
}
