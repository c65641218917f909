//! Permutation correlations for the oblivious shuffle.
//!
//! For every permuting party `p` the generator leaves `p` with a random permutation `π` of
//! `w` slots and a mask `Δ`, and every other party `q` with masks `a_q`, `b_q`, such that
//!
//! ```text
//! π(a_1 ⊕ … ⊕ a_{k-1}) = Δ ⊕ b_1 ⊕ … ⊕ b_{k-1}
//! ```
//!
//! Each pair `(p, q)` runs an oblivious switching network: `q` secret-shares `a_q` with `p`
//! and the two push the shares through a Beneš network whose switches only `p` controls. At
//! a switch `q` offers `(r, r ⊕ t_q)` where `t_q` is the XOR of its two wire shares, `p`
//! selects with the switch bit, and both add their result to the two wires.

use super::store::{read_artifact, write_artifact, Artifact};
use crate::arena::ConsumptionArena;
use crate::channel_utils::{Mesh, Phase, SessionId};
use crate::error::MpsuError;
use crate::hash_utils::artifact_digest;
use crate::ot::{BaseOtMode, BlockOtReceiver, BlockOtSender};
use crate::shuffle::benes;
use crate::{PartyIndex, ProtocolParams, RunId};
use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use scuttlebutt::{AbstractChannel, AesRng};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroize;

/// Words carried per shuffled entry: the concealed element and its suppression flag.
pub const LANES: usize = 2;

/// One shuffled entry.
pub type Lanes = [u128; LANES];

/// Shuffle width for `batch` entries: the next power of two.
pub fn padded_width(batch: usize) -> usize {
    if batch == 0 {
        0
    } else {
        batch.next_power_of_two()
    }
}

/// A party's material for the round in which party `p` permutes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShuffleRound {
    /// Held by `p` itself.
    Permuter {
        /// Gather permutation, `out[i] = in[perm[i]]`.
        perm: Vec<u32>,
        /// Mask added to the permuted vector.
        delta: Vec<Lanes>,
    },
    /// Held by every other party.
    Helper {
        /// Mask added to the share sent to `p`.
        mask_in: Vec<Lanes>,
        /// New share after the round.
        mask_out: Vec<Lanes>,
    },
}

impl Zeroize for ShuffleRound {
    fn zeroize(&mut self) {
        match self {
            ShuffleRound::Permuter { perm, delta } => {
                perm.zeroize();
                delta.zeroize();
            }
            ShuffleRound::Helper { mask_in, mask_out } => {
                mask_in.zeroize();
                mask_out.zeroize();
            }
        }
    }
}

/// A party's share of the correlation for one shuffle, one round per party.
#[derive(Debug, Serialize, Deserialize)]
pub struct ShareCorrelation {
    run_id: RunId,
    nparties: usize,
    batch_size: usize,
    width: usize,
    rounds: ConsumptionArena<ShuffleRound>,
}

impl Artifact for ShareCorrelation {
    const KIND: &'static str = "share_correlation";

    fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

impl ShareCorrelation {
    /// Run that generated the correlation.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Entries the correlation was generated for.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Padded width, a power of two (or zero).
    pub fn width(&self) -> usize {
        self.width
    }

    /// Public checksum of the run id and the shape `(k, batch, width)`.
    ///
    /// It is exchanged once after generation and again before the online phase. It binds the
    /// metadata only and cannot detect altered masks.
    pub fn checksum(&self) -> [u8; 32] {
        artifact_digest(
            Self::KIND,
            &self.run_id,
            &[
                self.nparties as u64,
                self.batch_size as u64,
                self.width as u64,
            ],
        )
    }

    /// Material for the round of `permuter`. Rounds must be taken in party order, once.
    pub fn next_round(&mut self, permuter: PartyIndex) -> Result<&ShuffleRound> {
        let taken = self.rounds.take_at(permuter, 1).map_err(|e| {
            MpsuError::ShuffleCorrelationMismatch(format!("round of party {}: {}", permuter, e))
        })?;
        taken
            .first()
            .with_context(|| format!("empty round {} @{}:{}", permuter, file!(), line!()))
    }

    /// Writes the correlation to `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        write_artifact(self, path)
    }

    /// Reads a correlation from `path`.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        read_artifact(path)
    }

    /// Overwrites all masks and permutations with zeros and frees them.
    pub fn release(mut self) {
        self.rounds.zeroize();
    }
}

/// Runs the offline generation of [ShareCorrelation]s.
pub struct ShareCorrelationGenerator {
    params: ProtocolParams,
    base_ot: BaseOtMode,
}

// per-peer outcome: (helper material for the peer's rounds, my output shares as permuter)
type PeerMaterial = (Vec<(Vec<Lanes>, Vec<Lanes>)>, Vec<Vec<Lanes>>);

impl ShareCorrelationGenerator {
    /// Generator for the local party.
    pub fn new(params: ProtocolParams, base_ot: BaseOtMode) -> Self {
        Self { params, base_ot }
    }

    /// One correlation sized for the shuffle of this run.
    pub fn generate<C: AbstractChannel + Send>(
        &self,
        mesh: &mut Mesh<C>,
        rng: &mut AesRng,
        run_id: RunId,
    ) -> Result<ShareCorrelation> {
        match self.generate_many(mesh, rng, run_id, 1)?.pop() {
            Some(c) => Ok(c),
            None => bail!("no correlation generated @{}:{}", file!(), line!()),
        }
    }

    /// `instances` independent correlations sharing one OT setup per link.
    pub fn generate_many<C: AbstractChannel + Send>(
        &self,
        mesh: &mut Mesh<C>,
        rng: &mut AesRng,
        run_id: RunId,
        instances: usize,
    ) -> Result<Vec<ShareCorrelation>> {
        let ProtocolParams { me, nparties, .. } = self.params;
        let batch_size = self.params.shuffle_batch();
        let width = padded_width(batch_size);
        if width > u32::MAX as usize {
            bail!("shuffle width {} is too large @{}:{}", width, file!(), line!());
        }

        info!(
            "party {} generating {} share correlation(s) of width {}",
            me, instances, width
        );

        let perms = (0..instances)
            .map(|_| {
                let mut perm = (0..width).collect::<Vec<_>>();
                perm.shuffle(rng);
                perm
            })
            .collect::<Vec<_>>();
        let bits = perms.iter().map(|p| benes::route(p)).collect::<Vec<_>>();

        let base_ot = self.base_ot;
        let switches = benes::switch_count(width);
        let bits_ref = &bits;

        let per_peer = mesh.for_each_peer(rng, |link, rng| -> Result<PeerMaterial> {
            let peer = link.peer();
            if switches == 0 {
                // no switches, nothing to transfer: b = a and u = 0
                let helper = (0..instances)
                    .map(|_| {
                        let a = random_lanes(rng, width);
                        (a.clone(), a)
                    })
                    .collect();
                let mine = (0..instances).map(|_| vec![[0u128; LANES]; width]).collect();
                return Ok((helper, mine));
            }

            link.with_raw(|channel| {
                let mut helper = Vec::with_capacity(instances);
                let mut mine = Vec::with_capacity(instances);
                // the lower index acts as helper first
                for helping in [me < peer, me > peer] {
                    if helping {
                        let mut ot = BlockOtSender::init(base_ot, channel, rng)?;
                        for _ in 0..instances {
                            let a = random_lanes(rng, width);
                            let b = switch_as_helper(&mut ot, channel, rng, &a)?;
                            helper.push((a, b));
                        }
                    } else {
                        let mut ot = BlockOtReceiver::init(base_ot, channel, rng)?;
                        for bits in bits_ref {
                            mine.push(switch_as_permuter(&mut ot, channel, rng, bits, width)?);
                        }
                    }
                }
                Ok((helper, mine))
            })
            .with_context(|| format!("share correlation with party {} @{}:{}", peer, file!(), line!()))
        })?;

        let mut deltas = vec![vec![[0u128; LANES]; width]; instances];
        let mut helper_rounds = Vec::with_capacity(per_peer.len());
        for (peer, (helper, mine)) in per_peer {
            for (delta, u) in deltas.iter_mut().zip(mine) {
                xor_lanes_into(delta, &u);
            }
            helper_rounds.push((peer, helper));
        }
        debug!("party {} folded {} permuter shares", me, helper_rounds.len());

        // assemble instance by instance, rounds indexed by the permuting party
        let mut perms = perms.into_iter();
        let mut deltas = deltas.into_iter();
        let mut helpers = helper_rounds
            .into_iter()
            .map(|(peer, h)| (peer, h.into_iter()))
            .collect::<Vec<_>>();

        let mut correlations = Vec::with_capacity(instances);
        for _ in 0..instances {
            let mut rounds = Vec::with_capacity(nparties);
            let (perm, delta) = match (perms.next(), deltas.next()) {
                (Some(p), Some(d)) => (p, d),
                _ => bail!("missing permutation material @{}:{}", file!(), line!()),
            };
            let mut own = Some(ShuffleRound::Permuter {
                perm: perm.into_iter().map(|i| i as u32).collect(),
                delta,
            });

            for p in 0..nparties {
                if p == me {
                    if let Some(round) = own.take() {
                        rounds.push(round);
                    }
                    continue;
                }
                let (_, iter) = match helpers.iter_mut().find(|(peer, _)| *peer == p) {
                    Some(h) => h,
                    None => bail!("no helper material for party {} @{}:{}", p, file!(), line!()),
                };
                let (mask_in, mask_out) = match iter.next() {
                    Some(m) => m,
                    None => bail!("helper material for party {} ran out @{}:{}", p, file!(), line!()),
                };
                rounds.push(ShuffleRound::Helper { mask_in, mask_out });
            }

            correlations.push(ShareCorrelation {
                run_id,
                nparties,
                batch_size,
                width,
                rounds: ConsumptionArena::new(rounds),
            });
        }

        confirm_checksums(mesh, &correlations)?;
        Ok(correlations)
    }
}

// Every peer must have produced correlations for the same run and shape.
fn confirm_checksums<C: AbstractChannel + Send>(
    mesh: &mut Mesh<C>,
    correlations: &[ShareCorrelation],
) -> Result<()> {
    let ours = correlations
        .iter()
        .flat_map(|c| c.checksum())
        .collect::<Vec<_>>();
    let received = mesh
        .exchange(SessionId::new(Phase::ShareCorrelation, 0), &ours)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    for (peer, theirs) in received {
        if theirs != ours {
            return Err(MpsuError::ProtocolAbort(format!(
                "party {} generated share correlations for another run or shape",
                peer
            ))
            .into());
        }
    }
    Ok(())
}

fn random_lanes(rng: &mut AesRng, width: usize) -> Vec<Lanes> {
    (0..width).map(|_| rng.gen::<Lanes>()).collect()
}

pub(crate) fn xor_lanes_into(acc: &mut [Lanes], other: &[Lanes]) {
    for (x, y) in acc.iter_mut().zip(other) {
        for l in 0..LANES {
            x[l] ^= y[l];
        }
    }
}

// Helper side of the switching network: input shares `a`, output shares returned.
fn switch_as_helper<C: AbstractChannel>(
    ot: &mut BlockOtSender,
    channel: &mut C,
    rng: &mut AesRng,
    a: &[Lanes],
) -> Result<Vec<Lanes>> {
    let mut shares = a.to_vec();
    let mut messages = Vec::with_capacity(benes::switch_count(a.len()) * LANES);

    benes::traverse(&mut shares, &mut |x: &mut Lanes, y: &mut Lanes| {
        for l in 0..LANES {
            let r = rng.gen::<u128>();
            messages.push((r, r ^ x[l] ^ y[l]));
            x[l] ^= r;
            y[l] ^= r;
        }
    });

    ot.send(channel, &messages, rng)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    Ok(shares)
}

// Permuter side: starts from zero shares, returns shares of π(a) masked by the helper's output.
fn switch_as_permuter<C: AbstractChannel>(
    ot: &mut BlockOtReceiver,
    channel: &mut C,
    rng: &mut AesRng,
    bits: &[bool],
    width: usize,
) -> Result<Vec<Lanes>> {
    let choices = bits.iter().flat_map(|&s| [s; LANES]).collect::<Vec<_>>();
    let received = ot
        .receive(channel, &choices, rng)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;

    let mut shares = vec![[0u128; LANES]; width];
    let mut bits = bits.iter();
    let mut received = received.chunks_exact(LANES);

    benes::traverse(&mut shares, &mut |x: &mut Lanes, y: &mut Lanes| {
        if let (Some(&s), Some(m)) = (bits.next(), received.next()) {
            for l in 0..LANES {
                let t = if s { x[l] ^ y[l] } else { 0 };
                let v = t ^ m[l];
                x[l] ^= v;
                y[l] ^= v;
            }
        }
    });

    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::run_parties;

    fn generate(nparties: usize, set_size: usize, instances: usize) -> Vec<Vec<ShareCorrelation>> {
        run_parties(nparties, set_size, move |params, mesh| {
            let mut rng = AesRng::new();
            ShareCorrelationGenerator::new(params, BaseOtMode::Alsz)
                .generate_many(mesh, &mut rng, RunId([5u8; 32]), instances)
                .unwrap()
        })
    }

    // π_p(⊕ a_q) == Δ_p ⊕ (⊕ b_q) for every permuting party p
    fn check_invariant(mut correlations: Vec<ShareCorrelation>) {
        let nparties = correlations.len();
        let width = correlations[0].width();

        for p in 0..nparties {
            let mut sum_in = vec![[0u128; LANES]; width];
            let mut rhs = vec![[0u128; LANES]; width];
            let mut perm = Vec::new();

            for c in correlations.iter_mut() {
                match c.next_round(p).unwrap() {
                    ShuffleRound::Permuter { perm: pi, delta } => {
                        perm = pi.iter().map(|&i| i as usize).collect();
                        xor_lanes_into(&mut rhs, delta);
                    }
                    ShuffleRound::Helper { mask_in, mask_out } => {
                        xor_lanes_into(&mut sum_in, mask_in);
                        xor_lanes_into(&mut rhs, mask_out);
                    }
                }
            }

            assert_eq!(benes::apply_permutation(&perm, &sum_in), rhs, "round {}", p);
        }
    }

    #[test]
    fn test_correlation_invariant_3party() {
        let mut per_party = generate(3, 3, 1);
        let correlations = per_party.iter_mut().map(|c| c.pop().unwrap()).collect::<Vec<_>>();
        assert_eq!(correlations[0].batch_size(), 6);
        assert_eq!(correlations[0].width(), 8);
        check_invariant(correlations);
    }

    #[test]
    fn test_many_instances_2party() {
        let per_party = generate(2, 5, 3);
        let mut transposed = vec![Vec::new(); 3];
        for instances in per_party {
            for (i, c) in instances.into_iter().enumerate() {
                transposed[i].push(c);
            }
        }
        for correlations in transposed {
            check_invariant(correlations);
        }
    }

    #[test]
    fn test_single_entry_needs_no_switches() {
        let mut per_party = generate(2, 1, 1);
        let correlations = per_party.iter_mut().map(|c| c.pop().unwrap()).collect::<Vec<_>>();
        assert_eq!(correlations[0].width(), 1);
        check_invariant(correlations);
    }

    #[test]
    fn test_run_disagreement_aborts_generation() {
        let results = run_parties(3, 2, |params, mesh| {
            let mut rng = AesRng::new();
            let run = RunId([(params.me == 2) as u8; 32]);
            let err = ShareCorrelationGenerator::new(params, BaseOtMode::Alsz)
                .generate(mesh, &mut rng, run)
                .unwrap_err();
            matches!(
                crate::error::classify(&err),
                Some(MpsuError::ProtocolAbort(_))
            )
        });
        assert_eq!(results, vec![true, true, true]);
    }

    #[test]
    fn test_round_is_consumed_once() {
        let mut per_party = generate(2, 2, 1);
        let mut correlation = per_party[1].pop().unwrap();

        correlation.next_round(0).unwrap();
        let err = correlation.next_round(0).unwrap_err();
        assert!(matches!(
            crate::error::classify(&err),
            Some(MpsuError::ShuffleCorrelationMismatch(_))
        ));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corr.bin");
        let mut per_party = generate(2, 4, 1);
        let mut original = per_party[0].pop().unwrap();

        original.write_to_file(&path).unwrap();
        let mut loaded = ShareCorrelation::load_from_file(&path).unwrap();

        assert_eq!(loaded.checksum(), original.checksum());
        for p in 0..2 {
            assert_eq!(loaded.next_round(p).unwrap(), original.next_round(p).unwrap());
        }
    }
}
