//! Conceal, shuffle and reveal the candidate elements.
//!
//! Every party `p` in turn permutes the shared vector with its secret permutation: the others
//! send it their shares masked with `a_q` and take `b_q` as their new share, `p` permutes the
//! sum and adds `Δ_p`. After all rounds no party knows where any entry went.

use crate::channel_utils::{bytes_to_words, words_to_bytes, Mesh, Phase, SessionId};
use crate::circuit::BeaverEvaluator;
use crate::error::MpsuError;
use crate::offline::share_correlation::{padded_width, xor_lanes_into, Lanes, LANES};
use crate::offline::{ShareCorrelation, ShuffleRound};
use crate::set_utils::PaddedSet;
use crate::shuffle::benes;
use crate::{Element, ProtocolParams, OUTPUT_PARTY};
use anyhow::{Context, Result};
use scuttlebutt::AbstractChannel;
use tracing::{debug, info};

fn encode(entries: &[Lanes]) -> Vec<u8> {
    let words = entries.iter().flatten().copied().collect::<Vec<_>>();
    words_to_bytes(&words)
}

fn decode(bytes: &[u8]) -> Result<Vec<Lanes>> {
    let words = bytes_to_words(bytes)?;
    Ok(words
        .chunks_exact(LANES)
        .map(|c| {
            let mut lanes = [0u128; LANES];
            lanes.copy_from_slice(c);
            lanes
        })
        .collect())
}

fn mismatch(reason: String) -> anyhow::Error {
    MpsuError::ShuffleCorrelationMismatch(reason).into()
}

/// Shuffles the shared candidates of one run with a [ShareCorrelation].
pub struct ObliviousShuffleEngine {
    params: ProtocolParams,
    correlation: ShareCorrelation,
}

impl ObliviousShuffleEngine {
    /// Takes ownership of the correlation after checking it fits this run.
    pub fn new(params: ProtocolParams, correlation: ShareCorrelation) -> Result<Self> {
        let batch = params.shuffle_batch();
        if correlation.batch_size() != batch || correlation.width() != padded_width(batch) {
            return Err(mismatch(format!(
                "correlation for {} entries of width {}, the run shuffles {}",
                correlation.batch_size(),
                correlation.width(),
                batch
            )));
        }
        Ok(Self {
            params,
            correlation,
        })
    }

    fn width(&self) -> usize {
        self.correlation.width()
    }

    /// Confirms that every peer holds a correlation from the same offline run.
    pub fn verify_peers<C: AbstractChannel + Send>(&self, mesh: &mut Mesh<C>) -> Result<()> {
        let checksum = self.correlation.checksum();
        let received = mesh
            .exchange(SessionId::new(Phase::ArtifactCheck, 0), &checksum)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        for (peer, theirs) in received {
            if theirs[..] != checksum[..] {
                return Err(mismatch(format!(
                    "party {} holds a correlation of another run (ours is {})",
                    peer,
                    self.correlation.run_id()
                )));
            }
        }
        Ok(())
    }

    /// Builds the shuffle input `[e ∧ ¬suppress, suppress]` for every slot of parties `1..k`,
    /// padded with suppressed zero entries.
    pub fn conceal<C: AbstractChannel + Send>(
        &self,
        evaluator: &mut BeaverEvaluator<'_, C>,
        set: &PaddedSet,
        suppress: &[bool],
    ) -> Result<Vec<Lanes>> {
        let ProtocolParams { me, nparties, .. } = self.params;
        let batch = self.params.shuffle_batch();
        if suppress.len() != batch {
            return Err(mismatch(format!(
                "{} suppress bits for a batch of {}",
                suppress.len(),
                batch
            )));
        }

        let keep = evaluator.not(suppress);
        let words = (1..nparties)
            .flat_map(|i| {
                set.slots()
                    .iter()
                    .map(move |&x| if me == i { x } else { 0 })
            })
            .collect::<Vec<_>>();
        let concealed = evaluator
            .and_wide(&keep, &words)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        evaluator.verify_transcript()?;

        let pad = [0, evaluator.constant(true) as u128];
        let mut entries = concealed
            .into_iter()
            .zip(suppress)
            .map(|(e, &s)| [e, s as u128])
            .collect::<Vec<_>>();
        entries.resize(self.width(), pad);

        Ok(entries)
    }

    /// Runs one permute-and-reshare round per party.
    pub fn shuffle<C: AbstractChannel + Send>(
        &mut self,
        mesh: &mut Mesh<C>,
        entries: Vec<Lanes>,
    ) -> Result<Vec<Lanes>> {
        let ProtocolParams { me, nparties, .. } = self.params;
        let width = self.width();
        if entries.len() != width {
            return Err(mismatch(format!(
                "{} entries for a correlation of width {}",
                entries.len(),
                width
            )));
        }

        info!("party {} shuffling {} entries", me, width);
        let mut entries = entries;
        for p in 0..nparties {
            let session = SessionId::new(Phase::Shuffle, p as u32);
            let round = self.correlation.next_round(p)?;

            entries = match (round, p == me) {
                (ShuffleRound::Permuter { perm, delta }, true) => {
                    let mut sum = entries;
                    let received = mesh
                        .gather(session, width * LANES * 16)
                        .with_context(|| format!("@{}:{}", file!(), line!()))?;
                    for (_, bytes) in received {
                        xor_lanes_into(&mut sum, &decode(&bytes)?);
                    }

                    let perm = perm.iter().map(|&i| i as usize).collect::<Vec<_>>();
                    let mut permuted = benes::apply_permutation(&perm, &sum);
                    xor_lanes_into(&mut permuted, delta);
                    permuted
                }
                (ShuffleRound::Helper { mask_in, mask_out }, false) => {
                    let mut masked = entries;
                    xor_lanes_into(&mut masked, mask_in);
                    mesh.send_to(p, session, &encode(&masked))
                        .with_context(|| format!("@{}:{}", file!(), line!()))?;
                    mask_out.clone()
                }
                _ => {
                    return Err(mismatch(format!(
                        "round {} of party {} holds the wrong role",
                        p, me
                    )))
                }
            };
            debug!("party {} finished shuffle round {}", me, p);
        }

        Ok(entries)
    }

    /// Sends every share to the output party, which keeps the unsuppressed elements.
    pub fn reveal<C: AbstractChannel + Send>(
        &self,
        mesh: &mut Mesh<C>,
        entries: Vec<Lanes>,
    ) -> Result<Option<Vec<Element>>> {
        let session = SessionId::new(Phase::Reveal, 0);
        if self.params.me != OUTPUT_PARTY {
            mesh.send_to(OUTPUT_PARTY, session, &encode(&entries))
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            return Ok(None);
        }

        let mut opened = entries;
        let received = mesh
            .gather(session, opened.len() * LANES * 16)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        for (_, bytes) in received {
            xor_lanes_into(&mut opened, &decode(&bytes)?);
        }

        let revealed = opened
            .into_iter()
            .filter(|[_, suppress]| suppress & 1 == 0)
            .map(|[e, _]| e)
            .collect::<Vec<_>>();
        debug!("revealed {} new elements", revealed.len());

        Ok(Some(revealed))
    }

    /// Zeroizes what is left of the correlation.
    pub fn release(self) {
        self.correlation.release();
    }
}
