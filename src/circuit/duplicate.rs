//! Marks every slot that must not reach the output.
//!
//! Slot `t` of party `i ≥ 1` is suppressed if it is a dummy or its element already belongs to
//! a party with a lower index. Party 0's slots are never shuffled, so its elements always win.

use super::gmw::BeaverEvaluator;
use super::membership::MembershipShares;
use crate::set_utils::PaddedSet;
use crate::ProtocolParams;
use anyhow::{bail, Context, Result};
use scuttlebutt::AbstractChannel;
use tracing::debug;

/// Evaluates `suppress_{i,t} = dummy_{i,t} ∨ m_{i,0,t} ∨ … ∨ m_{i,i−1,t}`.
pub struct SecureDuplicateCircuit {
    params: ProtocolParams,
}

impl SecureDuplicateCircuit {
    /// Circuit for the parameters of this run.
    pub fn new(params: ProtocolParams) -> Self {
        Self { params }
    }

    /// AND gates consumed: `i` per slot of party `i`.
    pub fn and_gates(nparties: usize, set_size: usize) -> usize {
        set_size * nparties * nparties.saturating_sub(1) / 2
    }

    /// Shares of the suppress bits of all slots of parties `1..k`, party-major.
    pub fn evaluate<C: AbstractChannel + Send>(
        &self,
        evaluator: &mut BeaverEvaluator<'_, C>,
        set: &PaddedSet,
        membership: &MembershipShares,
    ) -> Result<Vec<bool>> {
        let ProtocolParams {
            me,
            nparties,
            set_size,
            ..
        } = self.params;
        if set.len() != set_size {
            bail!(
                "padded set has {} slots, expected {} @{}:{}",
                set.len(),
                set_size,
                file!(),
                line!()
            );
        }

        let mut groups = Vec::with_capacity(nparties.saturating_sub(1) * set_size);
        for i in 1..nparties {
            for t in 0..set_size {
                let mut group = Vec::with_capacity(i + 1);
                group.push(evaluator.input(i, set.dummy()[t]));
                for j in 0..i {
                    match membership.get(i, j, t) {
                        Some(m) => group.push(m),
                        None => bail!("no membership share for ({}, {}, {}) @{}:{}", i, j, t, file!(), line!()),
                    }
                }
                groups.push(group);
            }
        }

        let suppress = evaluator
            .or_reduce(groups)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        evaluator.verify_transcript()?;
        debug!("party {} computed {} suppress bits", me, suppress.len());

        Ok(suppress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::membership::{EqualityCircuitOracle, MembershipOracle};
    use crate::offline::{TripleGenerator, TripleSource};
    use crate::ot::BaseOtMode;
    use crate::test_utils::run_parties;
    use crate::RunId;
    use scuttlebutt::AesRng;

    #[test]
    fn test_earliest_owner_wins() {
        let sets = vec![vec![1u128, 2], vec![2, 3], vec![3, 4], vec![1]];
        let set_size = 2;
        let nparties = sets.len();

        let shares = run_parties(nparties, set_size, move |params, mesh| {
            let mut rng = AesRng::new();
            let required = EqualityCircuitOracle.and_gates(nparties, set_size)
                + SecureDuplicateCircuit::and_gates(nparties, set_size);
            let triples = TripleGenerator::new(params, BaseOtMode::Alsz, TripleSource::InsecureFake)
                .generate_triples(mesh, &mut rng, RunId([4u8; 32]), required)
                .unwrap();

            let set = PaddedSet::new(&sets[params.me], set_size);
            let mut evaluator = BeaverEvaluator::new(params, mesh, triples);
            let membership = EqualityCircuitOracle
                .membership(&mut evaluator, &set, &mut rng)
                .unwrap();
            let suppress = SecureDuplicateCircuit::new(params)
                .evaluate(&mut evaluator, &set, &membership)
                .unwrap();
            assert_eq!(evaluator.remaining_triples(), 0);
            suppress
        });

        let opened = (0..shares[0].len())
            .map(|x| shares.iter().fold(false, |acc, s| acc ^ s[x]))
            .collect::<Vec<_>>();
        // party 1: 2 dup, 3 new; party 2: 3 dup, 4 new; party 3: 1 dup, dummy
        assert_eq!(opened, vec![true, false, true, false, true, true]);
    }
}
