//! Secret-shared membership bits between the sets of every pair of parties.

use super::gmw::BeaverEvaluator;
use crate::set_utils::PaddedSet;
use anyhow::{bail, Context, Result};
use itertools::iproduct;
use scuttlebutt::{AbstractChannel, AesRng};
use tracing::{debug, info};

const ELEMENT_BITS: usize = 128;

/// For every `i ≥ 1`, `j < i` and slot `t`, the local share of `[e_{i,t} ∈ S_j]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipShares {
    nparties: usize,
    set_size: usize,
    shares: Vec<bool>,
}

fn pair_offset(i: usize, j: usize) -> usize {
    i * (i - 1) / 2 + j
}

impl MembershipShares {
    /// Wraps shares ordered by `i`, then `j`, then `t`.
    pub fn new(nparties: usize, set_size: usize, shares: Vec<bool>) -> Result<Self> {
        let expected = nparties * nparties.saturating_sub(1) / 2 * set_size;
        if shares.len() != expected {
            bail!(
                "{} membership shares for {} parties of {} slots, expected {} @{}:{}",
                shares.len(),
                nparties,
                set_size,
                expected,
                file!(),
                line!()
            );
        }
        Ok(Self {
            nparties,
            set_size,
            shares,
        })
    }

    /// Share of "slot `t` of party `i` is an element of party `j`", `j < i`.
    pub fn get(&self, i: usize, j: usize, t: usize) -> Option<bool> {
        if j >= i || i >= self.nparties || t >= self.set_size {
            return None;
        }
        self.shares
            .get(pair_offset(i, j) * self.set_size + t)
            .copied()
    }
}

/// Produces [MembershipShares] inside the shared circuit.
///
/// The duplicate circuit only needs the shares, so any private membership test can be plugged
/// in here as long as it states how many triples it consumes.
pub trait MembershipOracle {
    /// AND gates consumed for `nparties` sets of `set_size` slots.
    fn and_gates(&self, nparties: usize, set_size: usize) -> usize;

    /// Runs the membership test for the local `set`. `rng` is there for oracles that mask
    /// their inputs.
    fn membership<C: AbstractChannel + Send>(
        &mut self,
        evaluator: &mut BeaverEvaluator<'_, C>,
        set: &PaddedSet,
        rng: &mut AesRng,
    ) -> Result<MembershipShares>;
}

/// Compares every slot pair bit by bit with an equality circuit.
///
/// A comparison ANDs the 128 negated bits of `e_{i,t} ⊕ e_{j,u}` together with the shared
/// flag "slot `u` of party `j` is real", 128 gates in all. Each membership bit costs another
/// `n − 1` for the OR, so the cost grows with `n²`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EqualityCircuitOracle;

impl MembershipOracle for EqualityCircuitOracle {
    fn and_gates(&self, nparties: usize, set_size: usize) -> usize {
        if set_size == 0 {
            return 0;
        }
        let pairs = nparties * nparties.saturating_sub(1) / 2;
        let comparisons = pairs * set_size * set_size;
        comparisons * ELEMENT_BITS + pairs * set_size * (set_size - 1)
    }

    fn membership<C: AbstractChannel + Send>(
        &mut self,
        evaluator: &mut BeaverEvaluator<'_, C>,
        set: &PaddedSet,
        _rng: &mut AesRng,
    ) -> Result<MembershipShares> {
        let me = evaluator.me();
        let n = set.len();
        let nparties = evaluator.nparties();
        let slots = set.slots();
        let dummy = set.dummy();

        info!(
            "party {} comparing {} slot pairs",
            me,
            nparties * nparties.saturating_sub(1) / 2 * n * n
        );

        // one group per comparison: negated XOR bits, then the lower party's real-slot flag
        let mut groups = Vec::new();
        for (i, j, t, u) in iproduct!(1..nparties, 0..nparties, 0..n, 0..n) {
            if j >= i {
                continue;
            }
            let mut diff = 0u128;
            if me == i {
                diff ^= slots[t];
            }
            if me == j {
                diff ^= slots[u];
            }
            let bits = (0..ELEMENT_BITS)
                .map(|b| (diff >> b) & 1 == 1)
                .collect::<Vec<_>>();
            let mut group = evaluator.not(&bits);
            group.push(evaluator.input(j, !dummy[u]));
            groups.push(group);
        }

        let equal = evaluator
            .and_reduce(groups)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        debug!("party {} evaluated {} equality tests", me, equal.len());

        let per_slot = if n == 0 {
            Vec::new()
        } else {
            equal.chunks(n).map(|c| c.to_vec()).collect::<Vec<_>>()
        };
        let shares = evaluator
            .or_reduce(per_slot)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        evaluator.verify_transcript()?;

        MembershipShares::new(nparties, n, shares)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitShape;
    use crate::offline::{TripleGenerator, TripleSource};
    use crate::ot::BaseOtMode;
    use crate::test_utils::run_parties;
    use crate::RunId;

    fn run_oracle(sets: Vec<Vec<u128>>, set_size: usize) -> Vec<MembershipShares> {
        let nparties = sets.len();
        run_parties(nparties, set_size, move |params, mesh| {
            let mut rng = AesRng::new();
            let oracle = EqualityCircuitOracle;
            let required = oracle.and_gates(nparties, set_size);
            let triples = TripleGenerator::new(params, BaseOtMode::Alsz, TripleSource::InsecureFake)
                .generate_triples(mesh, &mut rng, RunId([2u8; 32]), required)
                .unwrap();

            let set = PaddedSet::new(&sets[params.me], set_size);
            let mut evaluator = BeaverEvaluator::new(params, mesh, triples);
            let shares = EqualityCircuitOracle
                .membership(&mut evaluator, &set, &mut rng)
                .unwrap();
            assert_eq!(evaluator.release(), required);
            shares
        })
    }

    fn open(shares: &[MembershipShares], i: usize, j: usize, t: usize) -> bool {
        shares
            .iter()
            .fold(false, |acc, s| acc ^ s.get(i, j, t).unwrap())
    }

    #[test]
    fn test_membership_3party() {
        // slot order of each padded set follows the input order
        let sets = vec![vec![10, 20, 30], vec![20, 40, 50], vec![50, 30, 10]];
        let shares = run_oracle(sets, 3);

        assert_eq!(
            (0..3).map(|t| open(&shares, 1, 0, t)).collect::<Vec<_>>(),
            vec![true, false, false]
        );
        assert_eq!(
            (0..3).map(|t| open(&shares, 2, 0, t)).collect::<Vec<_>>(),
            vec![false, true, true]
        );
        assert_eq!(
            (0..3).map(|t| open(&shares, 2, 1, t)).collect::<Vec<_>>(),
            vec![true, false, false]
        );
    }

    #[test]
    fn test_dummies_match_nothing() {
        // dummy slots hold 0, a real 0 must not match them
        let sets = vec![vec![1], vec![0]];
        let shares = run_oracle(sets, 2);
        assert!(!open(&shares, 1, 0, 0));
        assert!(!open(&shares, 1, 0, 1));
    }

    #[test]
    fn test_equality_uses_all_128_bits() {
        // equal in the low 64 bits, different above
        let low = 0x0123_4567_89ab_cdef_u128;
        let sets = vec![
            vec![low, 7],
            vec![low | (1 << 100), 1 << 127],
            vec![low, 7 | (1 << 64)],
        ];
        let shares = run_oracle(sets, 2);

        assert!(!open(&shares, 1, 0, 0));
        assert!(!open(&shares, 1, 0, 1));
        assert!(open(&shares, 2, 0, 0));
        assert!(!open(&shares, 2, 0, 1));
        assert!(!open(&shares, 2, 1, 0));
        assert!(!open(&shares, 2, 1, 1));
    }

    #[test]
    fn test_gate_count_matches_shape() {
        let oracle = EqualityCircuitOracle;
        assert_eq!(oracle.and_gates(3, 0), 0);
        assert_eq!(oracle.and_gates(1, 5), 0);
        // 3 pairs, 4 comparisons each: 128 gates per comparison and 1 per OR
        assert_eq!(oracle.and_gates(3, 2), 3 * 4 * 128 + 3 * 2);
        assert!(CircuitShape::new(3, 2).and_gates() > oracle.and_gates(3, 2));
    }
}
