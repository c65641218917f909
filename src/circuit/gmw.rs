//! GMW evaluation over XOR shares with Beaver triples.
//!
//! Every party holds one bit per wire; the XOR over all parties is the wire value. NOT is
//! local, AND consumes one [Triple] and one opening round. All gates of one call to
//! [BeaverEvaluator::and] share a round, so depth rather than width costs round trips.

use crate::channel_utils::{
    bytes_to_words, pack_bits, packed_len, unpack_bits, words_to_bytes, Mesh, Phase, SessionId,
};
use crate::error::MpsuError;
use crate::hash_utils::Transcript;
use crate::offline::{Triple, TripleBatch};
use crate::{PartyIndex, ProtocolParams};
use anyhow::{bail, Context, Result};
use scuttlebutt::AbstractChannel;
use tracing::{debug, trace};
use zeroize::Zeroize;

/// Evaluates AND-heavy Boolean circuits for one party.
pub struct BeaverEvaluator<'m, C> {
    params: ProtocolParams,
    mesh: &'m mut Mesh<C>,
    triples: TripleBatch,
    round: u32,
    gates: usize,
    transcript: Transcript,
}

impl<'m, C: AbstractChannel + Send> BeaverEvaluator<'m, C> {
    /// Evaluator drawing its triples from `triples`.
    pub fn new(params: ProtocolParams, mesh: &'m mut Mesh<C>, triples: TripleBatch) -> Self {
        let transcript = Transcript::new(triples.run_id());
        Self {
            params,
            mesh,
            triples,
            round: 0,
            gates: 0,
            transcript,
        }
    }

    /// Index of the local party.
    pub fn me(&self) -> PartyIndex {
        self.params.me
    }

    /// Number of parties.
    pub fn nparties(&self) -> usize {
        self.params.nparties
    }

    /// AND gates evaluated so far.
    pub fn gates(&self) -> usize {
        self.gates
    }

    /// Triples left for later gates.
    pub fn remaining_triples(&self) -> usize {
        self.triples.remaining()
    }

    /// The local share of a value known only to `owner`.
    pub fn input(&self, owner: PartyIndex, value: bool) -> bool {
        self.params.me == owner && value
    }

    /// Local share of a constant.
    pub fn constant(&self, value: bool) -> bool {
        self.input(0, value)
    }

    /// Negation of every share; only party 0 flips.
    pub fn not(&self, xs: &[bool]) -> Vec<bool> {
        let flip = self.params.me == 0;
        xs.iter().map(|&x| x ^ flip).collect()
    }

    fn next_triples(&mut self, count: usize) -> Result<Vec<Triple>> {
        let triples = self
            .triples
            .take(count)
            .with_context(|| format!("round {} @{}:{}", self.round, file!(), line!()))?
            .to_vec();
        self.gates += count;
        Ok(triples)
    }

    // opens `payload` to everybody and returns the XOR of all contributions
    fn open(&mut self, payload: Vec<u8>) -> Result<Vec<u8>> {
        let session = SessionId::new(Phase::Circuit, self.round);
        let received = self
            .mesh
            .exchange(session, &payload)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;

        let mut opened = payload;
        for (_, bytes) in received {
            for (o, b) in opened.iter_mut().zip(bytes) {
                *o ^= b;
            }
        }

        self.transcript.absorb(self.round, &opened);
        self.round += 1;
        Ok(opened)
    }

    /// `xs[i] ∧ ys[i]` for every `i`, in one round.
    pub fn and(&mut self, xs: &[bool], ys: &[bool]) -> Result<Vec<bool>> {
        if xs.len() != ys.len() {
            bail!("AND of {} and {} wires @{}:{}", xs.len(), ys.len(), file!(), line!());
        }
        let n = xs.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut triples = self.next_triples(n)?;
        let mut masked = Vec::with_capacity(2 * n);
        masked.extend(xs.iter().zip(&triples).map(|(&x, t)| x ^ t.a));
        masked.extend(ys.iter().zip(&triples).map(|(&y, t)| y ^ (t.b & 1 == 1)));

        let opened = self.open(pack_bits(&masked))?;
        let opened = unpack_bits(&opened, 2 * n)?;
        let (d, e) = opened.split_at(n);

        let leader = self.params.me == 0;
        let z = triples
            .iter()
            .zip(d.iter().zip(e))
            .map(|(t, (&d, &e))| {
                (t.c & 1 == 1) ^ (d && t.b & 1 == 1) ^ (e && t.a) ^ (leader && d && e)
            })
            .collect();

        triples.zeroize();
        Ok(z)
    }

    /// `bits[i] · words[i]`: a shared bit gating a shared 128-bit word, in one round.
    pub fn and_wide(&mut self, bits: &[bool], words: &[u128]) -> Result<Vec<u128>> {
        if bits.len() != words.len() {
            bail!("AND of {} bits and {} words @{}:{}", bits.len(), words.len(), file!(), line!());
        }
        let n = bits.len();
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut triples = self.next_triples(n)?;
        let d = bits
            .iter()
            .zip(&triples)
            .map(|(&x, t)| x ^ t.a)
            .collect::<Vec<_>>();
        let e = words
            .iter()
            .zip(&triples)
            .map(|(&y, t)| y ^ t.b)
            .collect::<Vec<_>>();

        let mut payload = pack_bits(&d);
        payload.extend(words_to_bytes(&e));
        let opened = self.open(payload)?;
        let (d, e) = opened.split_at(packed_len(n));
        let d = unpack_bits(d, n)?;
        let e = bytes_to_words(e)?;

        let leader = self.params.me == 0;
        let z = triples
            .iter()
            .zip(d.iter().zip(&e))
            .map(|(t, (&d, &e))| {
                let mut z = t.c;
                if d {
                    z ^= t.b;
                }
                if t.a {
                    z ^= e;
                }
                if leader && d {
                    z ^= e;
                }
                z
            })
            .collect();

        triples.zeroize();
        Ok(z)
    }

    /// `xs[i] ∨ ys[i]` as `¬(¬x ∧ ¬y)`.
    pub fn or(&mut self, xs: &[bool], ys: &[bool]) -> Result<Vec<bool>> {
        let nx = self.not(xs);
        let ny = self.not(ys);
        let z = self.and(&nx, &ny)?;
        Ok(self.not(&z))
    }

    /// AND over each group. A group of `g` inputs costs `g − 1` gates; an empty group is true.
    ///
    /// Groups are reduced as balanced trees, all groups side by side, one layer per round.
    pub fn and_reduce(&mut self, groups: Vec<Vec<bool>>) -> Result<Vec<bool>> {
        let mut groups = groups;
        let mut layer = 0;

        while groups.iter().any(|g| g.len() > 1) {
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            for g in &groups {
                for pair in g.chunks_exact(2) {
                    xs.push(pair[0]);
                    ys.push(pair[1]);
                }
            }

            trace!("and_reduce layer {}: {} gates", layer, xs.len());
            let mut z = self.and(&xs, &ys)?.into_iter();

            for g in groups.iter_mut() {
                let carry = if g.len() % 2 == 1 { g.last().copied() } else { None };
                let mut next = Vec::with_capacity(g.len() / 2 + 1);
                for _ in 0..g.len() / 2 {
                    next.extend(z.next());
                }
                next.extend(carry);
                *g = next;
            }
            layer += 1;
        }

        let one = self.constant(true);
        Ok(groups
            .into_iter()
            .map(|g| g.first().copied().unwrap_or(one))
            .collect())
    }

    /// OR over each group via De Morgan. An empty group is false.
    pub fn or_reduce(&mut self, groups: Vec<Vec<bool>>) -> Result<Vec<bool>> {
        let negated: Vec<Vec<bool>> = groups.into_iter().map(|g| self.not(&g)).collect();
        let z = self.and_reduce(negated)?;
        Ok(self.not(&z))
    }

    /// Compares the hash of every opened value with all peers.
    ///
    /// Parties that disagree evaluated different circuits or used different triples. Openings
    /// are identical on all parties once they are in step, so a triple with `c ≠ a·b` passes
    /// this check and only corrupts the output.
    pub fn verify_transcript(&mut self) -> Result<()> {
        let digest = self.transcript.digest();
        let session = SessionId::new(Phase::Circuit, self.round);
        self.round += 1;

        let received = self
            .mesh
            .exchange(session, &digest)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        for (peer, theirs) in received {
            if theirs[..] != digest[..] {
                return Err(MpsuError::TripleConsistency(format!(
                    "party {} opened different values before round {}",
                    peer, self.round
                ))
                .into());
            }
        }

        debug!(
            "party {}: transcript agreed after {} rounds and {} gates",
            self.params.me, self.round, self.gates
        );
        Ok(())
    }

    /// Zeroizes the unused triples. Returns how many gates were evaluated.
    pub fn release(self) -> usize {
        let gates = self.gates;
        self.triples.release();
        gates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::{TripleGenerator, TripleSource};
    use crate::ot::BaseOtMode;
    use crate::test_utils::run_parties;
    use crate::RunId;
    use rand::Rng;
    use scuttlebutt::AesRng;

    fn with_evaluator<T, F>(nparties: usize, triples: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(&mut BeaverEvaluator<'_, crate::channel_utils::sync_channel_by_cb::CrossbeamChannel>) -> T
            + Send
            + Sync
            + Clone
            + 'static,
    {
        run_parties(nparties, 1, move |params, mesh| {
            let mut rng = AesRng::new();
            let batch = TripleGenerator::new(params, BaseOtMode::InsecurePlain, TripleSource::Ot)
                .generate_triples(mesh, &mut rng, RunId([9u8; 32]), triples)
                .unwrap();
            let mut evaluator = BeaverEvaluator::new(params, mesh, batch);
            f(&mut evaluator)
        })
    }

    fn xor_all(shares: &[Vec<bool>]) -> Vec<bool> {
        (0..shares[0].len())
            .map(|i| shares.iter().fold(false, |acc, s| acc ^ s[i]))
            .collect()
    }

    // public values split into random shares from a seed every party agrees on
    fn share(me: PartyIndex, nparties: usize, values: &[bool], seed: u128) -> Vec<bool> {
        let mut rng = crate::entropy::public_rng(seed);
        values
            .iter()
            .map(|&v| {
                let masks = (0..nparties - 1).map(|_| rng.gen::<bool>()).collect::<Vec<_>>();
                if me == nparties - 1 {
                    masks.iter().fold(v, |acc, m| acc ^ m)
                } else {
                    masks[me]
                }
            })
            .collect()
    }

    #[test]
    fn test_and_truth_table() {
        let xs = [false, false, true, true];
        let ys = [false, true, false, true];
        let shares = with_evaluator(3, 4, move |ev| {
            let me = ev.me();
            let a = share(me, 3, &xs, 77);
            let b = share(me, 3, &ys, 78);
            let z = ev.and(&a, &b).unwrap();
            ev.verify_transcript().unwrap();
            assert_eq!(ev.remaining_triples(), 0);
            z
        });
        assert_eq!(xor_all(&shares), vec![false, false, false, true]);
    }

    #[test]
    fn test_or_and_not() {
        let shares = with_evaluator(2, 4, |ev| {
            let xs = vec![ev.input(0, false), ev.input(0, true), ev.input(1, false), ev.input(1, true)];
            let ys = vec![ev.input(1, false), ev.input(1, false), ev.input(0, true), ev.input(0, true)];
            let or = ev.or(&xs, &ys).unwrap();
            let not = ev.not(&or);
            [or, not].concat()
        });
        assert_eq!(
            xor_all(&shares),
            vec![false, true, true, true, true, false, false, false]
        );
    }

    #[test]
    fn test_and_wide() {
        let words = [0u128, u128::MAX, 0xdead_beef, 1 << 127];
        let bits = [true, false, true, true];
        let shares = with_evaluator(3, 4, move |ev| {
            let me = ev.me();
            let b = bits.iter().map(|&x| ev.input(2, x)).collect::<Vec<_>>();
            let w = words
                .iter()
                .map(|&w| if me == 1 { w } else { 0 })
                .collect::<Vec<_>>();
            ev.and_wide(&b, &w).unwrap()
        });

        let opened = (0..4)
            .map(|i| shares.iter().fold(0u128, |acc, s| acc ^ s[i]))
            .collect::<Vec<_>>();
        assert_eq!(opened, vec![0, 0, 0xdead_beef, 1 << 127]);
    }

    #[test]
    fn test_reductions_count_gates() {
        // groups of 0, 1, 2, 5 inputs: 0 + 0 + 1 + 4 gates, twice
        let shares = with_evaluator(2, 10, |ev| {
            let groups = vec![
                vec![],
                vec![ev.constant(true)],
                vec![ev.input(1, true), ev.input(0, false)],
                vec![ev.constant(true); 5],
            ];
            let and = ev.and_reduce(groups.clone()).unwrap();
            let or = ev.or_reduce(groups).unwrap();
            ev.verify_transcript().unwrap();
            assert_eq!(ev.gates(), 10);
            [and, or].concat()
        });
        assert_eq!(
            xor_all(&shares),
            vec![true, true, false, true, false, true, true, true]
        );
    }

    #[test]
    fn test_transcript_does_not_catch_bad_triples() {
        let results = run_parties(2, 1, |params, mesh| {
            // c ≠ a·b on party 0
            let triple = Triple {
                a: false,
                b: 0,
                c: if params.me == 0 { 5 } else { 0 },
            };
            let batch = TripleBatch::new(RunId([9u8; 32]), 2, vec![triple]);
            let mut ev = BeaverEvaluator::new(params, mesh, batch);
            let x = ev.input(0, true);
            let w = if params.me == 1 { 8 } else { 0 };
            let z = ev.and_wide(&[x], &[w]).unwrap();
            ev.verify_transcript().unwrap();
            z[0]
        });
        assert_eq!(results[0] ^ results[1], 8 ^ 5);
    }

    #[test]
    fn test_shortfall_is_reported() {
        let results = with_evaluator(2, 1, |ev| {
            let x = ev.constant(true);
            let err = ev.and(&[x, x], &[x, x]).unwrap_err();
            matches!(
                crate::error::classify(&err),
                Some(MpsuError::TripleShortfall { .. })
            )
        });
        assert_eq!(results, vec![true, true]);
    }
}
