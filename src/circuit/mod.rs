//! The Boolean circuit evaluated in the online phase.
//!
//! [membership] shares which slots of a party already occur in a lower-indexed party's set,
//! [duplicate] folds those bits into one suppress bit per slot, and the shuffle engine then
//! zeroes suppressed elements with one wide AND per entry. All gates run on a
//! [BeaverEvaluator].

pub mod duplicate;
pub mod gmw;
pub mod membership;

pub use duplicate::SecureDuplicateCircuit;
pub use gmw::BeaverEvaluator;
pub use membership::{EqualityCircuitOracle, MembershipOracle, MembershipShares};

/// Public size of the circuit for `k` parties with `n` slots each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CircuitShape {
    nparties: usize,
    set_size: usize,
}

impl CircuitShape {
    /// Shape for `nparties` sets of `set_size` slots.
    pub fn new(nparties: usize, set_size: usize) -> Self {
        Self { nparties, set_size }
    }

    /// Wide AND gates that conceal suppressed elements, one per shuffled entry.
    pub fn conceal_gates(&self) -> usize {
        self.nparties.saturating_sub(1) * self.set_size
    }

    /// Triples consumed when membership is computed by `oracle`.
    pub fn and_gates_with<O: MembershipOracle>(&self, oracle: &O) -> usize {
        oracle.and_gates(self.nparties, self.set_size)
            + SecureDuplicateCircuit::and_gates(self.nparties, self.set_size)
            + self.conceal_gates()
    }

    /// Triples consumed with the [EqualityCircuitOracle].
    pub fn and_gates(&self) -> usize {
        self.and_gates_with(&EqualityCircuitOracle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_gates() {
        assert_eq!(CircuitShape::new(1, 10).and_gates(), 0);
        assert_eq!(CircuitShape::new(4, 0).and_gates(), 0);

        // k = 2, n = 2: 4 comparisons, 2 ORs, 2 duplicate gates, 2 conceal gates
        assert_eq!(CircuitShape::new(2, 2).and_gates(), 4 * 128 + 2 + 2 + 2);

        let (k, n) = (3, 4);
        let pairs = k * (k - 1) / 2;
        assert_eq!(
            CircuitShape::new(k, n).and_gates(),
            128 * n * n * pairs + (n - 1) * n * pairs + n * pairs + n * (k - 1)
        );
    }
}
