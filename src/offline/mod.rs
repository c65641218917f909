//! Input-independent preprocessing.
//!
//! The offline phase produces two artifacts per party: a [TripleBatch] sized for the
//! circuit and a [ShareCorrelation] for the shuffle. Both are bound to the run id agreed in
//! the handshake and can be persisted with a [CorrelationStore] until the online phase.

pub mod share_correlation;
pub mod store;
pub mod triples;

pub use share_correlation::{ShareCorrelation, ShareCorrelationGenerator, ShuffleRound};
pub use store::{Artifact, CorrelationStore};
pub use triples::{Triple, TripleBatch, TripleGenerator, TripleSource};
