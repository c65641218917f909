//! # Multi-party Private Set Union
//!
//! `k` parties, each holding a set of `n` elements, jointly compute the union of their sets.
//! Only the designated output party (index [OUTPUT_PARTY]) learns the union, and it learns
//! nothing about which party contributed which element.
//!
//! The protocol is split into an offline phase that produces correlated randomness
//! ([offline]) and an online phase that evaluates a Boolean circuit over secret shares
//! ([circuit]) and then shuffles and declassifies the surviving elements ([shuffle]).
//! [mpsu] drives a single party through both phases.
#![warn(missing_docs)]

mod arena;
pub mod channel_utils;
pub mod circuit;
pub mod cli_utils;
pub mod entropy;
pub mod error;
mod hash_utils;
pub mod mpsu;
pub mod offline;
pub mod ot;
pub mod set_utils;
pub mod shuffle;

#[cfg(test)]
pub(crate) mod test_utils;

pub use arena::{ConsumptionArena, CursorError};
pub use error::MpsuError;
pub use hash_utils::RunId;

/// Set element. Inputs narrower than 128 bits are zero-extended.
pub type Element = u128;

/// usize is used as a party ID.
pub type PartyIndex = usize;

/// The only party that learns the union.
pub const OUTPUT_PARTY: PartyIndex = 0;

/// Public parameters of a run, passed explicitly to every sub-protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Index of the local party.
    pub me: PartyIndex,
    /// Number of parties `k`.
    pub nparties: usize,
    /// Elements per party `n`.
    pub set_size: usize,
    /// Upper bound on concurrently served peers.
    pub threads: usize,
}

impl ProtocolParams {
    /// Validates and bundles the parameters.
    pub fn new(
        me: PartyIndex,
        nparties: usize,
        set_size: usize,
        threads: usize,
    ) -> anyhow::Result<Self> {
        if nparties == 0 {
            anyhow::bail!("at least one party is required @{}:{}", file!(), line!());
        }
        if me >= nparties {
            anyhow::bail!(
                "party index {} out of range for {} parties @{}:{}",
                me,
                nparties,
                file!(),
                line!()
            );
        }

        Ok(Self {
            me,
            nparties,
            set_size,
            threads: threads.max(1),
        })
    }

    /// True for the party that receives the union.
    pub fn is_output_party(&self) -> bool {
        self.me == OUTPUT_PARTY
    }

    /// Entries that go through the shuffle: every slot of every party except the output party.
    pub fn shuffle_batch(&self) -> usize {
        (self.nparties - 1) * self.set_size
    }
}
