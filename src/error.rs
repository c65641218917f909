//! Error taxonomy of the protocol.
//!
//! Protocol code returns [anyhow::Result] and attaches `@file:line` breadcrumbs with
//! `with_context`, the same way every other module of this crate does. The variants of
//! [MpsuError] are the failures a caller may want to react to; [classify] recovers them
//! from an [anyhow::Error] chain.

use crate::PartyIndex;
use thiserror::Error;

/// Failures of a protocol run that are distinguishable by the caller.
#[derive(Debug, Error)]
pub enum MpsuError {
    /// The operating system randomness source could not be sampled.
    #[error("the randomness source failed: {0}")]
    InsufficientEntropy(String),

    /// The triple generator produced fewer triples than the circuit consumes.
    #[error("triple shortfall: the circuit needs {required} triples but {produced} were produced")]
    TripleShortfall {
        /// AND gates of the circuit.
        required: usize,
        /// Triples available.
        produced: usize,
    },

    /// Opened values or triple batches disagree between parties, or a triple was read twice.
    #[error("triple consistency check failed: {0}")]
    TripleConsistency(String),

    /// The shuffle correlation does not belong to this run or was consumed twice.
    #[error("shuffle correlation mismatch: {0}")]
    ShuffleCorrelationMismatch(String),

    /// A peer disconnected or its link failed.
    #[error("party {peer} is unavailable: {reason}")]
    PeerUnavailable {
        /// Index of the unreachable party.
        peer: PartyIndex,
        /// Underlying transport failure.
        reason: String,
    },

    /// A peer sent something the protocol did not expect at this point.
    #[error("protocol aborted: {0}")]
    ProtocolAbort(String),
}

impl MpsuError {
    /// True for failures of the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MpsuError::PeerUnavailable { .. } | MpsuError::ProtocolAbort(_)
        )
    }

    /// True for failures of the cryptographic consistency checks.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            MpsuError::TripleShortfall { .. }
                | MpsuError::TripleConsistency(_)
                | MpsuError::ShuffleCorrelationMismatch(_)
        )
    }

    /// Process exit status used by the binaries.
    pub fn exit_code(&self) -> i32 {
        match self {
            MpsuError::InsufficientEntropy(_) => 4,
            e if e.is_consistency() => 3,
            _ => 2,
        }
    }
}

/// Finds the first [MpsuError] in the chain of `err`.
pub fn classify(err: &anyhow::Error) -> Option<&MpsuError> {
    err.downcast_ref::<MpsuError>()
        .or_else(|| err.chain().find_map(|e| e.downcast_ref::<MpsuError>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn failing() -> anyhow::Result<()> {
        Err(MpsuError::TripleShortfall {
            required: 10,
            produced: 3,
        })
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
        Ok(())
    }

    #[test]
    fn test_classify_through_context() {
        let err = failing()
            .context("outer layer")
            .unwrap_err();

        let kind = classify(&err).unwrap();
        assert!(kind.is_consistency());
        assert!(!kind.is_transport());
        assert_eq!(kind.exit_code(), 3);
    }

    #[test]
    fn test_exit_codes() {
        let peer = MpsuError::PeerUnavailable {
            peer: 2,
            reason: "closed".into(),
        };
        assert_eq!(peer.exit_code(), 2);
        assert_eq!(MpsuError::InsufficientEntropy("x".into()).exit_code(), 4);
        assert!(classify(&anyhow::anyhow!("plain")).is_none());
    }
}
