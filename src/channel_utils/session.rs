//! Session-tagged messages on a link between two parties.
//!
//! Every message is framed as `len: u64 | phase: u32 | slot: u32 | payload`, little endian.
//! The receiver states which session and how many bytes it expects; anything else means the
//! two parties are no longer in step and the run is aborted. An I/O failure marks the link as
//! failed so no later message can be written after half a frame.

use crate::error::MpsuError;
use crate::PartyIndex;
use anyhow::{Context, Result};
use scuttlebutt::AbstractChannel;
use std::fmt;

const HEADER_LEN: usize = 16;

/// Protocol stage a message belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Parameter agreement and run id.
    Handshake,
    /// Offline generation of shuffle correlations.
    ShareCorrelation,
    /// Offline generation of Beaver triples.
    Triples,
    /// Artifact cross-check at the start of the online phase.
    ArtifactCheck,
    /// Openings of the Boolean circuit.
    Circuit,
    /// Permute-and-reshare rounds.
    Shuffle,
    /// Final declassification towards the output party.
    Reveal,
}

impl Phase {
    fn code(self) -> u32 {
        match self {
            Phase::Handshake => 1,
            Phase::ShareCorrelation => 2,
            Phase::Triples => 3,
            Phase::ArtifactCheck => 4,
            Phase::Circuit => 5,
            Phase::Shuffle => 6,
            Phase::Reveal => 7,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Handshake => write!(f, "handshake"),
            Phase::ShareCorrelation => write!(f, "share-correlation"),
            Phase::Triples => write!(f, "triples"),
            Phase::ArtifactCheck => write!(f, "artifact-check"),
            Phase::Circuit => write!(f, "circuit"),
            Phase::Shuffle => write!(f, "shuffle"),
            Phase::Reveal => write!(f, "reveal"),
        }
    }
}

/// A logical session multiplexed on a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    /// Stage of the protocol.
    pub phase: Phase,
    /// Round or instance within the stage.
    pub slot: u32,
}

impl SessionId {
    /// Session `slot` of `phase`.
    pub fn new(phase: Phase, slot: u32) -> Self {
        Self { phase, slot }
    }

    fn header(&self, len: usize) -> [u8; HEADER_LEN] {
        let mut h = [0u8; HEADER_LEN];
        h[..8].copy_from_slice(&(len as u64).to_le_bytes());
        h[8..12].copy_from_slice(&self.phase.code().to_le_bytes());
        h[12..].copy_from_slice(&self.slot.to_le_bytes());
        h
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.phase, self.slot)
    }
}

/// The local end of the link to one peer.
pub struct PeerLink<C> {
    me: PartyIndex,
    peer: PartyIndex,
    channel: C,
    failed: bool,
}

impl<C: AbstractChannel> PeerLink<C> {
    /// Wraps the channel from `me` to `peer`.
    pub fn new(me: PartyIndex, peer: PartyIndex, channel: C) -> Self {
        Self {
            me,
            peer,
            channel,
            failed: false,
        }
    }

    /// Index of the remote party.
    pub fn peer(&self) -> PartyIndex {
        self.peer
    }

    /// True once the link broke or fell out of step.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    fn unavailable(&mut self, reason: impl fmt::Display) -> MpsuError {
        self.failed = true;
        MpsuError::PeerUnavailable {
            peer: self.peer,
            reason: reason.to_string(),
        }
    }

    fn abort(&mut self, reason: String) -> MpsuError {
        self.failed = true;
        MpsuError::ProtocolAbort(format!("link {}<->{}: {}", self.me, self.peer, reason))
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.failed {
            return Err(MpsuError::PeerUnavailable {
                peer: self.peer,
                reason: "link already failed".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Sends one framed message.
    pub fn send(&mut self, session: SessionId, payload: &[u8]) -> Result<()> {
        self.ensure_alive()?;

        let header = session.header(payload.len());
        let res = self
            .channel
            .write_bytes(&header)
            .and_then(|_| self.channel.write_bytes(payload))
            .and_then(|_| self.channel.flush());
        if let Err(e) = res {
            return Err(self.unavailable(e))
                .with_context(|| format!("sending {} @{}:{}", session, file!(), line!()));
        }

        Ok(())
    }

    /// Receives one framed message of exactly `len` bytes in `session`.
    pub fn receive(&mut self, session: SessionId, len: usize) -> Result<Vec<u8>> {
        self.ensure_alive()?;

        let mut header = [0u8; HEADER_LEN];
        if let Err(e) = self.channel.read_bytes(&mut header) {
            return Err(self.unavailable(e))
                .with_context(|| format!("receiving {} @{}:{}", session, file!(), line!()));
        }

        let expected = session.header(len);
        if header[8..] != expected[8..] {
            let reason = format!("expected a message of {}, got header {:?}", session, header);
            return Err(self.abort(reason).into());
        }
        if header[..8] != expected[..8] {
            let mut got = [0u8; 8];
            got.copy_from_slice(&header[..8]);
            let reason = format!(
                "{} carries {} bytes, expected {}",
                session,
                u64::from_le_bytes(got),
                len
            );
            return Err(self.abort(reason).into());
        }

        let mut payload = vec![0u8; len];
        if let Err(e) = self.channel.read_bytes(&mut payload) {
            return Err(self.unavailable(e))
                .with_context(|| format!("receiving {} @{}:{}", session, file!(), line!()));
        }

        Ok(payload)
    }

    /// Symmetric exchange of equally sized messages. The lower index sends first.
    pub fn exchange(&mut self, session: SessionId, payload: &[u8]) -> Result<Vec<u8>> {
        if self.me < self.peer {
            self.send(session, payload)?;
            self.receive(session, payload.len())
        } else {
            let res = self.receive(session, payload.len())?;
            self.send(session, payload)?;
            Ok(res)
        }
    }

    /// Hands the raw channel to a sub-protocol that does its own framing (oblivious transfer).
    ///
    /// Any failure inside leaves the stream in an unknown state, so the link is marked failed.
    pub fn with_raw<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut C) -> Result<T>,
    {
        self.ensure_alive()?;
        match f(&mut self.channel) {
            Ok(t) => Ok(t),
            Err(e) => {
                let reason = format!("{:#}", e);
                Err(e).context(self.unavailable(reason))
            }
        }
    }
}
