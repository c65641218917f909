//! One party of the MPSU protocol, from handshake to output.
//!
//! ```text
//! handshake ─► offline: share correlation, triples ─► artifacts on disk
//!          └─► online: load + cross-check artifacts ─► membership ─► duplicate circuit
//!                      ─► conceal ─► shuffle ─► reveal to party 0
//! ```
//!
//! The two phases can run in separate invocations (`--phase offline`, then `--phase online`);
//! the artifacts carry the run id of the offline handshake and are deleted when consumed.

pub mod bin;

use crate::channel_utils::{Mesh, Phase, SessionId};
use crate::circuit::{
    BeaverEvaluator, CircuitShape, EqualityCircuitOracle, MembershipOracle, SecureDuplicateCircuit,
};
use crate::entropy::seeded_rng;
use crate::error::MpsuError;
use crate::hash_utils::{params_digest, run_id};
use crate::offline::{
    CorrelationStore, ShareCorrelation, ShareCorrelationGenerator, TripleBatch, TripleGenerator,
    TripleSource,
};
use crate::ot::BaseOtMode;
use crate::set_utils::PaddedSet;
use crate::shuffle::ObliviousShuffleEngine;
use crate::{Element, PartyIndex, ProtocolParams, RunId};
use anyhow::{Context, Result};
use clap::ValueEnum;
use rand::seq::SliceRandom;
use rand::Rng;
use scuttlebutt::{AbstractChannel, AesRng};
use std::fmt::Display;
use std::path::PathBuf;
use tracing::{debug, info};

/// Default directory for offline artifacts.
pub const DEFAULT_ARTIFACT_DIR: &str = "./artifacts";

const NONCE_LEN: usize = 16;

/// Which phases a party runs.
#[derive(Clone, Copy, ValueEnum, Debug, Default, PartialEq, Eq)]
pub enum RunPhase {
    /// Generate and persist the correlations only.
    Offline,
    /// Consume persisted correlations and compute the union.
    Online,
    /// Both, one after the other.
    #[default]
    All,
}

impl Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Offline => write!(f, "offline"),
            RunPhase::Online => write!(f, "online"),
            RunPhase::All => write!(f, "all"),
        }
    }
}

/// Everything a party needs to know besides its channels and its set.
#[derive(Clone, Debug)]
pub struct PartyConfig {
    /// Public parameters and the local index.
    pub params: ProtocolParams,
    /// Where artifacts are written and read.
    pub artifact_dir: PathBuf,
    /// Phases to run.
    pub phase: RunPhase,
    /// Base OT used by the offline generators.
    pub base_ot: BaseOtMode,
    /// Origin of the Beaver triples.
    pub triple_source: TripleSource,
}

impl PartyConfig {
    /// Secure defaults for `params`.
    pub fn new(params: ProtocolParams) -> Self {
        Self {
            params,
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            phase: RunPhase::default(),
            base_ot: BaseOtMode::default(),
            triple_source: TripleSource::default(),
        }
    }

    /// Sets the artifact directory.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Sets the phases to run.
    pub fn with_phase(mut self, phase: RunPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Replaces base OT and triple generation by their insecure stand-ins.
    #[cfg(any(test, feature = "insecure-test-modes"))]
    pub fn with_insecure_modes(mut self, fake_base: bool, fake_triples: bool) -> Self {
        if fake_base {
            tracing::warn!("party {}: base OTs are sent in the clear", self.params.me);
            self.base_ot = BaseOtMode::InsecurePlain;
        }
        if fake_triples {
            tracing::warn!("party {}: triples come from a public seed", self.params.me);
            self.triple_source = TripleSource::InsecureFake;
        }
        self
    }
}

/// Drives one party through the protocol.
pub struct PartyOrchestrator<C> {
    config: PartyConfig,
    mesh: Mesh<C>,
    rng: AesRng,
    store: CorrelationStore,
}

impl<C: AbstractChannel + Send> PartyOrchestrator<C> {
    /// Connects the party to its peers. `channels` holds one `(peer, channel)` per other party.
    pub fn new(config: PartyConfig, channels: Vec<(PartyIndex, C)>) -> Result<Self> {
        let ProtocolParams {
            me,
            nparties,
            threads,
            ..
        } = config.params;
        let mesh = Mesh::new(me, nparties, threads, channels)?;
        let rng = seeded_rng()?;
        let store = CorrelationStore::new(config.artifact_dir.clone());

        Ok(Self {
            config,
            mesh,
            rng,
            store,
        })
    }

    fn params(&self) -> ProtocolParams {
        self.config.params
    }

    /// Agrees on the public parameters and derives a fresh run id from everybody's nonce.
    pub fn handshake(&mut self) -> Result<RunId> {
        let params = self.params();
        let digest = params_digest(&params);
        let nonce = self.rng.gen::<[u8; NONCE_LEN]>();

        let mut payload = digest.to_vec();
        payload.extend_from_slice(&nonce);
        let received = self
            .mesh
            .exchange(SessionId::new(Phase::Handshake, 0), &payload)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;

        let mut nonces = vec![[0u8; NONCE_LEN]; params.nparties];
        nonces[params.me] = nonce;
        for (peer, theirs) in received {
            let (their_digest, their_nonce) = theirs.split_at(digest.len());
            if their_digest != digest {
                return Err(MpsuError::ProtocolAbort(format!(
                    "party {} runs with different parameters than {} parties of {} elements",
                    peer, params.nparties, params.set_size
                ))
                .into());
            }
            nonces[peer].copy_from_slice(their_nonce);
        }

        let run = run_id(&nonces);
        info!("party {} joined run {}", params.me, run);
        Ok(run)
    }

    /// Generates this party's correlation and triples for `run` and writes them to the store.
    pub fn offline(&mut self, run: RunId) -> Result<()> {
        let params = self.params();
        let required = CircuitShape::new(params.nparties, params.set_size).and_gates();
        info!(
            "party {} offline: {} shuffle entries, {} triples",
            params.me,
            params.shuffle_batch(),
            required
        );

        let correlation = ShareCorrelationGenerator::new(params, self.config.base_ot)
            .generate(&mut self.mesh, &mut self.rng, run)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        let path = self.store.write(params.me, &correlation)?;
        correlation.release();
        debug!("party {} stored its share correlation at {}", params.me, path.display());

        let triples = TripleGenerator::new(params, self.config.base_ot, self.config.triple_source)
            .generate_triples(&mut self.mesh, &mut self.rng, run, required)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        triples.ensure_covers(required)?;
        let path = self.store.write(params.me, &triples)?;
        triples.release();
        debug!("party {} stored its triples at {}", params.me, path.display());

        Ok(())
    }

    fn verify_triples(&mut self, triples: &TripleBatch) -> Result<()> {
        let checksum = triples.checksum();
        let received = self
            .mesh
            .exchange(SessionId::new(Phase::ArtifactCheck, 1), &checksum)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        for (peer, theirs) in received {
            if theirs[..] != checksum[..] {
                return Err(MpsuError::TripleConsistency(format!(
                    "party {} holds triples of another run (ours are from {})",
                    peer,
                    triples.run_id()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Consumes the stored artifacts and computes the union. Only party 0 gets `Some`.
    pub fn online(&mut self, set: &PaddedSet) -> Result<Option<Vec<Element>>> {
        let params = self.params();
        let shape = CircuitShape::new(params.nparties, params.set_size);

        let correlation: ShareCorrelation = self.store.consume(params.me)?;
        let triples: TripleBatch = self.store.consume(params.me)?;

        let mut engine = ObliviousShuffleEngine::new(params, correlation)?;
        engine.verify_peers(&mut self.mesh)?;
        self.verify_triples(&triples)?;
        triples.ensure_covers(shape.and_gates())?;
        info!("party {} online with artifacts of run {}", params.me, triples.run_id());

        let mut evaluator = BeaverEvaluator::new(params, &mut self.mesh, triples);
        let mut oracle = EqualityCircuitOracle;
        let membership = oracle
            .membership(&mut evaluator, set, &mut self.rng)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        let suppress = SecureDuplicateCircuit::new(params)
            .evaluate(&mut evaluator, set, &membership)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        let entries = engine
            .conceal(&mut evaluator, set, &suppress)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        let gates = evaluator.release();
        debug!("party {} evaluated {} AND gates", params.me, gates);

        let shuffled = engine.shuffle(&mut self.mesh, entries)?;
        let revealed = engine.reveal(&mut self.mesh, shuffled)?;
        engine.release();

        Ok(revealed.map(|revealed| {
            let mut union = set.elements();
            union.extend(revealed);
            union.shuffle(&mut self.rng);
            info!("party {} learned a union of {} elements", params.me, union.len());
            union
        }))
    }

    /// Runs the configured phases on `set`.
    pub fn run(mut self, set: &[Element]) -> Result<Option<Vec<Element>>> {
        let params = self.params();
        let run = self.handshake()?;

        match self.config.phase {
            RunPhase::Offline => {
                self.offline(run)?;
                Ok(None)
            }
            RunPhase::Online => self.online(&PaddedSet::new(set, params.set_size)),
            RunPhase::All => {
                self.offline(run)?;
                self.online(&PaddedSet::new(set, params.set_size))
            }
        }
    }
}

/// Runs one party to completion. Blocks until every peer is done with it.
pub fn run_party<C: AbstractChannel + Send>(
    config: PartyConfig,
    channels: Vec<(PartyIndex, C)>,
    set: &[Element],
) -> Result<Option<Vec<Element>>> {
    PartyOrchestrator::new(config, channels)?.run(set)
}
