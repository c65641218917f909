//! CLI (CommandLine Interface) utilities for the `mpsu` and `mpsu_local` binaries.
//!
//! Here, you can know the options of a run through enum types and structs. See [mpsu](crate::mpsu)
//! for what the options mean to the protocol.

use crate::channel_utils::sync_channel::{create_unix_channels, UnixChannel};
use crate::channel_utils::sync_channel_by_cb::{create_crossbeam_channels, CrossbeamChannel};
use crate::channel_utils::tcp_channel::{create_tcp_channels, TcpChannel};
use crate::mpsu::{PartyConfig, RunPhase, DEFAULT_ARTIFACT_DIR};
use crate::{PartyIndex, ProtocolParams};
use anyhow::Result;
use clap::{Args, Parser, ValueEnum};
use scuttlebutt::AbstractChannel;
use std::fmt::Display;
use std::io::{stderr, IsTerminal};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, metadata::LevelFilter, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging options shared by both binaries.
#[derive(Debug, Args)]
pub struct Verbosity {
    /// Silence all output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose mode (-v, or -vv for even more verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

impl Verbosity {
    /// Installs a stderr subscriber. `RUST_LOG` takes precedence over the flags.
    pub fn setup_logging(&self) {
        let filter_layer = self.log_filter();
        let level = filter_layer.to_string();

        let fmt_layer = fmt::layer()
            .with_ansi(stderr().is_terminal())
            .with_writer(stderr);

        let res = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
        if let Err(e) = res {
            if !self.quiet {
                eprintln!("unable to configure logging: {:?}", e);
            }
        }

        info!("Logging setup at level {}", level);
    }

    fn log_filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(
                if self.quiet {
                    LevelFilter::OFF
                } else {
                    LevelFilter::from_level(match self.verbose {
                        0 => Level::INFO,
                        1 => Level::DEBUG,
                        _ => Level::TRACE,
                    })
                }
                .into(),
            )
            .from_env_lossy()
    }
}

/// Channel types. Channels are used to communicate between parties. More details: [channel_utils](crate::channel_utils).
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ChannelType {
    /// Unix domain socket. See [UnixChannel].
    Unix,
    /// TCP socket. See [TcpChannel].
    Tcp,
    /// Native channel of Rust. See [CrossbeamChannel].
    CrossBeam,
}

impl Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Unix => write!(f, "unix"),
            ChannelType::Tcp => write!(f, "tcp"),
            ChannelType::CrossBeam => write!(f, "crossbeam"),
        }
    }
}

/// Arguments of one party of a distributed run.
/// This struct implements [clap::Parser] to make that this binary has CommandLine Arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, next_line_help = true)]
pub struct MpsuArgs {
    /// Index of this party. Party 0 receives the union.
    #[arg(short = 'r', long = "rank")]
    pub rank: PartyIndex,

    /// Number of participants in the protocol.
    #[arg(short = 'N', long, default_value_t = 3)]
    pub num_parties: usize,

    /// Number of elements of the set that each participant has.
    #[arg(short = 'n', long, default_value_t = 4)]
    pub set_size: usize,

    /// Peers served concurrently.
    #[arg(short = 't', long, default_value_t = 1)]
    pub threads: usize,

    /// Base port. Party `i` listens on `port + i`.
    #[arg(short = 'p', long = "port", default_value_t = 10000)]
    pub port: u16,

    /// Address all parties listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Input CSV. Defaults to `./data_id/data_<rank>.csv`.
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// Output CSV written by party 0.
    #[arg(short = 'o', long, default_value = "out.csv")]
    pub output: PathBuf,

    /// Directory holding the offline artifacts.
    #[arg(long, default_value = DEFAULT_ARTIFACT_DIR)]
    pub artifact_dir: PathBuf,

    /// Phases to run.
    #[arg(long, default_value_t = RunPhase::All)]
    pub phase: RunPhase,

    /// Send base OTs in the clear. Tests only.
    #[cfg(feature = "insecure-test-modes")]
    #[arg(long, default_value_t = false)]
    pub insecure_fake_base: bool,

    /// Derive triples from a public seed. Tests only.
    #[cfg(feature = "insecure-test-modes")]
    #[arg(long, default_value_t = false)]
    pub insecure_fake_triples: bool,

    #[command(flatten)]
    pub verbosity: Verbosity,
}

impl MpsuArgs {
    /// Party configuration described by the arguments.
    pub fn party_config(&self) -> Result<PartyConfig> {
        let params = ProtocolParams::new(self.rank, self.num_parties, self.set_size, self.threads)?;
        let config = PartyConfig::new(params)
            .with_artifact_dir(self.artifact_dir.clone())
            .with_phase(self.phase);

        #[cfg(feature = "insecure-test-modes")]
        let config = config.with_insecure_modes(self.insecure_fake_base, self.insecure_fake_triples);

        Ok(config)
    }
}

/// Arguments of a local run with every party in one process.
/// This struct implements [clap::Parser] to make that this binary has CommandLine Arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, next_line_help = true)]
pub struct LocalArgs {
    /// Number of participants in the protocol.
    #[arg(short = 'N', long, default_value_t = 3)]
    pub num_parties: usize,

    /// Number of elements of the set that each participant has.
    #[arg(short = 'n', long, default_value_t = 4)]
    pub set_size: usize,

    /// Elements shared by all sets.
    #[arg(short = 'm', long, default_value_t = 2)]
    pub common_size: usize,

    /// Channel Types.
    #[arg(short = 'c', long = "channel", default_value_t = ChannelType::Unix)]
    pub channel_type: ChannelType,

    /// Port number for TCP channel.
    ///
    /// The port is used internally. No function to communicate externally is implemented.
    #[arg(short = 'p', long = "port", default_value_t = 10000)]
    pub port: u16,

    /// Peers served concurrently by each party.
    #[arg(short = 't', long, default_value_t = 2)]
    pub threads: usize,

    /// Directory holding the offline artifacts.
    #[arg(long, default_value = DEFAULT_ARTIFACT_DIR)]
    pub artifact_dir: PathBuf,

    /// Send base OTs in the clear. Tests only.
    #[cfg(feature = "insecure-test-modes")]
    #[arg(long, default_value_t = false)]
    pub insecure_fake_base: bool,

    /// Derive triples from a public seed. Tests only.
    #[cfg(feature = "insecure-test-modes")]
    #[arg(long, default_value_t = false)]
    pub insecure_fake_triples: bool,

    #[command(flatten)]
    pub verbosity: Verbosity,
}

impl LocalArgs {
    /// Configuration of party `me`.
    pub fn party_config(&self, me: PartyIndex) -> Result<PartyConfig> {
        let params = ProtocolParams::new(me, self.num_parties, self.set_size, self.threads)?;
        let config = PartyConfig::new(params).with_artifact_dir(self.artifact_dir.clone());

        #[cfg(feature = "insecure-test-modes")]
        let config = config.with_insecure_modes(self.insecure_fake_base, self.insecure_fake_triples);

        Ok(config)
    }
}

/// One of the channel types picked at runtime by `mpsu_local`, so a single [crate::mpsu::run_party]
/// instantiation serves all of them.
pub enum ChannelUnion {
    /// Unix domain socket. See [UnixChannel].
    Unix(UnixChannel),
    /// TCP socket. See [TcpChannel].
    Tcp(TcpChannel),
    /// Native channel of Rust. See [CrossbeamChannel].
    CrossBeam(CrossbeamChannel),
}

use ChannelUnion::*;

impl AbstractChannel for ChannelUnion {
    #[inline(always)]
    fn write_bytes(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Unix(c) => c.write_bytes(bytes),
            Tcp(c) => c.write_bytes(bytes),
            CrossBeam(c) => c.write_bytes(bytes),
        }
    }

    #[inline(always)]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> std::io::Result<()> {
        match self {
            Unix(c) => c.read_bytes(bytes),
            Tcp(c) => c.read_bytes(bytes),
            CrossBeam(c) => c.read_bytes(bytes),
        }
    }

    #[inline(always)]
    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Unix(c) => c.flush(),
            Tcp(c) => c.flush(),
            CrossBeam(c) => c.flush(),
        }
    }

    #[inline(always)]
    fn clone(&self) -> Self {
        match self {
            Unix(c) => Unix(c.clone()),
            Tcp(c) => Tcp(c.clone()),
            CrossBeam(c) => CrossBeam(c.clone()),
        }
    }
}

macro_rules! make_union_channel {
    ($c:expr, $t:path) => {{
        Ok($c
            .into_iter()
            .map(|cs| cs.into_iter().map(|(i, c)| (i, $t(c))).collect())
            .collect())
    }};
}

type Ucu = (PartyIndex, ChannelUnion);

/// Create a full mesh of channels for parties living in one process. Runtime utility.
///
/// Entry `i` of the result holds party `i`'s channels.
pub fn create_channels(type_: ChannelType, nparties: usize, port: u16) -> Result<Vec<Vec<Ucu>>> {
    match type_ {
        ChannelType::Unix => make_union_channel!(create_unix_channels(nparties)?, Unix),
        ChannelType::Tcp => make_union_channel!(create_tcp_channels(nparties, port)?, Tcp),
        ChannelType::CrossBeam => {
            make_union_channel!(create_crossbeam_channels(nparties), CrossBeam)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_party_args() {
        let args = MpsuArgs::try_parse_from([
            "mpsu", "-r", "2", "-N", "4", "-n", "16", "--phase", "online", "-vv",
        ])
        .unwrap();
        assert_eq!(args.rank, 2);
        assert_eq!(args.phase, RunPhase::Online);
        assert_eq!(args.output, PathBuf::from("out.csv"));

        let config = args.party_config().unwrap();
        assert_eq!(config.params.nparties, 4);
        assert_eq!(config.params.set_size, 16);
        assert_eq!(config.artifact_dir, PathBuf::from(DEFAULT_ARTIFACT_DIR));
        assert!(!config.base_ot.is_insecure());
    }

    #[test]
    fn test_rank_out_of_range() {
        let args = MpsuArgs::try_parse_from(["mpsu", "-r", "3", "-N", "3"]).unwrap();
        assert!(args.party_config().is_err());
    }

    #[test]
    fn test_union_channels() {
        let mut channels = create_channels(ChannelType::CrossBeam, 2, 0).unwrap();
        let (_, mut right) = channels[1].pop().unwrap();
        let (_, mut left) = channels[0].pop().unwrap();

        left.write_bytes(b"abc").unwrap();
        left.flush().unwrap();
        let mut buf = [0u8; 3];
        right.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }
}
