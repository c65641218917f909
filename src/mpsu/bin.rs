//! Body of the `mpsu` binary: one party of a distributed run over TCP.

use crate::channel_utils::tcp_channel::create_tcp_channels_for_party;
use crate::cli_utils::MpsuArgs;
use crate::mpsu::{run_party, RunPhase};
use crate::set_utils::{default_input_path, read_set_csv, write_union_csv, InputSet};
use anyhow::{Context, Result};
use std::time::Instant;
use tracing::info;

/// Reads the input, connects to the peers, runs the configured phases and writes the union.
pub fn run(args: &MpsuArgs) -> Result<()> {
    let config = args.party_config()?;
    let params = config.params;

    let set = if config.phase == RunPhase::Offline {
        InputSet::default()
    } else {
        let input = args
            .input
            .clone()
            .unwrap_or_else(|| default_input_path(params.me));
        read_set_csv(&input, params.set_size)?
    };
    info!(
        "party {} of {}: {} elements, phase {}",
        params.me,
        params.nparties,
        set.elements.len(),
        config.phase
    );

    let channels = create_tcp_channels_for_party(params.nparties, args.host, args.port, params.me)
        .with_context(|| format!("connecting party {} @{}:{}", params.me, file!(), line!()))?;

    let start = Instant::now();
    let union = run_party(config, channels, &set.elements)?;
    info!("party {} finished in {:?}", params.me, start.elapsed());

    if let Some(union) = union {
        write_union_csv(&args.output, &union)?;
        info!("wrote {} elements to {}", union.len(), args.output.display());
    }

    Ok(())
}
