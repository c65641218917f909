use anyhow::{bail, Context, Result};
use clap::Parser;
use mpsu::cli_utils::{create_channels, LocalArgs};
use mpsu::mpsu::run_party;
use mpsu::set_utils::create_sets_with_overlap;
use scuttlebutt::AesRng;
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;

fn main() -> Result<()> {
    let args = LocalArgs::parse();
    args.verbosity.setup_logging();

    let mut rng = AesRng::new();
    let (expected, sets) =
        create_sets_with_overlap(args.num_parties, args.set_size, args.common_size, &mut rng)
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
    info!(
        "{} parties, {} elements each, {} in common: union of {}",
        args.num_parties,
        args.set_size,
        args.common_size,
        expected.len()
    );

    let channels = create_channels(args.channel_type, args.num_parties, args.port)?;

    let start = Instant::now();
    let handles = channels
        .into_iter()
        .zip(sets)
        .enumerate()
        .map(|(me, (channels, set))| {
            let config = args.party_config(me)?;
            Ok(std::thread::spawn(move || run_party(config, channels, &set)))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut union = None;
    for (me, h) in handles.into_iter().enumerate() {
        let res = match h.join() {
            Ok(res) => res.with_context(|| format!("party {} failed @{}:{}", me, file!(), line!()))?,
            Err(_) => bail!("party {} panicked @{}:{}", me, file!(), line!()),
        };
        if res.is_some() {
            union = res;
        }
    }
    info!("{} channel: finished in {:?}", args.channel_type, start.elapsed());

    let union = match union {
        Some(u) => u,
        None => bail!("party 0 returned no union @{}:{}", file!(), line!()),
    };
    let got = union.iter().copied().collect::<HashSet<_>>();
    if got.len() != union.len() || got != expected.into_iter().collect::<HashSet<_>>() {
        bail!("wrong union of {} elements @{}:{}", union.len(), file!(), line!());
    }
    info!("union of {} elements is correct", union.len());

    Ok(())
}
