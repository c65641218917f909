//! Clear-text stand-in for oblivious transfer, used to keep test runs fast.

use crate::channel_utils::{bytes_to_words, words_to_bytes};
use anyhow::{Context, Result};
use scuttlebutt::AbstractChannel;

pub(super) fn send<C: AbstractChannel>(channel: &mut C, messages: &[(u128, u128)]) -> Result<()> {
    let flat = messages
        .iter()
        .flat_map(|&(m0, m1)| [m0, m1])
        .collect::<Vec<_>>();
    channel
        .write_bytes(&words_to_bytes(&flat))
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    channel
        .flush()
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    Ok(())
}

pub(super) fn receive<C: AbstractChannel>(channel: &mut C, choices: &[bool]) -> Result<Vec<u128>> {
    let mut bytes = vec![0u8; choices.len() * 32];
    channel
        .read_bytes(&mut bytes)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    let flat = bytes_to_words(&bytes)?;

    Ok(flat
        .chunks_exact(2)
        .zip(choices)
        .map(|(pair, &c)| if c { pair[1] } else { pair[0] })
        .collect())
}
