//! Chosen-message oblivious transfer of 128-bit strings.
//!
//! The offline generators only see [BlockOtSender] and [BlockOtReceiver]; behind them sits
//! ALSZ OT extension from [ocelot] (Chou-Orlandi base OTs). A setup runs once per link and
//! direction and can then serve any number of batches.

use anyhow::{bail, Context, Result};
use ocelot::ot::{AlszReceiver, AlszSender, Receiver as OtReceiver, Sender as OtSender};
use scuttlebutt::{AbstractChannel, AesRng, Block};
use std::fmt::Display;

#[cfg(any(test, feature = "insecure-test-modes"))]
mod insecure;

// ALSZ works on columns of 8 OTs
const OT_BATCH_ALIGN: usize = 8;

/// How base oblivious transfers are realised.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BaseOtMode {
    /// ALSZ extension over Chou-Orlandi base OTs.
    #[default]
    Alsz,
    /// Both messages travel in the clear and the receiver picks one. Offers no privacy.
    #[cfg(any(test, feature = "insecure-test-modes"))]
    InsecurePlain,
}

impl BaseOtMode {
    /// True for modes that must never run outside tests.
    pub fn is_insecure(&self) -> bool {
        match self {
            BaseOtMode::Alsz => false,
            #[cfg(any(test, feature = "insecure-test-modes"))]
            BaseOtMode::InsecurePlain => true,
        }
    }
}

impl Display for BaseOtMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaseOtMode::Alsz => write!(f, "alsz"),
            #[cfg(any(test, feature = "insecure-test-modes"))]
            BaseOtMode::InsecurePlain => write!(f, "insecure-plain"),
        }
    }
}

pub(crate) fn word_to_block(w: u128) -> Block {
    Block::from(w.to_le_bytes())
}

pub(crate) fn block_to_word(b: &Block) -> u128 {
    let mut buf = [0u8; 16];
    buf.copy_from_slice(b.as_ref());
    u128::from_le_bytes(buf)
}

fn aligned(n: usize) -> usize {
    (n + OT_BATCH_ALIGN - 1) / OT_BATCH_ALIGN * OT_BATCH_ALIGN
}

/// Sending side of a set-up OT instance.
pub enum BlockOtSender {
    /// ALSZ extension.
    Alsz(Box<AlszSender>),
    /// Clear-text transfer.
    #[cfg(any(test, feature = "insecure-test-modes"))]
    InsecurePlain,
}

impl BlockOtSender {
    /// Runs the base OTs with the receiver on the other end of `channel`.
    pub fn init<C: AbstractChannel>(
        mode: BaseOtMode,
        channel: &mut C,
        rng: &mut AesRng,
    ) -> Result<Self> {
        match mode {
            BaseOtMode::Alsz => {
                let ot = AlszSender::init(channel, rng)
                    .with_context(|| format!("@{}:{}", file!(), line!()))?;
                Ok(BlockOtSender::Alsz(Box::new(ot)))
            }
            #[cfg(any(test, feature = "insecure-test-modes"))]
            BaseOtMode::InsecurePlain => Ok(BlockOtSender::InsecurePlain),
        }
    }

    /// Offers `(m0, m1)` for every transfer; the receiver learns exactly one of each pair.
    pub fn send<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        messages: &[(u128, u128)],
        rng: &mut AesRng,
    ) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        match self {
            BlockOtSender::Alsz(ot) => {
                let mut inputs = messages
                    .iter()
                    .map(|&(m0, m1)| (word_to_block(m0), word_to_block(m1)))
                    .collect::<Vec<_>>();
                inputs.resize(aligned(messages.len()), (word_to_block(0), word_to_block(0)));
                ot.send(channel, &inputs, rng)
                    .with_context(|| format!("@{}:{}", file!(), line!()))?;
            }
            #[cfg(any(test, feature = "insecure-test-modes"))]
            BlockOtSender::InsecurePlain => insecure::send(channel, messages)?,
        }

        Ok(())
    }
}

/// Receiving side of a set-up OT instance.
pub enum BlockOtReceiver {
    /// ALSZ extension.
    Alsz(Box<AlszReceiver>),
    /// Clear-text transfer.
    #[cfg(any(test, feature = "insecure-test-modes"))]
    InsecurePlain,
}

impl BlockOtReceiver {
    /// Runs the base OTs with the sender on the other end of `channel`.
    pub fn init<C: AbstractChannel>(
        mode: BaseOtMode,
        channel: &mut C,
        rng: &mut AesRng,
    ) -> Result<Self> {
        match mode {
            BaseOtMode::Alsz => {
                let ot = AlszReceiver::init(channel, rng)
                    .with_context(|| format!("@{}:{}", file!(), line!()))?;
                Ok(BlockOtReceiver::Alsz(Box::new(ot)))
            }
            #[cfg(any(test, feature = "insecure-test-modes"))]
            BaseOtMode::InsecurePlain => Ok(BlockOtReceiver::InsecurePlain),
        }
    }

    /// Obtains `m_{choice}` of every pair offered by the sender.
    pub fn receive<C: AbstractChannel>(
        &mut self,
        channel: &mut C,
        choices: &[bool],
        rng: &mut AesRng,
    ) -> Result<Vec<u128>> {
        if choices.is_empty() {
            return Ok(Vec::new());
        }

        let received = match self {
            BlockOtReceiver::Alsz(ot) => {
                let mut inputs = choices.to_vec();
                inputs.resize(aligned(choices.len()), false);
                let blocks = ot
                    .receive(channel, &inputs, rng)
                    .with_context(|| format!("@{}:{}", file!(), line!()))?;
                blocks
                    .iter()
                    .take(choices.len())
                    .map(block_to_word)
                    .collect::<Vec<_>>()
            }
            #[cfg(any(test, feature = "insecure-test-modes"))]
            BlockOtReceiver::InsecurePlain => insecure::receive(channel, choices)?,
        };

        if received.len() != choices.len() {
            bail!(
                "{} transfers requested, {} received @{}:{}",
                choices.len(),
                received.len(),
                file!(),
                line!()
            );
        }

        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_utils::sync_channel_by_cb::create_crossbeam_channels;
    use rand::Rng;

    fn transfer(mode: BaseOtMode, n: usize) {
        let mut channels = create_crossbeam_channels(2);
        let (_, mut receiver_ch) = channels[1].pop().unwrap();
        let (_, mut sender_ch) = channels[0].pop().unwrap();

        let mut rng = AesRng::new();
        let messages = (0..n)
            .map(|_| (rng.gen::<u128>(), rng.gen::<u128>()))
            .collect::<Vec<_>>();
        let choices = (0..n).map(|_| rng.gen::<bool>()).collect::<Vec<_>>();

        let sent = messages.clone();
        let handle = std::thread::spawn(move || {
            let mut rng = AesRng::new();
            let mut ot = BlockOtSender::init(mode, &mut sender_ch, &mut rng).unwrap();
            // two batches over one setup
            ot.send(&mut sender_ch, &sent, &mut rng).unwrap();
            ot.send(&mut sender_ch, &sent, &mut rng).unwrap();
        });

        let mut ot = BlockOtReceiver::init(mode, &mut receiver_ch, &mut rng).unwrap();
        for _ in 0..2 {
            let got = ot.receive(&mut receiver_ch, &choices, &mut rng).unwrap();
            for ((m, c), g) in messages.iter().zip(&choices).zip(got) {
                assert_eq!(if *c { m.1 } else { m.0 }, g);
            }
        }

        handle.join().unwrap();
    }

    #[test]
    fn test_alsz_unaligned_batch() {
        transfer(BaseOtMode::Alsz, 13);
    }

    #[test]
    fn test_insecure_plain() {
        transfer(BaseOtMode::InsecurePlain, 5);
    }

    #[test]
    fn test_block_words() {
        let w = 0x0011_2233_4455_6677_8899_aabb_ccdd_eeffu128;
        assert_eq!(block_to_word(&word_to_block(w)), w);
    }
}
