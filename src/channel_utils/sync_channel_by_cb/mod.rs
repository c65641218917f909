//! Module about native channel of Rust. See [crossbeam].
//! This module provides a function to create a full mesh of in-memory channels for a given number of parties.

use crate::PartyIndex;
use itertools::Itertools;
use scuttlebutt::SyncChannel;
pub mod crossbeam_wrapper;
use crossbeam_wrapper::cbch_pair;
pub use crossbeam_wrapper::{CrossbeamReceiver, CrossbeamSender};

/// A duplex in-memory channel.
pub type CrossbeamChannel = SyncChannel<CrossbeamReceiver, CrossbeamSender>;

/// Create a full mesh of crossbeam channels.
///
/// Entry `i` of the result holds party `i`'s channels, tagged with the peer index and sorted by it.
pub fn create_crossbeam_channels(nparties: usize) -> Vec<Vec<(PartyIndex, CrossbeamChannel)>> {
    let mut channels = (0..nparties)
        .map(|_| (0..nparties).map(|_| None).collect_vec())
        .collect_vec();

    for i in 0..nparties {
        for j in (i + 1)..nparties {
            let (sr, rl) = cbch_pair();
            let (sl, rr) = cbch_pair();
            let left = SyncChannel::new(rl, sl);
            let right = SyncChannel::new(rr, sr);
            channels[i][j] = Some((j, left));
            channels[j][i] = Some((i, right));
        }
    }

    channels
        .into_iter()
        .map(|cs| cs.into_iter().flatten().collect_vec())
        .collect_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AbstractChannel;

    #[test]
    fn test_mesh_shape() {
        let mut channels = create_crossbeam_channels(3);

        assert!(channels.iter().all(|cs| cs.len() == 2));
        assert_eq!(
            channels[1].iter().map(|(p, _)| *p).collect_vec(),
            vec![0, 2]
        );

        let (_, to_two) = &mut channels[0][1];
        to_two.write_u64(0xdead).unwrap();
        to_two.flush().unwrap();
        let (_, from_zero) = &mut channels[2][0];
        assert_eq!(from_zero.read_u64().unwrap(), 0xdead);
    }
}
