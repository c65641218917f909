//! Module about unix domain socket channel. See [UnixStream].
//! This module provides a function to create a full mesh of unix domain socket channels for parties living in one process.

use crate::PartyIndex;
use anyhow::{Context, Result};
use itertools::Itertools;
use scuttlebutt::SyncChannel;
use std::{
    io::{BufReader, BufWriter},
    os::unix::net::UnixStream,
};

/// A duplex unix socket channel.
pub type UnixChannel = SyncChannel<BufReader<UnixStream>, BufWriter<UnixStream>>;

/// Create a full mesh of unix domain socket channels. See [UnixStream].
///
/// Entry `i` of the result holds party `i`'s channels, tagged with the peer index and sorted by it.
pub fn create_unix_channels(nparties: usize) -> Result<Vec<Vec<(PartyIndex, UnixChannel)>>> {
    let mut channels = (0..nparties)
        .map(|_| (0..nparties).map(|_| None).collect_vec())
        .collect_vec();

    for i in 0..nparties {
        for j in (i + 1)..nparties {
            let (s, r) = UnixStream::pair().with_context(|| format!("@{}:{}", file!(), line!()))?;
            let rs = s
                .try_clone()
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            let rr = r
                .try_clone()
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            let left = SyncChannel::new(BufReader::new(rs), BufWriter::new(s));
            let right = SyncChannel::new(BufReader::new(rr), BufWriter::new(r));
            channels[i][j] = Some((j, left));
            channels[j][i] = Some((i, right));
        }
    }

    Ok(channels
        .into_iter()
        .map(|cs| cs.into_iter().flatten().collect_vec())
        .collect_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scuttlebutt::AbstractChannel;

    #[test]
    fn test_unix_mesh() {
        let mut channels = create_unix_channels(3).unwrap();
        let mut two = channels.pop().unwrap();

        let handle = std::thread::spawn(move || {
            let (peer, c) = &mut two[1];
            assert_eq!(*peer, 1);
            let m = c.read_usize().unwrap();
            c.write_usize(m + 1).unwrap();
            c.flush().unwrap();
        });

        let (peer, c) = &mut channels[1][1];
        assert_eq!(*peer, 2);
        c.write_usize(41).unwrap();
        c.flush().unwrap();
        assert_eq!(c.read_usize().unwrap(), 42);

        handle.join().unwrap();
    }
}
