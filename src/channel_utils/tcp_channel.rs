//! Module about tcp channel. See [TcpStream].
//! Party `i` listens on `base_port + i`, connects to every lower-indexed party and accepts every higher-indexed one.

use crate::PartyIndex;
use anyhow::{bail, Context, Result};
use scuttlebutt::SyncChannel;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::debug;

const TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// A duplex TCP channel.
pub type TcpChannel = SyncChannel<BufReader<TcpStream>, BufWriter<TcpStream>>;

fn connect_with_retry(addr: SocketAddr) -> Result<TcpStream> {
    let start = Instant::now();
    loop {
        match TcpStream::connect_timeout(&addr, TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) if start.elapsed() < TIMEOUT => {
                debug!("connecting to {} failed ({}), retrying", addr, e);
                sleep(RETRY_INTERVAL);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("addr={} @{}:{}", addr, file!(), line!()))
            }
        }
    }
}

fn write_id(stream: &mut TcpStream, id: PartyIndex) -> Result<()> {
    stream
        .write_all(&(id as u64).to_le_bytes())
        .with_context(|| format!("@{}:{}", file!(), line!()))
}

fn read_id(stream: &mut TcpStream) -> Result<PartyIndex> {
    let mut buf = [0u8; 8];
    stream
        .read_exact(&mut buf)
        .with_context(|| format!("@{}:{}", file!(), line!()))?;
    Ok(u64::from_le_bytes(buf) as PartyIndex)
}

/// Return the channels of party `me` to every other party, sorted by peer index.
pub fn create_tcp_channels_for_party(
    nparties: usize,
    host: IpAddr,
    base_port: u16,
    me: PartyIndex,
) -> Result<Vec<(PartyIndex, TcpChannel)>> {
    if me >= nparties {
        bail!("me (={}) must be < nparties (={}) @{}:{}", me, nparties, file!(), line!());
    }

    let addr_of = |i: usize| SocketAddr::new(host, base_port + i as u16);
    let listener = TcpListener::bind(addr_of(me))
        .with_context(|| format!("me={} addr={} @{}:{}", me, addr_of(me), file!(), line!()))?;

    let mut streams = (0..me)
        .map(|i| {
            let mut stream = connect_with_retry(addr_of(i))?;
            write_id(&mut stream, me)?;
            let peer = read_id(&mut stream)?;
            if peer != i {
                bail!("expected party {} at {}, found {} @{}:{}", i, addr_of(i), peer, file!(), line!());
            }
            Ok((peer, stream))
        })
        .collect::<Result<Vec<(PartyIndex, TcpStream)>>>()?;

    for _ in (me + 1)..nparties {
        let (mut stream, from) = listener
            .accept()
            .with_context(|| format!("@{}:{}", file!(), line!()))?;
        let peer = read_id(&mut stream)?;
        if peer <= me || peer >= nparties || streams.iter().any(|(p, _)| *p == peer) {
            bail!("unexpected party {} connecting from {} @{}:{}", peer, from, file!(), line!());
        }
        write_id(&mut stream, me)?;
        streams.push((peer, stream));
    }

    streams.sort_by(|a, b| a.0.cmp(&b.0));

    streams
        .into_iter()
        .map(|(peer, s)| {
            s.set_nodelay(true)
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            let ss = s
                .try_clone()
                .with_context(|| format!("@{}:{}", file!(), line!()))?;
            Ok((peer, SyncChannel::new(BufReader::new(ss), BufWriter::new(s))))
        })
        .collect::<Result<Vec<_>>>()
}

/// Create a full mesh of tcp channels on localhost for parties living in one process.
///
/// Entry `i` of the result holds party `i`'s channels.
pub fn create_tcp_channels(
    nparties: usize,
    base_port: u16,
) -> Result<Vec<Vec<(PartyIndex, TcpChannel)>>> {
    let localhost = IpAddr::from([127, 0, 0, 1]);
    let handles = (0..nparties)
        .map(|me| {
            std::thread::spawn(move || {
                create_tcp_channels_for_party(nparties, localhost, base_port, me)
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|h| match h.join() {
            Ok(res) => res,
            Err(_) => bail!("channel setup thread panicked @{}:{}", file!(), line!()),
        })
        .collect()
}
