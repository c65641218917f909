//! All links of one party.
//!
//! Per-peer work runs on crossbeam scoped threads, at most `threads` peers at a time. Peers
//! are always served in increasing index, chunk by chunk; since every pairwise exchange is
//! led by the lower index, a chunk never waits on a peer that waits on a later chunk.

use super::session::{PeerLink, SessionId};
use crate::error::MpsuError;
use crate::PartyIndex;
use anyhow::{bail, Context, Result};
use scuttlebutt::{AbstractChannel, AesRng};

/// The links from the local party to every other party, sorted by peer index.
pub struct Mesh<C> {
    me: PartyIndex,
    threads: usize,
    links: Vec<PeerLink<C>>,
}

impl<C: AbstractChannel + Send> Mesh<C> {
    /// Builds the mesh from `(peer, channel)` pairs. Every other party must appear exactly once.
    pub fn new(
        me: PartyIndex,
        nparties: usize,
        threads: usize,
        channels: Vec<(PartyIndex, C)>,
    ) -> Result<Self> {
        let mut channels = channels;
        channels.sort_by_key(|(peer, _)| *peer);

        let expected = (0..nparties).filter(|&p| p != me);
        if channels.len() != nparties.saturating_sub(1)
            || !channels.iter().map(|(p, _)| *p).eq(expected)
        {
            bail!(
                "party {} needs one channel to each of the other {} parties, got peers {:?} @{}:{}",
                me,
                nparties.saturating_sub(1),
                channels.iter().map(|(p, _)| *p).collect::<Vec<_>>(),
                file!(),
                line!()
            );
        }

        let links = channels
            .into_iter()
            .map(|(peer, c)| PeerLink::new(me, peer, c))
            .collect();

        Ok(Self {
            me,
            threads: threads.max(1),
            links,
        })
    }

    /// Index of the local party.
    pub fn me(&self) -> PartyIndex {
        self.me
    }

    /// Number of parties including the local one.
    pub fn nparties(&self) -> usize {
        self.links.len() + 1
    }

    /// Indices of all peers, increasing.
    pub fn peers(&self) -> Vec<PartyIndex> {
        self.links.iter().map(|l| l.peer()).collect()
    }

    /// The link to `peer`.
    pub fn link(&mut self, peer: PartyIndex) -> Result<&mut PeerLink<C>> {
        let me = self.me;
        self.links
            .iter_mut()
            .find(|l| l.peer() == peer)
            .with_context(|| format!("party {} has no link to {} @{}:{}", me, peer, file!(), line!()))
    }

    /// Runs `f` once per peer with a per-peer state taken from `states` (same order as peers).
    fn scatter<S, T, F>(&mut self, states: Vec<S>, f: F) -> Result<Vec<(PartyIndex, T)>>
    where
        S: Send,
        T: Send,
        F: Fn(&mut PeerLink<C>, S) -> Result<T> + Sync,
    {
        let mut states = states.into_iter();
        let mut results = Vec::with_capacity(self.links.len());
        let f = &f;

        for chunk in self.links.chunks_mut(self.threads) {
            let chunk_states = states.by_ref().take(chunk.len()).collect::<Vec<_>>();

            if chunk.len() == 1 {
                for (link, state) in chunk.iter_mut().zip(chunk_states) {
                    let peer = link.peer();
                    results.push((peer, f(link, state)?));
                }
                continue;
            }

            let outcomes = crossbeam::scope(|s| {
                let handles = chunk
                    .iter_mut()
                    .zip(chunk_states)
                    .map(|(link, state)| {
                        s.spawn(move |_| {
                            let peer = link.peer();
                            f(link, state).map(|t| (peer, t))
                        })
                    })
                    .collect::<Vec<_>>();

                handles
                    .into_iter()
                    .map(|h| h.join())
                    .collect::<Vec<_>>()
            })
            .map_err(|_| MpsuError::ProtocolAbort("a peer worker panicked".into()))?;

            for outcome in outcomes {
                let outcome =
                    outcome.map_err(|_| MpsuError::ProtocolAbort("a peer worker panicked".into()))?;
                results.push(outcome?);
            }
        }

        Ok(results)
    }

    /// Runs `f` for every peer, each worker with its own fork of `rng`.
    pub fn for_each_peer<T, F>(&mut self, rng: &mut AesRng, f: F) -> Result<Vec<(PartyIndex, T)>>
    where
        T: Send,
        F: Fn(&mut PeerLink<C>, &mut AesRng) -> Result<T> + Sync,
    {
        let rngs = self.links.iter().map(|_| rng.fork()).collect();
        self.scatter(rngs, |link, mut rng: AesRng| f(link, &mut rng))
    }

    /// Sends `payload` to every peer and collects their equally sized payloads.
    pub fn exchange(&mut self, session: SessionId, payload: &[u8]) -> Result<Vec<(PartyIndex, Vec<u8>)>> {
        let states = vec![(); self.links.len()];
        self.scatter(states, |link, ()| link.exchange(session, payload))
    }

    /// Sends a different payload to each peer; `payloads` follows [Mesh::peers].
    pub fn exchange_each(
        &mut self,
        session: SessionId,
        payloads: Vec<Vec<u8>>,
    ) -> Result<Vec<(PartyIndex, Vec<u8>)>> {
        if payloads.len() != self.links.len() {
            bail!(
                "{} payloads for {} peers @{}:{}",
                payloads.len(),
                self.links.len(),
                file!(),
                line!()
            );
        }
        self.scatter(payloads, |link, payload| link.exchange(session, &payload))
    }

    /// Receives one message of `len` bytes from every peer.
    pub fn gather(&mut self, session: SessionId, len: usize) -> Result<Vec<(PartyIndex, Vec<u8>)>> {
        let states = vec![(); self.links.len()];
        self.scatter(states, |link, ()| link.receive(session, len))
    }

    /// Sends one message to a single peer.
    pub fn send_to(&mut self, peer: PartyIndex, session: SessionId, payload: &[u8]) -> Result<()> {
        self.link(peer)?.send(session, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_utils::session::Phase;
    use crate::channel_utils::sync_channel_by_cb::create_crossbeam_channels;

    fn run_meshes<T, F>(nparties: usize, threads: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(PartyIndex, &mut Mesh<crate::channel_utils::sync_channel_by_cb::CrossbeamChannel>) -> T
            + Send
            + Sync
            + Copy
            + 'static,
    {
        let handles = create_crossbeam_channels(nparties)
            .into_iter()
            .enumerate()
            .map(|(me, channels)| {
                std::thread::spawn(move || {
                    let mut mesh = Mesh::new(me, nparties, threads, channels).unwrap();
                    f(me, &mut mesh)
                })
            })
            .collect::<Vec<_>>();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_exchange_all_thread_counts() {
        for threads in [1, 2, 4] {
            let results = run_meshes(4, threads, |me, mesh| {
                let got = mesh
                    .exchange(SessionId::new(Phase::Circuit, 0), &[me as u8; 3])
                    .unwrap();
                got.into_iter()
                    .map(|(p, v)| (p, v[0]))
                    .collect::<Vec<_>>()
            });

            for (me, got) in results.into_iter().enumerate() {
                let expected = (0..4)
                    .filter(|&p| p != me)
                    .map(|p| (p, p as u8))
                    .collect::<Vec<_>>();
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn test_gather_at_one_party() {
        let results = run_meshes(3, 2, |me, mesh| {
            let session = SessionId::new(Phase::Reveal, 0);
            if me == 0 {
                mesh.gather(session, 2)
                    .unwrap()
                    .into_iter()
                    .map(|(_, v)| v)
                    .collect::<Vec<_>>()
            } else {
                mesh.send_to(0, session, &[me as u8, 7]).unwrap();
                Vec::new()
            }
        });

        assert_eq!(results[0], vec![vec![1, 7], vec![2, 7]]);
    }

    #[test]
    fn test_rejects_incomplete_mesh() {
        let mut channels = create_crossbeam_channels(3);
        let mut mine = channels.remove(0);
        mine.pop();
        assert!(Mesh::new(0, 3, 1, mine).is_err());
    }

    #[test]
    fn test_single_party_mesh() {
        let mut mesh = Mesh::<crate::channel_utils::sync_channel_by_cb::CrossbeamChannel>::new(
            0,
            1,
            1,
            Vec::new(),
        )
        .unwrap();
        assert_eq!(mesh.nparties(), 1);
        assert!(mesh
            .exchange(SessionId::new(Phase::Handshake, 0), &[1])
            .unwrap()
            .is_empty());
    }
}
