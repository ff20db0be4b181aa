//! Rank-to-rank message passing and the collective operations built on it.
//!
//! Ranks run as threads connected by a full mesh of mpsc channels plus a
//! shared barrier. The collectives here carry the exact contract a network
//! transport would have to meet (two-phase sized all-to-all, elementwise
//! all-reduce, rooted broadcast), so swapping this module for a real
//! transport does not touch the migration or balancing protocol.
//!
//! Every collective must be entered by all ranks in the same relative order;
//! a rank skipping one blocks the others at the trailing barrier. That
//! barrier also guarantees no message from one collective is still in flight
//! when the next begins.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use store::ParticleRecord;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
enum Payload {
    Counts(Vec<u64>),
    Particles(Vec<ParticleRecord>),
    Fractions(Vec<f64>),
}

#[derive(Debug, Clone)]
struct Envelope {
    src: u32,
    payload: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Counts,
    Particles,
    Fractions,
}

fn kind_of(p: &Payload) -> Kind {
    match p {
        Payload::Counts(_) => Kind::Counts,
        Payload::Particles(_) => Kind::Particles,
        Payload::Fractions(_) => Kind::Fractions,
    }
}

/// One rank's endpoint into the mesh.
pub struct RankPort {
    rank: u32,
    senders: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    /// Envelopes received ahead of the phase that wants them.
    stash: VecDeque<Envelope>,
    barrier: Arc<Barrier>,
}

/// Build a fully connected mesh of `n` ranks.
///
/// Returns one port per rank, indexed by rank id. Each port must be moved to
/// its rank's thread; the mesh is complete once every port is live.
pub fn mesh(n: usize) -> Vec<RankPort> {
    assert!(n > 0, "mesh needs at least one rank");
    let mut senders = Vec::with_capacity(n);
    let mut inboxes = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = channel();
        senders.push(tx);
        inboxes.push(rx);
    }
    let barrier = Arc::new(Barrier::new(n));
    inboxes
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| RankPort {
            rank: rank as u32,
            senders: senders.clone(),
            inbox,
            stash: VecDeque::new(),
            barrier: Arc::clone(&barrier),
        })
        .collect()
}

impl RankPort {
    /// This rank's id.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Number of ranks in the mesh.
    pub fn num_ranks(&self) -> usize {
        self.senders.len()
    }

    /// Block until every rank reaches the same point.
    pub fn barrier(&self) {
        self.barrier.wait();
    }

    fn send(&self, dst: u32, payload: Payload) -> Result<()> {
        self.senders[dst as usize]
            .send(Envelope {
                src: self.rank,
                payload,
            })
            .map_err(|_| Error::Fabric(format!("rank {dst} is gone")))
    }

    /// Receive the next envelope of the wanted kind, stashing any envelope
    /// from a later phase that arrives early.
    fn recv_kind(&mut self, want: Kind) -> Result<Envelope> {
        if let Some(pos) = self
            .stash
            .iter()
            .position(|e| kind_of(&e.payload) == want)
        {
            if let Some(env) = self.stash.remove(pos) {
                return Ok(env);
            }
        }
        loop {
            let env = self
                .inbox
                .recv()
                .map_err(|_| Error::Fabric("all peers disconnected".to_string()))?;
            if kind_of(&env.payload) == want {
                return Ok(env);
            }
            self.stash.push_back(env);
        }
    }

    /// Two-phase all-to-all particle exchange.
    ///
    /// `outbound[dst]` is the batch destined for rank `dst`; the slot for
    /// the calling rank is delivered locally. Counts are exchanged first and
    /// the data phase transmits only non-empty batches, so the payload
    /// traffic is sized by what actually moves.
    pub fn all_to_all(
        &mut self,
        mut outbound: Vec<Vec<ParticleRecord>>,
    ) -> Result<Vec<Vec<ParticleRecord>>> {
        let n = self.num_ranks();
        if outbound.len() != n {
            return Err(Error::Fabric(format!(
                "all_to_all expects {n} outbound batches, got {}",
                outbound.len()
            )));
        }
        let me = self.rank as usize;

        for dst in 0..n {
            if dst != me {
                self.send(dst as u32, Payload::Counts(vec![outbound[dst].len() as u64]))?;
            }
        }
        let mut expected = vec![0u64; n];
        for _ in 0..n - 1 {
            let env = self.recv_kind(Kind::Counts)?;
            let Payload::Counts(c) = env.payload else { unreachable!() };
            expected[env.src as usize] = c[0];
        }

        let mut inbound: Vec<Vec<ParticleRecord>> = (0..n).map(|_| Vec::new()).collect();
        inbound[me] = std::mem::take(&mut outbound[me]);
        for (dst, batch) in outbound.into_iter().enumerate() {
            if dst != me && !batch.is_empty() {
                self.send(dst as u32, Payload::Particles(batch))?;
            }
        }
        let pending = expected
            .iter()
            .enumerate()
            .filter(|&(src, &c)| src != me && c > 0)
            .count();
        for _ in 0..pending {
            let env = self.recv_kind(Kind::Particles)?;
            let Payload::Particles(batch) = env.payload else { unreachable!() };
            if batch.len() as u64 != expected[env.src as usize] {
                return Err(Error::Fabric(format!(
                    "rank {} announced {} particles but sent {}",
                    env.src,
                    expected[env.src as usize],
                    batch.len()
                )));
            }
            inbound[env.src as usize] = batch;
        }

        self.barrier();
        Ok(inbound)
    }

    /// Elementwise sum of `local` across all ranks; every rank gets the
    /// identical result, so anything derived from it deterministically is
    /// identical everywhere too.
    pub fn all_reduce_sum(&mut self, local: &[u64]) -> Result<Vec<u64>> {
        let n = self.num_ranks();
        for dst in 0..n {
            if dst != self.rank as usize {
                self.send(dst as u32, Payload::Counts(local.to_vec()))?;
            }
        }
        let mut total = local.to_vec();
        for _ in 0..n - 1 {
            let env = self.recv_kind(Kind::Counts)?;
            let Payload::Counts(c) = env.payload else { unreachable!() };
            if c.len() != total.len() {
                return Err(Error::Fabric(format!(
                    "all_reduce length mismatch: {} vs {}",
                    c.len(),
                    total.len()
                )));
            }
            for (t, v) in total.iter_mut().zip(c) {
                *t += v;
            }
        }
        self.barrier();
        Ok(total)
    }

    /// Maximum of `local` across all ranks.
    pub fn all_reduce_max(&mut self, local: f64) -> Result<f64> {
        let n = self.num_ranks();
        for dst in 0..n {
            if dst != self.rank as usize {
                self.send(dst as u32, Payload::Fractions(vec![local]))?;
            }
        }
        let mut max = local;
        for _ in 0..n - 1 {
            let env = self.recv_kind(Kind::Fractions)?;
            let Payload::Fractions(f) = env.payload else { unreachable!() };
            if f[0] > max {
                max = f[0];
            }
        }
        self.barrier();
        Ok(max)
    }

    /// Broadcast a fraction sequence from `root`; every rank passes its own
    /// candidate and every rank returns the root's copy.
    pub fn broadcast_fractions(&mut self, root: u32, local: &[f64]) -> Result<Vec<f64>> {
        let out = if self.rank == root {
            for dst in 0..self.num_ranks() {
                if dst != root as usize {
                    self.send(dst as u32, Payload::Fractions(local.to_vec()))?;
                }
            }
            local.to_vec()
        } else {
            let env = self.recv_kind(Kind::Fractions)?;
            if env.src != root {
                return Err(Error::Fabric(format!(
                    "expected broadcast from rank {root}, got rank {}",
                    env.src
                )));
            }
            let Payload::Fractions(f) = env.payload else { unreachable!() };
            f
        };
        self.barrier();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn rec(tag: u64) -> ParticleRecord {
        ParticleRecord {
            position: [tag as f64, 0.0, 0.0],
            velocity: [0.0; 3],
            type_id: 0,
            tag,
        }
    }

    fn on_mesh<T: Send + 'static>(
        n: usize,
        f: impl Fn(RankPort) -> T + Send + Sync + 'static,
    ) -> Vec<T> {
        let f = std::sync::Arc::new(f);
        let handles: Vec<_> = mesh(n)
            .into_iter()
            .map(|port| {
                let f = std::sync::Arc::clone(&f);
                thread::spawn(move || f(port))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn all_to_all_routes_by_destination() {
        let results = on_mesh(3, |mut port| {
            let me = port.rank() as u64;
            // rank r sends tag 10*r + dst to each dst
            let outbound: Vec<Vec<ParticleRecord>> = (0..3)
                .map(|dst| vec![rec(10 * me + dst as u64)])
                .collect();
            port.all_to_all(outbound).unwrap()
        });
        for (me, inbound) in results.into_iter().enumerate() {
            for (src, batch) in inbound.into_iter().enumerate() {
                assert_eq!(batch.len(), 1);
                assert_eq!(batch[0].tag, 10 * src as u64 + me as u64);
            }
        }
    }

    #[test]
    fn all_to_all_empty_batches_are_cheap_and_correct() {
        let results = on_mesh(4, |mut port| {
            // only rank 0 sends, and only to rank 3
            let mut outbound: Vec<Vec<ParticleRecord>> = (0..4).map(|_| Vec::new()).collect();
            if port.rank() == 0 {
                outbound[3] = vec![rec(7), rec(8)];
            }
            port.all_to_all(outbound).unwrap()
        });
        for (me, inbound) in results.into_iter().enumerate() {
            let total: usize = inbound.iter().map(|b| b.len()).sum();
            assert_eq!(total, if me == 3 { 2 } else { 0 });
        }
    }

    #[test]
    fn all_reduce_sums_elementwise() {
        let results = on_mesh(4, |mut port| {
            let r = port.rank() as u64;
            port.all_reduce_sum(&[r, 1, 2 * r]).unwrap()
        });
        for total in results {
            assert_eq!(total, vec![6, 4, 12]);
        }
    }

    #[test]
    fn all_reduce_max_agrees_everywhere() {
        let results = on_mesh(3, |mut port| {
            port.all_reduce_max(0.1 * port.rank() as f64).unwrap()
        });
        for m in results {
            assert!((m - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn broadcast_overrides_local_candidates() {
        let results = on_mesh(3, |mut port| {
            let local = vec![port.rank() as f64; 2];
            port.broadcast_fractions(1, &local).unwrap()
        });
        for got in results {
            assert_eq!(got, vec![1.0, 1.0]);
        }
    }

    #[test]
    fn single_rank_collectives_are_trivial() {
        let mut port = mesh(1).pop().unwrap();
        let inbound = port.all_to_all(vec![vec![rec(1)]]).unwrap();
        assert_eq!(inbound[0].len(), 1);
        assert_eq!(port.all_reduce_sum(&[5]).unwrap(), vec![5]);
        assert_eq!(port.broadcast_fractions(0, &[0.5]).unwrap(), vec![0.5]);
    }

    #[test]
    fn back_to_back_collectives_do_not_cross_phases() {
        let results = on_mesh(2, |mut port| {
            let me = port.rank() as u64;
            let outbound: Vec<Vec<ParticleRecord>> =
                (0..2).map(|dst| vec![rec(me * 2 + dst as u64)]).collect();
            let a = port.all_to_all(outbound).unwrap();
            let s = port.all_reduce_sum(&[me + 1]).unwrap();
            let b = port.broadcast_fractions(0, &[me as f64]).unwrap();
            (a[1 - me as usize][0].tag, s[0], b[0])
        });
        assert_eq!(results[0], (2, 3, 0.0));
        assert_eq!(results[1], (1, 3, 0.0));
    }
}
