//! Particle migration and ghost (halo) exchange.
//!
//! Both operations are collective: every rank enters them in the same
//! relative order. After the balancer changes cut planes, migration must run
//! before any ghost exchange, because ghost selection assumes ownership
//! already reflects the current decomposition.

use store::{BoxDim, ParticleRecord, ParticleStore};

use crate::decomposition::DomainDecomposition;
use crate::error::{Error, Result};
use crate::fabric::RankPort;

/// A ghost layer width request: required halo width per particle type.
pub type GhostWidthFn = Box<dyn Fn(u32) -> f64 + Send>;

/// Registry of ghost layer width subscribers.
///
/// The effective width is the maximum any subscriber requires for any type
/// present. It is cached, and recomputed when a subscriber is added (dirty
/// flag) or the set of types present changes, so the cached value is never
/// silently stale. Evaluation order of subscribers does not matter; the
/// registry takes a maximum.
#[derive(Default)]
pub struct GhostWidthRegistry {
    subscribers: Vec<GhostWidthFn>,
    cached: f64,
    cached_types: Vec<u32>,
    dirty: bool,
}

impl GhostWidthRegistry {
    /// Empty registry; effective width is zero until someone subscribes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a width request and invalidate the cache.
    pub fn subscribe(&mut self, f: impl Fn(u32) -> f64 + Send + 'static) {
        self.subscribers.push(Box::new(f));
        self.dirty = true;
    }

    /// `true` when no width requests are registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Effective width over the given (sorted, deduplicated) type set.
    pub fn effective_width(&mut self, types: &[u32]) -> f64 {
        if self.dirty || self.cached_types != types {
            let mut max = 0.0_f64;
            for f in &self.subscribers {
                for &t in types {
                    let w = f(t);
                    if w > max {
                        max = w;
                    }
                }
            }
            self.cached = max;
            self.cached_types = types.to_vec();
            self.dirty = false;
        }
        self.cached
    }
}

/// Owns inter-rank particle movement for one rank.
pub struct Communicator {
    port: RankPort,
    registry: GhostWidthRegistry,
}

impl Communicator {
    /// Wrap a fabric port.
    pub fn new(port: RankPort) -> Self {
        Self {
            port,
            registry: GhostWidthRegistry::new(),
        }
    }

    /// This rank's id.
    pub fn rank(&self) -> u32 {
        self.port.rank()
    }

    /// Number of ranks in the run.
    pub fn num_ranks(&self) -> usize {
        self.port.num_ranks()
    }

    /// Register a ghost layer width request.
    pub fn add_ghost_layer_width_request(&mut self, f: impl Fn(u32) -> f64 + Send + 'static) {
        self.registry.subscribe(f);
    }

    /// `true` once any consumer has requested a ghost layer.
    pub fn has_ghost_subscribers(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Effective ghost width, agreed across all ranks.
    ///
    /// Collective: the locally evaluated maximum is max-reduced so every
    /// rank selects ghosts (and derives slab-width floors) from the same
    /// number even when type populations differ per rank.
    pub fn ghost_width<S: ParticleStore>(&mut self, store: &S) -> Result<f64> {
        let local = self.registry.effective_width(&store.types_present());
        self.port.all_reduce_max(local)
    }

    /// Re-assign particle ownership against the current decomposition.
    ///
    /// Every locally owned particle is classified by the owner of its
    /// wrapped fractional position; particles owned elsewhere are shipped
    /// there in a two-phase sized all-to-all. No particle is duplicated or
    /// dropped. A non-finite fraction is fatal: it means upstream state is
    /// corrupt and no owner can be assigned safely.
    pub fn migrate_particles<S: ParticleStore>(
        &mut self,
        decomp: &DomainDecomposition,
        boxdim: &BoxDim,
        store: &mut S,
    ) -> Result<()> {
        let me = self.port.rank();
        debug_assert_eq!(me, decomp.rank(), "communicator and decomposition disagree on rank");
        let n = self.port.num_ranks();

        let mut outbound: Vec<Vec<ParticleRecord>> = (0..n).map(|_| Vec::new()).collect();
        let mut leaving: Vec<usize> = Vec::new();
        for i in 0..store.len() {
            let frac = boxdim.wrap_fraction(boxdim.make_fraction(store.position(i)));
            if frac.iter().any(|f| !f.is_finite()) {
                return Err(Error::NonFinitePosition { tag: store.tag(i) });
            }
            let owner = decomp.owner_of(frac);
            if owner != me {
                let mut rec = store.record(i);
                // ship the wrapped position so the receiver sees an in-box
                // coordinate consistent with the ownership decision
                rec.position = boxdim.make_coordinates(frac);
                outbound[owner as usize].push(rec);
                leaving.push(i);
            }
        }

        let sent: usize = outbound.iter().map(|b| b.len()).sum();
        store.take(&leaving);

        let inbound = self.port.all_to_all(outbound)?;
        let mut received = 0usize;
        for batch in inbound {
            received += batch.len();
            for rec in batch {
                store.push(rec);
            }
        }

        tracing::debug!(rank = me, sent, received, owned = store.len(), "particle migration complete");
        Ok(())
    }

    /// Rebuild the ghost halo from scratch.
    ///
    /// Old ghosts are discarded first; there is no incremental update. Each
    /// owned particle within the effective fractional width of a sub-domain
    /// face is copied to the neighbor(s) across that face, including edge
    /// and corner neighbors, with periodic wrap of the neighbor grid
    /// coordinate. Received copies are appended as read-only ghosts tagged
    /// with the owning rank.
    ///
    /// Ghosts carry wrapped in-box positions: a copy received across a
    /// periodic face sits on the far side of the box, not at a shifted
    /// near-boundary image. Distance computations against ghosts must apply
    /// minimum-image wrapping themselves.
    pub fn exchange_ghosts<S: ParticleStore>(
        &mut self,
        decomp: &DomainDecomposition,
        boxdim: &BoxDim,
        store: &mut S,
    ) -> Result<()> {
        store.clear_ghosts();

        let width = self.ghost_width(store)?;
        if width <= 0.0 {
            // the reduce above is collective, so every rank takes this
            // early return together
            return Ok(());
        }

        let npd = boxdim.nearest_plane_distance();
        let wf = [width / npd[0], width / npd[1], width / npd[2]];
        let dims = decomp.indexer().dims();
        let gpos = decomp.grid_pos();
        let me = self.port.rank();
        let n = self.port.num_ranks();
        let bounds: Vec<(f64, f64)> = (0..3).map(|a| decomp.local_bounds(a)).collect();

        let mut outbound: Vec<Vec<ParticleRecord>> = (0..n).map(|_| Vec::new()).collect();
        let mut dests: Vec<u32> = Vec::with_capacity(8);
        for i in 0..store.len() {
            let frac = boxdim.wrap_fraction(boxdim.make_fraction(store.position(i)));
            if frac.iter().any(|f| !f.is_finite()) {
                return Err(Error::NonFinitePosition { tag: store.tag(i) });
            }
            let mut near_lo = [false; 3];
            let mut near_hi = [false; 3];
            for a in 0..3 {
                near_lo[a] = frac[a] < bounds[a].0 + wf[a];
                near_hi[a] = frac[a] >= bounds[a].1 - wf[a];
            }

            dests.clear();
            for dz in -1i32..=1 {
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        let offset = [dx, dy, dz];
                        if offset == [0, 0, 0] {
                            continue;
                        }
                        let matches = (0..3).all(|a| match offset[a] {
                            -1 => near_lo[a],
                            1 => near_hi[a],
                            _ => true,
                        });
                        if !matches {
                            continue;
                        }
                        let ng: Vec<usize> = (0..3)
                            .map(|a| {
                                (gpos[a] as i32 + offset[a]).rem_euclid(dims[a] as i32) as usize
                            })
                            .collect();
                        let neighbor = decomp.indexer().rank(ng[0], ng[1], ng[2]);
                        if neighbor == me || dests.contains(&neighbor) {
                            continue;
                        }
                        dests.push(neighbor);
                    }
                }
            }
            if !dests.is_empty() {
                let mut rec = store.record(i);
                rec.position = boxdim.make_coordinates(frac);
                for &dst in &dests {
                    outbound[dst as usize].push(rec);
                }
            }
        }

        let sent: usize = outbound.iter().map(|b| b.len()).sum();
        let inbound = self.port.all_to_all(outbound)?;
        for (src, batch) in inbound.into_iter().enumerate() {
            for rec in batch {
                store.push_ghost(rec, src as u32);
            }
        }

        tracing::debug!(
            rank = me,
            width,
            sent,
            ghosts = store.ghost_len(),
            "ghost exchange complete"
        );
        Ok(())
    }

    /// Sum per-slab counts across all ranks (collective).
    pub(crate) fn reduce_slab_counts(&mut self, local: &[u64]) -> Result<Vec<u64>> {
        self.port.all_reduce_sum(local)
    }

    /// Broadcast solved cut fractions from `root` (collective).
    pub(crate) fn broadcast_cuts(&mut self, root: u32, cuts: &[f64]) -> Result<Vec<f64>> {
        self.port.broadcast_fractions(root, cuts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn registry_takes_max_over_subscribers_and_types() {
        let mut reg = GhostWidthRegistry::new();
        assert_eq!(reg.effective_width(&[0, 1]), 0.0);

        reg.subscribe(|t| if t == 1 { 0.5 } else { 0.1 });
        reg.subscribe(|_| 0.3);
        assert_eq!(reg.effective_width(&[0]), 0.3);
        assert_eq!(reg.effective_width(&[0, 1]), 0.5);
    }

    #[test]
    fn registry_recomputes_on_subscribe_not_on_repeat() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = GhostWidthRegistry::new();
        let c = Arc::clone(&calls);
        reg.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            0.2
        });

        assert_eq!(reg.effective_width(&[0]), 0.2);
        let after_first = calls.load(Ordering::SeqCst);
        // same type set: cache hit, no re-evaluation
        assert_eq!(reg.effective_width(&[0]), 0.2);
        assert_eq!(calls.load(Ordering::SeqCst), after_first);

        // a new subscriber dirties the cache
        reg.subscribe(|_| 0.1);
        assert_eq!(reg.effective_width(&[0]), 0.2);
        assert!(calls.load(Ordering::SeqCst) > after_first);
    }
}
