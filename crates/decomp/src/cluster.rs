//! Thread-per-rank harness for running a decomposed job in one process.
//!
//! Each rank gets its own thread, decomposition copy, communicator, and
//! particle store, wired together over the in-process fabric. The driver
//! closure runs identically on every rank, the same way a rank program would
//! under a launcher. Initial particles are seeded on rank 0 and distributed
//! by one migration before the driver starts, so drivers always begin from a
//! consistent ownership state.

use std::sync::Arc;
use std::thread;

use store::{BoxDim, ParticleRecord, ParticleStore};

use crate::balancer::LoadBalancer;
use crate::communicator::Communicator;
use crate::config::DecompConfig;
use crate::decomposition::DomainDecomposition;
use crate::error::{Error, Result};
use crate::fabric::mesh;
use crate::indexer::GridIndexer;

/// Everything one rank needs to take part in a decomposed run.
pub struct RankHarness<S> {
    /// This rank's copy of the (globally agreed) decomposition.
    pub decomp: DomainDecomposition,
    /// Migration and ghost exchange endpoint.
    pub comm: Communicator,
    /// The global simulation box.
    pub boxdim: BoxDim,
    /// Locally owned particles plus the current ghost halo.
    pub store: S,
}

impl<S: ParticleStore> RankHarness<S> {
    /// This rank's id.
    pub fn rank(&self) -> u32 {
        self.comm.rank()
    }

    /// Number of ranks in the run.
    pub fn num_ranks(&self) -> usize {
        self.comm.num_ranks()
    }

    /// Run one balancing pass (collective).
    pub fn balance(&mut self, balancer: &mut LoadBalancer, step: u64) -> Result<()> {
        balancer.update(step, &mut self.decomp, &mut self.comm, &self.boxdim, &mut self.store)
    }

    /// Re-assign particle ownership (collective).
    pub fn migrate(&mut self) -> Result<()> {
        self.comm.migrate_particles(&self.decomp, &self.boxdim, &mut self.store)
    }

    /// Rebuild the ghost halo (collective).
    pub fn exchange_ghosts(&mut self) -> Result<()> {
        self.comm.exchange_ghosts(&self.decomp, &self.boxdim, &mut self.store)
    }

    /// Rank currently owning the particle with `tag`, or `None` when no rank
    /// owns it (collective).
    ///
    /// Ownership is unique after migration, so summing `rank + 1` from
    /// whichever rank holds the tag identifies the owner on every rank.
    pub fn owner_rank(&mut self, tag: u64) -> Result<Option<u32>> {
        let held = (0..self.store.len()).any(|i| self.store.tag(i) == tag);
        let encoded = if held { self.comm.rank() as u64 + 1 } else { 0 };
        let total = self.comm.reduce_slab_counts(&[encoded])?[0];
        Ok(total.checked_sub(1).map(|r| r as u32))
    }
}

/// Run `driver` on every rank of the configured grid and collect the
/// per-rank results, indexed by rank id.
///
/// `particles` is the full initial system; it is seeded on rank 0 and spread
/// to its owners before any driver runs. A rank returning an error fails the
/// whole launch.
pub fn launch<S, T, F>(
    config: &DecompConfig,
    particles: Vec<ParticleRecord>,
    driver: F,
) -> Result<Vec<T>>
where
    S: ParticleStore + Default + Send + 'static,
    T: Send + 'static,
    F: Fn(&mut RankHarness<S>) -> Result<T> + Send + Sync + 'static,
{
    config.validate()?;
    let [nx, ny, nz] = config.grid;
    let indexer = GridIndexer::new(nx, ny, nz);
    let n = indexer.num_ranks();
    let boxdim = config.boxdim.to_boxdim();
    let initial = config.initial_cuts();
    let driver = Arc::new(driver);

    tracing::info!(
        grid = ?indexer.dims(),
        ranks = n,
        particles = particles.len(),
        "launching decomposed run"
    );

    let mut seed = Some(particles);
    let mut handles = Vec::with_capacity(n);
    for port in mesh(n) {
        let rank = port.rank();
        let driver = Arc::clone(&driver);
        let initial = initial.clone();
        let seeded = if rank == 0 {
            seed.take().unwrap_or_default()
        } else {
            Vec::new()
        };
        let handle = thread::Builder::new()
            .name(format!("rank-{rank}"))
            .spawn(move || -> Result<T> {
                let decomp = DomainDecomposition::new(indexer, rank, initial)?;
                let mut harness = RankHarness {
                    decomp,
                    comm: Communicator::new(port),
                    boxdim,
                    store: S::default(),
                };
                for rec in seeded {
                    harness.store.push(rec);
                }
                harness.migrate()?;
                driver(&mut harness)
            })?;
        handles.push(handle);
    }

    handles
        .into_iter()
        .map(|h| {
            h.join()
                .map_err(|_| Error::Fabric("rank thread panicked".to_string()))?
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoxConfig;
    use store::SoaStore;

    fn config(grid: [usize; 3]) -> DecompConfig {
        DecompConfig {
            grid,
            boxdim: BoxConfig {
                lengths: [2.0, 2.0, 2.0],
                tilts: [0.0; 3],
            },
            cuts_x: None,
            cuts_y: None,
            cuts_z: None,
            balance: Default::default(),
        }
    }

    fn particle(tag: u64, position: [f64; 3]) -> ParticleRecord {
        ParticleRecord {
            position,
            velocity: [0.0; 3],
            type_id: 0,
            tag,
        }
    }

    #[test]
    fn seed_migration_spreads_particles_to_owners() {
        // one particle per octant of a 2x2x2 grid, all seeded on rank 0
        let mut particles = Vec::new();
        let mut tag = 0;
        for z in [-0.5, 0.5] {
            for y in [-0.5, 0.5] {
                for x in [-0.5, 0.5] {
                    particles.push(particle(tag, [x, y, z]));
                    tag += 1;
                }
            }
        }
        let owned = launch::<SoaStore, _, _>(&config([2, 2, 2]), particles, |h| {
            Ok(h.store.len())
        })
        .unwrap();
        assert_eq!(owned, vec![1; 8]);
    }

    #[test]
    fn owner_rank_agrees_on_every_rank() {
        // two particles in opposite x halves of a 2x1x1 grid
        let particles = vec![
            particle(0, [-0.5, 0.0, 0.0]),
            particle(1, [0.5, 0.0, 0.0]),
        ];
        let results = launch::<SoaStore, _, _>(&config([2, 1, 1]), particles, |h| {
            let owners = vec![
                h.owner_rank(0)?,
                h.owner_rank(1)?,
                h.owner_rank(99)?,
            ];
            Ok(owners)
        })
        .unwrap();
        for owners in results {
            assert_eq!(owners, vec![Some(0), Some(1), None]);
        }
    }

    #[test]
    fn results_are_indexed_by_rank() {
        let ranks = launch::<SoaStore, _, _>(&config([1, 2, 2]), Vec::new(), |h| Ok(h.rank()))
            .unwrap();
        assert_eq!(ranks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn invalid_config_fails_before_spawning() {
        let mut bad = config([2, 2, 2]);
        bad.balance.period = 0;
        let res = launch::<SoaStore, _, _>(&bad, Vec::new(), |h| Ok(h.rank()));
        assert!(res.is_err());
    }
}
