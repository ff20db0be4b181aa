//! Iterative cut-plane adjustment to equalize per-rank particle counts.
//!
//! One `update` call runs a bounded number of measure/solve/commit rounds:
//! tally owned particles into slabs along each enabled axis, sum the tallies
//! across ranks, nudge each interior cut toward the equal-count point
//! between its neighboring slabs, and publish the result identically on
//! every rank. Ownership is re-migrated once at the end. Balancing is
//! best-effort: stopping at the iteration cap commits the best cuts reached
//! and is not an error.

use store::{BoxDim, ParticleStore};

use crate::communicator::Communicator;
use crate::config::BalanceConfig;
use crate::decomposition::DomainDecomposition;
use crate::error::{Error, Result};

/// Fraction of the full distance to the predicted equal-count point moved
/// per round. Full steps oscillate around clustered distributions; half
/// steps contract onto them.
const ADJUST_GAIN: f64 = 0.5;

/// Periodic controller that re-balances the decomposition.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    enabled: [bool; 3],
    max_iterations: u32,
    tolerance: f64,
    period: u64,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self {
            enabled: [true; 3],
            max_iterations: 8,
            tolerance: 0.05,
            period: 1,
        }
    }
}

impl LoadBalancer {
    /// Balancer with default settings: all axes enabled, every step.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balancer configured from a validated [`BalanceConfig`].
    pub fn from_config(cfg: &BalanceConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            max_iterations: cfg.max_iterations,
            tolerance: cfg.tolerance,
            period: cfg.period,
        }
    }

    /// Enable or disable balancing along one axis. A disabled axis is
    /// skipped entirely; its cut sequence is left untouched.
    pub fn enable_axis(&mut self, axis: usize, on: bool) {
        self.enabled[axis] = on;
    }

    /// Cap on measure/solve/commit rounds per `update` call.
    pub fn set_max_iterations(&mut self, iterations: u32) {
        self.max_iterations = iterations.max(1);
    }

    /// Relative tolerance on per-slab counts around the mean.
    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.tolerance = tolerance.max(0.0);
    }

    /// Invoke balancing only every `period` steps.
    pub fn set_period(&mut self, period: u64) {
        self.period = period.max(1);
    }

    /// Run one balancing pass if `step` is on the schedule.
    ///
    /// Collective: every rank must call this with the same `step`. The
    /// strict sequence per round is measure -> solve -> commit, with one
    /// migration (and, when halo consumers exist, one ghost rebuild) after
    /// the final round.
    pub fn update<S: ParticleStore>(
        &mut self,
        step: u64,
        decomp: &mut DomainDecomposition,
        comm: &mut Communicator,
        boxdim: &BoxDim,
        store: &mut S,
    ) -> Result<()> {
        if step % self.period != 0 {
            return Ok(());
        }
        let dims = decomp.indexer().dims();
        let axes: Vec<usize> = (0..3)
            .filter(|&a| self.enabled[a] && dims[a] > 1)
            .collect();
        if axes.is_empty() {
            return Ok(());
        }

        // A slab must accommodate its ghost layer on both faces, or
        // neighboring halos overlap it completely.
        let width = comm.ghost_width(store)?;
        let npd = boxdim.nearest_plane_distance();
        for &a in &axes {
            decomp.set_min_gap(a, 2.0 * width / npd[a])?;
        }

        // Positions are fixed for the duration of the call; fractions are
        // computed once and re-tallied against each round's cuts.
        let mut fracs = Vec::with_capacity(store.len());
        for i in 0..store.len() {
            let f = boxdim.wrap_fraction(boxdim.make_fraction(store.position(i)));
            if f.iter().any(|v| !v.is_finite()) {
                return Err(Error::NonFinitePosition { tag: store.tag(i) });
            }
            fracs.push(f);
        }

        let mut converged = false;
        let mut rounds = 0;
        while rounds < self.max_iterations {
            rounds += 1;

            // Measure every enabled axis against the same cuts before
            // committing any of them.
            let mut pending: Vec<(usize, Vec<f64>)> = Vec::new();
            for &a in &axes {
                let mut local = vec![0u64; dims[a]];
                for f in &fracs {
                    local[decomp.slab_of(a, f[a])] += 1;
                }
                let counts = comm.reduce_slab_counts(&local)?;
                // a floor raised since the last commit forces a repair
                // sweep even when counts are already balanced
                if decomp.gaps_meet_floor(a) && within_tolerance(&counts, self.tolerance) {
                    continue;
                }
                let candidate =
                    adjust_cuts(decomp.cumulative_fractions(a), &counts, decomp.min_gap(a));
                pending.push((a, candidate));
            }
            if pending.is_empty() {
                converged = true;
                break;
            }

            // The solve is deterministic from the reduced counts, but the
            // committed sequence is still rank 0's copy so no cross-rank
            // floating-point divergence can creep into the decomposition.
            for (a, candidate) in pending {
                let agreed = comm.broadcast_cuts(0, &candidate)?;
                decomp.set_cumulative_fractions(a, &agreed)?;
            }
        }

        if converged {
            tracing::debug!(rounds, "load balancing converged");
        } else {
            tracing::debug!(
                rounds,
                "load balancing hit iteration cap; committing best cuts reached"
            );
        }

        comm.migrate_particles(decomp, boxdim, store)?;
        if comm.has_ghost_subscribers() {
            comm.exchange_ghosts(decomp, boxdim, store)?;
        }
        Ok(())
    }
}

/// `true` when every slab count is within tolerance of the mean.
///
/// The absolute band is floored at half a particle, so integer counts that
/// cannot split any finer stop the iteration.
fn within_tolerance(counts: &[u64], tolerance: f64) -> bool {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return true;
    }
    let mean = total as f64 / counts.len() as f64;
    let band = (tolerance * mean).max(0.5);
    counts
        .iter()
        .all(|&c| (c as f64 - mean).abs() <= band)
}

/// One bounded adjustment sweep over the interior cuts.
///
/// For each cut, the equal-count point against the two neighboring slabs is
/// predicted from their current counts assuming uniform density within each
/// slab, and the cut moves `ADJUST_GAIN` of the way there, clamped so no
/// slab drops below `min_gap`. Counts transferred by earlier cuts in the
/// sweep are accounted for before later cuts are placed.
fn adjust_cuts(cuts: &[f64], counts: &[u64], min_gap: f64) -> Vec<f64> {
    let n = counts.len();
    debug_assert_eq!(cuts.len(), n + 1);
    let mut c = cuts.to_vec();
    let mut w: Vec<f64> = counts.iter().map(|&x| x as f64).collect();

    for j in 1..n {
        let (l, r) = (w[j - 1], w[j]);
        let diff = l - r;
        if diff == 0.0 {
            continue;
        }
        let (wl, wr) = (c[j] - c[j - 1], c[j + 1] - c[j]);
        // donor-side density; the donor slab holds the larger count, so the
        // density is strictly positive whenever diff != 0
        let density = if diff > 0.0 { l / wl } else { r / wr };
        let target = c[j] - ADJUST_GAIN * diff / (2.0 * density);

        let lo = c[j - 1] + min_gap;
        let hi = c[j + 1] - min_gap;
        let nc = if lo <= hi {
            target.clamp(lo, hi)
        } else {
            // the floor grew past what these three cuts currently allow;
            // split the difference and let the repair pass settle it
            0.5 * (c[j - 1] + c[j + 1])
        };

        if nc < c[j] {
            let t = (l / wl) * (c[j] - nc);
            w[j - 1] -= t;
            w[j] += t;
        } else {
            let t = (r / wr) * (nc - c[j]);
            w[j] -= t;
            w[j - 1] += t;
        }
        c[j] = nc;
    }

    if min_gap > 0.0 {
        // forward/backward repair: after it, every gap >= min_gap as long
        // as n * min_gap < 1, which set_min_gap guarantees
        for j in 1..n {
            c[j] = c[j].max(c[j - 1] + min_gap);
        }
        for j in (1..n).rev() {
            c[j] = c[j].min(c[j + 1] - min_gap);
        }
    }

    c[1..n].to_vec()
}
