//! The partition of fractional space into a 3-D grid of sub-domains.
//!
//! The entire mutable state is three cut-fraction sequences, one per axis.
//! Every rank holds an identical copy; the balancer's commit protocol is
//! responsible for keeping them bit-for-bit equivalent everywhere. Between
//! commits the sequences are immutable and may be read freely.

use crate::error::{Error, Result};
use crate::indexer::GridIndexer;

// Slack for validating gaps against the floor, so a candidate cut clamped to
// exactly `prev + min_gap` is not rejected by rounding in the subtraction.
const GAP_TOL: f64 = 1e-12;

/// Maps box-fractional space to owning ranks via per-axis cut planes.
#[derive(Debug, Clone)]
pub struct DomainDecomposition {
    indexer: GridIndexer,
    grid_pos: [usize; 3],
    /// Cumulative cut fractions per axis, including the implicit 0 and 1
    /// boundaries. Sub-domain `i` along an axis spans `[cuts[i], cuts[i+1])`.
    cuts: [Vec<f64>; 3],
    /// Minimum allowed slab width per axis, in fractional units.
    min_gap: [f64; 3],
}

impl DomainDecomposition {
    /// Create the decomposition for `rank` on the given grid.
    ///
    /// `initial` supplies optional interior cut sequences per axis
    /// (length grid-size minus one, strictly increasing, inside (0,1));
    /// axes left as `None` are cut uniformly.
    pub fn new(
        indexer: GridIndexer,
        rank: u32,
        initial: [Option<Vec<f64>>; 3],
    ) -> Result<Self> {
        if (rank as usize) >= indexer.num_ranks() {
            return Err(Error::Config(format!(
                "rank {rank} outside grid of {} ranks",
                indexer.num_ranks()
            )));
        }

        let mut decomp = Self {
            indexer,
            grid_pos: indexer.grid_pos(rank),
            cuts: [Vec::new(), Vec::new(), Vec::new()],
            min_gap: [0.0; 3],
        };
        for (axis, init) in initial.into_iter().enumerate() {
            let interior = match init {
                Some(seq) => seq,
                None => uniform_interior(indexer.size(axis)),
            };
            decomp.set_cumulative_fractions(axis, &interior)?;
        }

        tracing::debug!(
            grid = ?indexer.dims(),
            rank,
            grid_pos = ?decomp.grid_pos,
            "domain decomposition initialized"
        );
        Ok(decomp)
    }

    /// The grid index function.
    pub fn indexer(&self) -> &GridIndexer {
        &self.indexer
    }

    /// This rank's fixed grid coordinate.
    pub fn grid_pos(&self) -> [usize; 3] {
        self.grid_pos
    }

    /// This rank's linear id.
    pub fn rank(&self) -> u32 {
        let [gx, gy, gz] = self.grid_pos;
        self.indexer.rank(gx, gy, gz)
    }

    /// Sub-domain index along `axis` owning fractional coordinate `f`.
    ///
    /// Total over all finite inputs: the last cut at or below `f`, clamped
    /// into range, so exact-boundary and slightly-out-of-range values from
    /// floating rounding still resolve to a valid slab.
    pub fn slab_of(&self, axis: usize, f: f64) -> usize {
        let cuts = &self.cuts[axis];
        // cuts[0] == 0.0, so the partition point is >= 1 for f >= 0.
        let upper = cuts.partition_point(|&c| c <= f);
        upper.saturating_sub(1).min(self.indexer.size(axis) - 1)
    }

    /// Rank owning the (wrapped) fractional position `frac`.
    pub fn owner_of(&self, frac: [f64; 3]) -> u32 {
        self.indexer.rank(
            self.slab_of(0, frac[0]),
            self.slab_of(1, frac[1]),
            self.slab_of(2, frac[2]),
        )
    }

    /// Cumulative cut fractions along `axis`, boundaries 0 and 1 included.
    pub fn cumulative_fractions(&self, axis: usize) -> &[f64] {
        &self.cuts[axis]
    }

    /// This rank's slab range along `axis`, as (lower, upper) fractions.
    pub fn local_bounds(&self, axis: usize) -> (f64, f64) {
        let g = self.grid_pos[axis];
        (self.cuts[axis][g], self.cuts[axis][g + 1])
    }

    /// Current minimum slab width along `axis`.
    pub fn min_gap(&self, axis: usize) -> f64 {
        self.min_gap[axis]
    }

    /// `true` when every slab along `axis` is at least the minimum width.
    ///
    /// A floor raised after a commit can leave the published sequence below
    /// it; callers use this to decide whether a repair sweep is needed.
    pub fn gaps_meet_floor(&self, axis: usize) -> bool {
        self.cuts[axis]
            .windows(2)
            .all(|w| w[1] - w[0] + GAP_TOL >= self.min_gap[axis])
    }

    /// Raise the minimum slab width along `axis`.
    ///
    /// Fails when the floor alone no longer fits in the unit interval, which
    /// makes any decomposition along that axis geometrically infeasible.
    pub fn set_min_gap(&mut self, axis: usize, gap: f64) -> Result<()> {
        let n = self.indexer.size(axis) as f64;
        if gap < 0.0 || !gap.is_finite() {
            return Err(Error::Config(format!(
                "minimum slab width must be finite and non-negative, got {gap}"
            )));
        }
        if n * gap >= 1.0 {
            return Err(Error::Config(format!(
                "minimum slab width {gap} x {n} slabs exceeds the box along axis {axis}"
            )));
        }
        self.min_gap[axis] = gap;
        Ok(())
    }

    /// Validate and publish a new interior cut sequence for `axis`.
    ///
    /// Rejects (without touching current state) sequences of the wrong
    /// length, outside (0,1), not strictly increasing, or with any slab
    /// narrower than the minimum-gap floor.
    pub fn set_cumulative_fractions(&mut self, axis: usize, interior: &[f64]) -> Result<()> {
        let n = self.indexer.size(axis);
        if interior.len() != n - 1 {
            return Err(Error::Config(format!(
                "axis {axis} needs {} interior cuts, got {}",
                n - 1,
                interior.len()
            )));
        }

        let mut full = Vec::with_capacity(n + 1);
        full.push(0.0);
        full.extend_from_slice(interior);
        full.push(1.0);

        for w in full.windows(2) {
            if !w[1].is_finite() || w[1] <= w[0] {
                return Err(Error::Config(format!(
                    "axis {axis} cut fractions must be strictly increasing inside (0,1): {interior:?}"
                )));
            }
            if w[1] - w[0] + GAP_TOL < self.min_gap[axis] {
                return Err(Error::Config(format!(
                    "axis {axis} slab width {} below minimum {}",
                    w[1] - w[0],
                    self.min_gap[axis]
                )));
            }
        }

        self.cuts[axis] = full;
        Ok(())
    }
}

/// Uniform interior cuts for a grid of `n` slabs.
fn uniform_interior(n: usize) -> Vec<f64> {
    (1..n).map(|i| i as f64 / n as f64).collect()
}
