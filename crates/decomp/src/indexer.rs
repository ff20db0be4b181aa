//! Bijective mapping between 3-D grid coordinates and linear rank ids.

/// Dimensions of the rank grid and the index function over it.
///
/// Linearization is x-fastest: rank = gx + nx * (gy + ny * gz). The mapping
/// is fixed at startup; every rank computes identical results from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndexer {
    nx: usize,
    ny: usize,
    nz: usize,
}

impl GridIndexer {
    /// Create an indexer for an `nx` x `ny` x `nz` rank grid.
    ///
    /// All dimensions must be positive; a zero dimension would make the
    /// grid empty and every lookup meaningless.
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        assert!(nx > 0 && ny > 0 && nz > 0, "rank grid dimensions must be positive");
        Self { nx, ny, nz }
    }

    /// Total number of ranks.
    pub fn num_ranks(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    /// Grid size along `axis` (0 = x, 1 = y, 2 = z).
    pub fn size(&self, axis: usize) -> usize {
        [self.nx, self.ny, self.nz][axis]
    }

    /// Grid dimensions as an array.
    pub fn dims(&self) -> [usize; 3] {
        [self.nx, self.ny, self.nz]
    }

    /// Linear rank id for grid coordinate (gx, gy, gz).
    pub fn rank(&self, gx: usize, gy: usize, gz: usize) -> u32 {
        debug_assert!(gx < self.nx && gy < self.ny && gz < self.nz);
        (gx + self.nx * (gy + self.ny * gz)) as u32
    }

    /// Grid coordinate of a linear rank id.
    pub fn grid_pos(&self, rank: u32) -> [usize; 3] {
        let r = rank as usize;
        debug_assert!(r < self.num_ranks());
        [r % self.nx, (r / self.nx) % self.ny, r / (self.nx * self.ny)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_bijective() {
        let idx = GridIndexer::new(2, 3, 4);
        assert_eq!(idx.num_ranks(), 24);
        let mut seen = vec![false; 24];
        for gz in 0..4 {
            for gy in 0..3 {
                for gx in 0..2 {
                    let r = idx.rank(gx, gy, gz);
                    assert!(!seen[r as usize], "rank {r} assigned twice");
                    seen[r as usize] = true;
                    assert_eq!(idx.grid_pos(r), [gx, gy, gz]);
                }
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn x_varies_fastest() {
        let idx = GridIndexer::new(2, 2, 2);
        assert_eq!(idx.rank(0, 0, 0), 0);
        assert_eq!(idx.rank(1, 0, 0), 1);
        assert_eq!(idx.rank(0, 1, 0), 2);
        assert_eq!(idx.rank(0, 0, 1), 4);
    }

    #[test]
    #[should_panic(expected = "positive")]
    fn zero_dimension_panics() {
        GridIndexer::new(2, 0, 2);
    }
}
