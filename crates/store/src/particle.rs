//! Particle storage contract and the struct-of-arrays reference store.

use serde::{Deserialize, Serialize};

/// The unit of particle migration and ghost exchange.
///
/// This is everything a rank needs to take over ownership of a particle.
/// Field state the decomposition core never touches (forces, per-type
/// parameters) lives with the physics layer, keyed by `tag`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Cartesian position in the box frame.
    pub position: [f64; 3],
    /// Velocity, carried through migration untouched.
    pub velocity: [f64; 3],
    /// Particle type index, consumed by ghost-width subscribers.
    pub type_id: u32,
    /// Globally unique, stable identity.
    pub tag: u64,
}

/// Contract for a rank-local particle set.
///
/// Two implementations conform to this trait: [`SoaStore`] (struct-of-arrays
/// reference layout) and [`crate::AosStore`] (record layout, the shape a
/// device-resident store takes). The migration and balancing logic is written
/// against this trait only and must behave identically over either backend.
///
/// Owned particles and ghosts are disjoint sets. Ghosts are read-only shadow
/// copies rebuilt wholesale by every exchange; nothing in this contract
/// permits mutating one.
pub trait ParticleStore {
    /// Number of owned particles.
    fn len(&self) -> usize;

    /// `true` when the rank owns no particles.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of owned particle `i`.
    fn position(&self, i: usize) -> [f64; 3];

    /// Overwrite the position of owned particle `i`.
    fn set_position(&mut self, i: usize, pos: [f64; 3]);

    /// Stable tag of owned particle `i`.
    fn tag(&self, i: usize) -> u64;

    /// Type index of owned particle `i`.
    fn type_id(&self, i: usize) -> u32;

    /// Full migration record for owned particle `i`.
    fn record(&self, i: usize) -> ParticleRecord;

    /// Append a migrated-in particle.
    fn push(&mut self, rec: ParticleRecord);

    /// Remove the owned particles at `indices` and return their records in
    /// the order given. `indices` must be strictly increasing; surviving
    /// particles may be reordered (swap-removal), which is the only
    /// reordering the decomposition core ever performs.
    fn take(&mut self, indices: &[usize]) -> Vec<ParticleRecord>;

    /// Sorted, deduplicated type indices present among owned particles.
    fn types_present(&self) -> Vec<u32>;

    /// Drop all ghosts.
    fn clear_ghosts(&mut self);

    /// Append a ghost copy owned by `owner`.
    fn push_ghost(&mut self, rec: ParticleRecord, owner: u32);

    /// Number of ghosts currently held.
    fn ghost_len(&self) -> usize;

    /// Ghost `i` and the rank that owns the original.
    fn ghost(&self, i: usize) -> (ParticleRecord, u32);
}

/// Struct-of-arrays particle store.
///
/// All arrays are parallel: index `i` across every array refers to the same
/// particle. Separate per-component arrays are used deliberately for SIMD
/// lane utilization and straightforward device buffer mapping.
#[derive(Debug, Clone, Default)]
pub struct SoaStore {
    x: Vec<f64>,
    y: Vec<f64>,
    z: Vec<f64>,
    vx: Vec<f64>,
    vy: Vec<f64>,
    vz: Vec<f64>,
    type_id: Vec<u32>,
    tag: Vec<u64>,

    // Ghosts live in their own parallel arrays so owned indices stay dense.
    gx: Vec<f64>,
    gy: Vec<f64>,
    gz: Vec<f64>,
    gvx: Vec<f64>,
    gvy: Vec<f64>,
    gvz: Vec<f64>,
    g_type: Vec<u32>,
    g_tag: Vec<u64>,
    g_owner: Vec<u32>,
}

impl SoaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store owning the given records.
    pub fn from_records(records: impl IntoIterator<Item = ParticleRecord>) -> Self {
        let mut s = Self::new();
        for r in records {
            s.push(r);
        }
        s
    }
}

impl ParticleStore for SoaStore {
    fn len(&self) -> usize {
        self.x.len()
    }

    fn position(&self, i: usize) -> [f64; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    fn set_position(&mut self, i: usize, pos: [f64; 3]) {
        self.x[i] = pos[0];
        self.y[i] = pos[1];
        self.z[i] = pos[2];
    }

    fn tag(&self, i: usize) -> u64 {
        self.tag[i]
    }

    fn type_id(&self, i: usize) -> u32 {
        self.type_id[i]
    }

    fn record(&self, i: usize) -> ParticleRecord {
        ParticleRecord {
            position: [self.x[i], self.y[i], self.z[i]],
            velocity: [self.vx[i], self.vy[i], self.vz[i]],
            type_id: self.type_id[i],
            tag: self.tag[i],
        }
    }

    fn push(&mut self, rec: ParticleRecord) {
        self.x.push(rec.position[0]);
        self.y.push(rec.position[1]);
        self.z.push(rec.position[2]);
        self.vx.push(rec.velocity[0]);
        self.vy.push(rec.velocity[1]);
        self.vz.push(rec.velocity[2]);
        self.type_id.push(rec.type_id);
        self.tag.push(rec.tag);
    }

    fn take(&mut self, indices: &[usize]) -> Vec<ParticleRecord> {
        let out: Vec<ParticleRecord> = indices.iter().map(|&i| self.record(i)).collect();
        // Swap-remove from the back so earlier indices stay valid.
        for &i in indices.iter().rev() {
            self.x.swap_remove(i);
            self.y.swap_remove(i);
            self.z.swap_remove(i);
            self.vx.swap_remove(i);
            self.vy.swap_remove(i);
            self.vz.swap_remove(i);
            self.type_id.swap_remove(i);
            self.tag.swap_remove(i);
        }
        out
    }

    fn types_present(&self) -> Vec<u32> {
        let mut t = self.type_id.clone();
        t.sort_unstable();
        t.dedup();
        t
    }

    fn clear_ghosts(&mut self) {
        self.gx.clear();
        self.gy.clear();
        self.gz.clear();
        self.gvx.clear();
        self.gvy.clear();
        self.gvz.clear();
        self.g_type.clear();
        self.g_tag.clear();
        self.g_owner.clear();
    }

    fn push_ghost(&mut self, rec: ParticleRecord, owner: u32) {
        self.gx.push(rec.position[0]);
        self.gy.push(rec.position[1]);
        self.gz.push(rec.position[2]);
        self.gvx.push(rec.velocity[0]);
        self.gvy.push(rec.velocity[1]);
        self.gvz.push(rec.velocity[2]);
        self.g_type.push(rec.type_id);
        self.g_tag.push(rec.tag);
        self.g_owner.push(owner);
    }

    fn ghost_len(&self) -> usize {
        self.gx.len()
    }

    fn ghost(&self, i: usize) -> (ParticleRecord, u32) {
        (
            ParticleRecord {
                position: [self.gx[i], self.gy[i], self.gz[i]],
                velocity: [self.gvx[i], self.gvy[i], self.gvz[i]],
                type_id: self.g_type[i],
                tag: self.g_tag[i],
            },
            self.g_owner[i],
        )
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Contract tests shared between store backends.

    use super::*;

    fn rec(tag: u64, pos: [f64; 3]) -> ParticleRecord {
        ParticleRecord {
            position: pos,
            velocity: [0.1, 0.2, 0.3],
            type_id: (tag % 3) as u32,
            tag,
        }
    }

    pub(crate) fn push_take_preserves_records<S: ParticleStore + Default>() {
        let mut s = S::default();
        for t in 0..6 {
            s.push(rec(t, [t as f64, 0.0, -(t as f64)]));
        }
        assert_eq!(s.len(), 6);
        assert_eq!(s.record(2).tag, 2);

        let taken = s.take(&[1, 4]);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].tag, 1);
        assert_eq!(taken[1].tag, 4);
        assert_eq!(s.len(), 4);

        let mut remaining: Vec<u64> = (0..s.len()).map(|i| s.tag(i)).collect();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![0, 2, 3, 5]);
    }

    pub(crate) fn ghosts_are_rebuildable<S: ParticleStore + Default>() {
        let mut s = S::default();
        s.push_ghost(rec(7, [1.0, 2.0, 3.0]), 3);
        s.push_ghost(rec(9, [4.0, 5.0, 6.0]), 1);
        assert_eq!(s.ghost_len(), 2);
        let (g, owner) = s.ghost(1);
        assert_eq!(g.tag, 9);
        assert_eq!(owner, 1);
        assert_eq!(s.len(), 0, "ghosts must not count as owned");

        s.clear_ghosts();
        assert_eq!(s.ghost_len(), 0);
    }

    pub(crate) fn types_present_is_sorted_dedup<S: ParticleStore + Default>() {
        let mut s = S::default();
        for t in [5u64, 1, 4, 2, 8] {
            s.push(rec(t, [0.0; 3]));
        }
        assert_eq!(s.types_present(), vec![0, 1, 2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soa_push_take() {
        contract::push_take_preserves_records::<SoaStore>();
    }

    #[test]
    fn soa_ghosts() {
        contract::ghosts_are_rebuildable::<SoaStore>();
    }

    #[test]
    fn soa_types_present() {
        contract::types_present_is_sorted_dedup::<SoaStore>();
    }

    #[test]
    fn set_position_updates_record() {
        let mut s = SoaStore::new();
        s.push(ParticleRecord {
            position: [0.0; 3],
            velocity: [0.0; 3],
            type_id: 0,
            tag: 42,
        });
        s.set_position(0, [1.0, -2.0, 3.0]);
        assert_eq!(s.position(0), [1.0, -2.0, 3.0]);
        assert_eq!(s.record(0).position, [1.0, -2.0, 3.0]);
    }
}
