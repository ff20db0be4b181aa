//! Record-layout particle store.
//!
//! Same contract as the struct-of-arrays store, but particles are kept as
//! whole records in a single contiguous buffer. This is the layout a
//! device-resident store maps onto (one staging buffer, fixed stride), and
//! keeping a host-side twin of it lets the decomposition logic be exercised
//! against both memory layouts.

use crate::particle::{ParticleRecord, ParticleStore};

/// Array-of-structs particle store.
#[derive(Debug, Clone, Default)]
pub struct AosStore {
    owned: Vec<ParticleRecord>,
    ghosts: Vec<(ParticleRecord, u32)>,
}

impl AosStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store owning the given records.
    pub fn from_records(records: impl IntoIterator<Item = ParticleRecord>) -> Self {
        Self {
            owned: records.into_iter().collect(),
            ghosts: Vec::new(),
        }
    }
}

impl ParticleStore for AosStore {
    fn len(&self) -> usize {
        self.owned.len()
    }

    fn position(&self, i: usize) -> [f64; 3] {
        self.owned[i].position
    }

    fn set_position(&mut self, i: usize, pos: [f64; 3]) {
        self.owned[i].position = pos;
    }

    fn tag(&self, i: usize) -> u64 {
        self.owned[i].tag
    }

    fn type_id(&self, i: usize) -> u32 {
        self.owned[i].type_id
    }

    fn record(&self, i: usize) -> ParticleRecord {
        self.owned[i]
    }

    fn push(&mut self, rec: ParticleRecord) {
        self.owned.push(rec);
    }

    fn take(&mut self, indices: &[usize]) -> Vec<ParticleRecord> {
        let out: Vec<ParticleRecord> = indices.iter().map(|&i| self.owned[i]).collect();
        for &i in indices.iter().rev() {
            self.owned.swap_remove(i);
        }
        out
    }

    fn types_present(&self) -> Vec<u32> {
        let mut t: Vec<u32> = self.owned.iter().map(|r| r.type_id).collect();
        t.sort_unstable();
        t.dedup();
        t
    }

    fn clear_ghosts(&mut self) {
        self.ghosts.clear();
    }

    fn push_ghost(&mut self, rec: ParticleRecord, owner: u32) {
        self.ghosts.push((rec, owner));
    }

    fn ghost_len(&self) -> usize {
        self.ghosts.len()
    }

    fn ghost(&self, i: usize) -> (ParticleRecord, u32) {
        self.ghosts[i]
    }
}
