//! Rank-local particle storage and box geometry
//!
//! This crate provides the data layer underneath the domain-decomposition
//! core. It is deliberately free of any communication logic.
//!
//! # Modules
//! - [`particle`] -- The `ParticleStore` contract, the migration wire record,
//!   and the struct-of-arrays reference store.
//! - [`packed`] -- Record-layout store with the identical contract, standing
//!   in for a device-resident variant.
//! - [`boxdim`] -- Triclinic simulation box with Cartesian/fractional
//!   conversion and periodic wrap. Pure functions, no stored particle state.

#![warn(missing_docs)]

pub mod boxdim;
pub mod packed;
pub mod particle;

pub use boxdim::BoxDim;
pub use packed::AosStore;
pub use particle::{ParticleRecord, ParticleStore, SoaStore};
