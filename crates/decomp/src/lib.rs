//! Spatial domain decomposition and dynamic load balancing for distributed
//! particle simulations.
//!
//! The box is partitioned into a 3-D grid of sub-domains by per-axis cut
//! planes expressed as box fractions, so the partition is valid in skewed
//! boxes without change. Each rank owns the particles inside its sub-domain;
//! [`Communicator`] moves particles between ranks when ownership changes and
//! maintains a read-only ghost halo near sub-domain faces. [`LoadBalancer`]
//! periodically moves the cut planes to even out per-rank particle counts.
//!
//! Ranks run as threads over an in-process message fabric
//! ([`fabric`]); the collectives carry the contract a network transport
//! would have to meet, so the protocol layer is transport-agnostic. Use
//! [`cluster::launch`] to run a driver closure on every rank of a grid.

#![warn(missing_docs)]

pub mod balancer;
pub mod cluster;
pub mod communicator;
pub mod config;
pub mod decomposition;
pub mod error;
pub mod fabric;
pub mod indexer;

pub use balancer::LoadBalancer;
pub use cluster::{launch, RankHarness};
pub use communicator::{Communicator, GhostWidthRegistry};
pub use config::{BalanceConfig, BoxConfig, DecompConfig};
pub use decomposition::DomainDecomposition;
pub use error::{Error, Result};
pub use indexer::GridIndexer;
