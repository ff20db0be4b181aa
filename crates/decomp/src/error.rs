use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the decomposition/balancing core.
///
/// Only unrecoverable conditions surface here. Balancing non-convergence is
/// deliberately not an error; it is reported through logging and the best
/// achieved cuts are committed anyway.
#[derive(Debug, Error)]
pub enum Error {
    /// Infeasible rank grid, infeasible minimum-gap floor, or invalid
    /// user-supplied cut fractions. Detected at setup or at the point a new
    /// sequence is offered for publication, always before any state changes.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A particle's fractional position is not finite after periodic wrap.
    /// This indicates upstream state corruption the core cannot safely
    /// continue past; the owning rank aborts instead of guessing an owner.
    #[error("non-finite fractional position for particle tag {tag}")]
    NonFinitePosition {
        /// Stable tag of the corrupt particle.
        tag: u64,
    },

    /// A collective could not complete because a peer rank disappeared or
    /// sent a payload inconsistent with its announced size.
    #[error("rank fabric failure: {0}")]
    Fabric(String),

    /// Configuration file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
