//! Module containing the error type of this crate.

use thiserror::Error;

/// Errors raised while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum Error {
    /// A required collaborator is missing from the run configuration.
    #[error("{0} was not set")]
    MissingCollaborator(&'static str),
    /// The requested number of photon packages is negative.
    #[error("number of photon packages is negative")]
    NegativePackageCount,
    /// The requested number of photon packages exceeds the hard limit.
    #[error("number of photon packages is larger than implementation limit of 1e15")]
    ExcessivePackageCount,
    /// A configuration value is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A photon package was asked to traverse a grid it does not start in.
    #[error("the photon package starts outside the dust grid")]
    PathStartsOutsideGrid,
    /// A scattering event was sampled at a position not covered by any cell.
    #[error("the scattering event seems to take place outside the dust grid")]
    ScatteringOutsideGrid,
    /// The worker thread pool could not be constructed.
    #[error("failed to build the worker thread pool: {0}")]
    ThreadPool(String),
    /// Error while writing output files.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shorthand for results carrying [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;
