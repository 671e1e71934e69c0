//! Error types for the simulator.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors that can occur while configuring or running the simulation.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// A config file or programmatically built `RunConfig` failed validation
    /// (e.g. N <= 3m, an m-value with no scenario entry, an unknown node id).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A node or the fabric observed a protocol-level invariant violation:
    /// a malformed commander chain, a message addressed to a dead actor, a
    /// result tree that never reached completeness.
    #[error("protocol anomaly: {0}")]
    ProtocolAnomaly(String),

    /// The round/observation-period scheduler in the experiment driver hit
    /// an inconsistent state (e.g. a round finished with no bandit arm
    /// selected, or an actor task exited before acknowledging shutdown).
    #[error("scheduler error: {0}")]
    SchedulerError(String),

    /// Reading or writing a config/results file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing or emitting a YAML/JSON config/summary failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Encoding or decoding a persisted `FullResults` blob failed.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConsensusError {
    fn from(err: serde_yaml::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ConsensusError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ConsensusError::Codec(err.to_string())
    }
}
