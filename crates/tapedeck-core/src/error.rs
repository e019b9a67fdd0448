//! Error types for tapedeck-core.

use thiserror::Error;

/// Error type for tapedeck-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid speed: {0}")]
    InvalidSpeed(f64),

    #[error("Invalid loop range: start={start}, end={end}")]
    InvalidLoopRange { start: i64, end: i64 },

    #[error("Event pool exhausted: {0}")]
    PoolExhausted(&'static str),

    #[error("Event ring full: {0}")]
    RingFull(&'static str),

    #[error("No thread buffers available")]
    NoThreadBuffers,

    #[error("Unknown route: {0}")]
    UnknownRoute(crate::types::RouteId),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
