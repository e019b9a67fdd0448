//! Background audio analysis: transient detection over captured sources.

pub mod analyser;
pub mod transient;

pub use analyser::{Analysable, Analyser};
pub use transient::TransientDetector;
