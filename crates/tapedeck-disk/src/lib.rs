//! Disk-streaming layer: sources, regions, playlists, per-track
//! diskstreams and the butler thread that feeds them.

pub mod error;
pub use error::{Error, Result};

pub mod source;
pub use source::{capture_source_flags, AudioFileSource, MidiSource, SourceFlags};

pub mod destructive;
pub use destructive::{DestructiveSource, XfadeCurves};

pub mod region;
pub use region::{Ancestral, Region};

pub mod playlist;
pub use playlist::Playlist;

pub mod store;
pub use store::{AudioStore, Source};

pub mod diskstream;
pub use diskstream::{
    AlignStyle, AudioDiskstream, CaptureInfo, CaptureTransition, DiskConfig, DiskstreamFlags,
    MidiDiskstream, ProcessContext,
};

pub mod butler;
pub use butler::{Butler, ButlerRequest, Diskstream, DiskstreamRegistry, TransportWorkDone};
