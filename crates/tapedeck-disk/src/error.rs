//! Error types for tapedeck-disk.

use tapedeck_core::{DiskstreamId, PlaylistId, RegionId, SourceId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("Unknown region: {0}")]
    UnknownRegion(RegionId),

    #[error("Unknown diskstream: {0}")]
    UnknownDiskstream(DiskstreamId),

    #[error("Unknown playlist: {0}")]
    UnknownPlaylist(PlaylistId),

    #[error("Region extends past end of source: start={start}, length={length}, source_length={source_length}")]
    RegionPastSourceEnd {
        start: i64,
        length: i64,
        source_length: i64,
    },

    #[error("Region sync point outside region: sync={sync}, position={position}, length={length}")]
    SyncOutsideRegion {
        sync: i64,
        position: i64,
        length: i64,
    },

    #[error("Source is not writable: {0}")]
    NotWritable(SourceId),

    #[error("Invalid loop: start={start}, end={end}")]
    InvalidLoop { start: i64, end: i64 },

    #[error("Capture failed on diskstream {0}")]
    CaptureFailed(DiskstreamId),

    #[error("Butler is not running")]
    ButlerNotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;
