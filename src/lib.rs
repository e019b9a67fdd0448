//! # Tapedeck
//!
//! Real-time multitrack transport and disk-streaming core.
//!
//! The umbrella crate wires the subsystems together:
//! - **tapedeck-core** - transport FSM, session event scheduler, route
//!   graph, lock-free pools and thread buffers
//! - **tapedeck-disk** - sources, regions, playlists, diskstreams and
//!   the butler thread
//! - **tapedeck-analysis** - transient detection worker
//!
//! ## Quick start
//!
//! ```ignore
//! use tapedeck::{Session, SessionConfig};
//!
//! let mut session = Session::new(SessionConfig::new("sounds".into()))?;
//! let drums = session.add_audio_track("drums", 2)?;
//!
//! let handle = session.handle();
//! handle.request_roll();
//!
//! // In the audio callback:
//! session.process(1024);
//! ```
//!
//! The session is driven by an external audio callback; `process` never
//! blocks, allocates or touches disk. Disk work happens on the butler
//! thread, transient analysis on the analyser thread.

pub mod control;
pub mod error;
pub mod plugin;
pub mod session;
pub mod signals;
pub mod track;

pub use control::{SessionHandle, TransportQueryState};
pub use error::{Error, Result};
pub use plugin::PluginHost;
pub use session::{Session, SessionConfig};
pub use signals::{SessionSignal, SignalBus};
pub use track::Track;

pub use tapedeck_analysis as analysis;
pub use tapedeck_core as core;
pub use tapedeck_disk as disk;

pub use tapedeck_core::{
    ChanCount, DiskstreamId, EngineConfig, MidiEvent, MotionState, PlaylistId, RegionId, RouteId,
    SampleCnt, SamplePos, SampleRange, SourceId, TransportMaster,
};
pub use tapedeck_disk::{AlignStyle, DiskConfig, Region};
