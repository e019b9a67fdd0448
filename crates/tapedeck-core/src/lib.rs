//! Transport FSM, session event scheduler, route graph, and the
//! lock-free plumbing underneath them.
//!
//! Everything here is driven from an external audio callback; nothing in
//! this crate blocks, allocates or touches disk on the audio thread once
//! initialization is done.

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::EngineConfig;

pub mod types;
pub use types::{
    coverage, ChanCount, DiskstreamId, MidiEvent, OverlapType, PlaylistId, RegionId, RouteId,
    SampleCnt, SamplePos, SampleRange, SourceId, MAX_SAMPLE,
};

pub mod lockfree;
pub use lockfree::{AtomicCounter, AtomicDouble, AtomicFlag};

pub mod ring;
pub use ring::{spsc_ring, RingReader, RingWriter};

pub mod pool;
pub use pool::{CrossThreadPool, MultiAllocSingleReleasePool, PerThreadPool, Pool, PoolReturn};

pub mod buffers;
pub use buffers::{BufferManager, BufferSet, ThreadBuffers};

pub mod event;
pub use event::{EventAction, EventType, SessionEvent, SessionEventManager, SessionEventQueue};

pub mod graph;
pub use graph::{topological_sort, DagEdges, ProcessOrder, SortKey, SortResult};

pub mod transport;
pub use transport::{
    ButlerState, InternalClock, MotionState, SyncAdvice, TransportApi, TransportEvent,
    TransportEventType, TransportFsm, TransportMaster,
};

pub use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
