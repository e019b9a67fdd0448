//! Transport state machine and sync sources.

pub mod fsm;
pub mod master;

pub use fsm::{ButlerState, MotionState, TransportApi, TransportEvent, TransportEventType, TransportFsm};
pub use master::{InternalClock, SyncAdvice, TransportMaster};
