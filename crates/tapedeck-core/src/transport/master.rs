//! Abstracted sync sources the transport can chase.

use crate::lockfree::{AtomicDouble, AtomicFlag};
use crate::types::SamplePos;

/// One cycle's worth of advice from a sync source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncAdvice {
    pub speed: f64,
    pub position: SamplePos,
    /// False when the source could not produce usable values this cycle.
    pub valid: bool,
}

/// A source of transport speed and position, queried once per cycle.
///
/// Implementations must answer without blocking; the query runs on the
/// audio thread.
pub trait TransportMaster: Send + Sync {
    fn name(&self) -> &str;

    /// Current speed and position advice.
    fn speed_and_position(&self) -> SyncAdvice;

    /// True once the source has settled enough to be followed.
    fn locked(&self) -> bool;

    /// True while the source is usable at all.
    fn ok(&self) -> bool;

    /// True while the source has announced an imminent start.
    fn starting(&self) -> bool {
        false
    }
}

/// The fallback master: the session's own sample clock.
#[derive(Default)]
pub struct InternalClock {
    speed: AtomicDouble,
    position: AtomicDouble,
    rolling: AtomicFlag,
}

impl InternalClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the session at the end of each cycle.
    pub fn update(&self, speed: f64, position: SamplePos) {
        self.speed.set(speed);
        self.position.set(position as f64);
        self.rolling.set(speed != 0.0);
    }

    pub fn rolling(&self) -> bool {
        self.rolling.get()
    }
}

impl TransportMaster for InternalClock {
    fn name(&self) -> &str {
        "internal"
    }

    fn speed_and_position(&self) -> SyncAdvice {
        SyncAdvice {
            speed: self.speed.get(),
            position: self.position.get() as SamplePos,
            valid: true,
        }
    }

    fn locked(&self) -> bool {
        true
    }

    fn ok(&self) -> bool {
        true
    }
}
