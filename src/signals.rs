//! Session signal bus.
//!
//! Components publish state changes here instead of calling each other
//! back directly. Emission is wait-free (a pointer load plus bounded
//! channel sends), so the audio thread may emit; delivery happens on
//! whatever thread the subscriber drains its receiver.

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use tapedeck_core::{DiskstreamId, MotionState, RegionId, SamplePos};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    TransportStateChanged(MotionState),
    PositionChanged(SamplePos),
    RecordStateChanged(bool),
    CaptureFailed(DiskstreamId),
    SyncLost,
    AuditionRequested(RegionId),
    MarkerAdded(SamplePos),
    CuesSynced,
    Xrun,
}

const SUBSCRIBER_QUEUE: usize = 256;

pub struct SignalBus {
    subscribers: ArcSwap<Vec<Sender<SessionSignal>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register a subscriber. Slow path, non-RT threads only.
    pub fn subscribe(&self) -> Receiver<SessionSignal> {
        let (tx, rx) = bounded(SUBSCRIBER_QUEUE);
        let mut subs = (**self.subscribers.load()).clone();
        subs.push(tx);
        self.subscribers.store(Arc::new(subs));
        rx
    }

    /// Broadcast. A subscriber that has fallen behind loses the signal
    /// rather than stalling the emitter.
    pub fn emit(&self, signal: SessionSignal) {
        for sub in self.subscribers.load().iter() {
            let _ = sub.try_send(signal.clone());
        }
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
