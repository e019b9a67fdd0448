//! Sample-stamped session events and the scheduler that merges them
//! against the transport timeline.
//!
//! Non-RT producers allocate events from a pool and queue them on a
//! lock-free inbound ring. The audio thread drains the ring once per
//! cycle, merging each event into a single sorted list with one cursor.

use crate::lockfree::AtomicCounter;
use crate::pool::MultiAllocSingleReleasePool;
use crate::ring::{spsc_ring, RingReader, RingWriter};
use crate::transport::master::TransportMaster;
use crate::types::{DiskstreamId, RegionId, RouteId, SamplePos, SampleRange};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// What a session event asks the transport/session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    SetTransportSpeed,
    Locate,
    LocateRoll,
    SetLoop,
    PunchIn,
    PunchOut,
    RangeStop,
    RangeLocate,
    Overwrite,
    AutoLoop,
    RealTimeOperation,
    AdjustPlaybackBuffering,
    AdjustCaptureBuffering,
    StartRoll,
    EndRoll,
    TransportStateChange,
    SetTransportMaster,
    Audition,
    Skip,
    SetTimecodeTransmission,
    SetPlayAudioRange,
    CancelPlayAudioRange,
    SyncCues,
}

impl EventType {
    /// Types of which at most one instance may be queued at a time.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            EventType::AutoLoop | EventType::PunchIn | EventType::PunchOut
        )
    }
}

/// How the event interacts with the queued event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Add,
    Remove,
    Replace,
    Clear,
}

/// Callback run on the audio thread for [`EventType::RealTimeOperation`].
pub type RtSlot = Box<dyn FnOnce() + Send>;

/// Pool-allocated record describing one timestamped action.
pub struct SessionEvent {
    pub kind: EventType,
    pub action: EventAction,
    /// When to act. [`SessionEvent::IMMEDIATE`] means the next cycle boundary.
    pub action_sample: SamplePos,
    pub target_sample: SamplePos,
    pub target2_sample: SamplePos,
    pub speed: f64,
    pub yes_or_no: bool,
    pub second_yes_or_no: bool,
    pub track: Option<DiskstreamId>,
    pub region: Option<RegionId>,
    pub routes: Option<Arc<Vec<RouteId>>>,
    pub audio_range: Vec<SampleRange>,
    pub transport_master: Option<Arc<dyn TransportMaster>>,
    pub rt_slot: Option<RtSlot>,
    pub rt_return: Option<crossbeam_channel::Sender<()>>,
}

impl SessionEvent {
    /// Sentinel `action_sample` meaning "act at the next cycle boundary".
    pub const IMMEDIATE: SamplePos = -1;

    pub fn new(
        kind: EventType,
        action: EventAction,
        action_sample: SamplePos,
        target_sample: SamplePos,
        speed: f64,
    ) -> Self {
        Self {
            kind,
            action,
            action_sample,
            target_sample,
            target2_sample: 0,
            speed,
            yes_or_no: false,
            second_yes_or_no: false,
            track: None,
            region: None,
            routes: None,
            audio_range: Vec::new(),
            transport_master: None,
            rt_slot: None,
            rt_return: None,
        }
    }

    fn blank() -> Self {
        Self::new(EventType::TransportStateChange, EventAction::Add, 0, 0, 0.0)
    }

    /// Clear payloads so a recycled event carries nothing forward.
    fn reset(&mut self) {
        *self = Self::blank();
    }

    pub fn before(&self, other: &SessionEvent) -> bool {
        self.action_sample < other.action_sample
    }

    pub fn is_immediate(&self) -> bool {
        self.action_sample == Self::IMMEDIATE
    }
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvent")
            .field("kind", &self.kind)
            .field("action", &self.action)
            .field("action_sample", &self.action_sample)
            .field("target_sample", &self.target_sample)
            .field("speed", &self.speed)
            .finish()
    }
}

struct QueueShared {
    pool: MultiAllocSingleReleasePool<SessionEvent>,
    pending: Mutex<RingWriter<Box<SessionEvent>>>,
    dropped: AtomicCounter,
}

/// Cloneable producer handle for non-RT threads.
#[derive(Clone)]
pub struct SessionEventQueue {
    shared: Arc<QueueShared>,
}

impl SessionEventQueue {
    /// Take a recycled event from the pool. `None` when exhausted;
    /// callers drop the request.
    pub fn alloc(&self) -> Option<Box<SessionEvent>> {
        self.shared.pool.alloc()
    }

    /// Non-blocking enqueue toward the audio thread.
    pub fn queue_event(&self, ev: Box<SessionEvent>) {
        let mut pending = self.shared.pending.lock();
        if let Err(ev) = pending.push(ev) {
            drop(pending);
            self.shared.dropped.bump();
            warn!(kind = ?ev.kind, "session event ring full, dropping event");
            self.shared.pool.release(ev);
        }
    }

    /// Allocate, fill and queue in one step.
    pub fn queue(
        &self,
        kind: EventType,
        action: EventAction,
        action_sample: SamplePos,
        target_sample: SamplePos,
        speed: f64,
    ) -> bool {
        match self.alloc() {
            Some(mut ev) => {
                ev.kind = kind;
                ev.action = action;
                ev.action_sample = action_sample;
                ev.target_sample = target_sample;
                ev.speed = speed;
                self.queue_event(ev);
                true
            }
            None => {
                warn!(?kind, "session event pool exhausted, dropping request");
                false
            }
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.get()
    }
}

/// Audio-thread owner of the event lists.
pub struct SessionEventManager {
    shared: Arc<QueueShared>,
    pending_r: RingReader<Box<SessionEvent>>,
    events: Vec<Box<SessionEvent>>,
    immediate: VecDeque<Box<SessionEvent>>,
    next_event: Option<usize>,
}

impl SessionEventManager {
    pub fn new(pool_capacity: usize, ring_capacity: usize) -> Self {
        let (pending_w, pending_r) = spsc_ring(ring_capacity);
        let shared = Arc::new(QueueShared {
            pool: MultiAllocSingleReleasePool::with_capacity(
                "session-events",
                pool_capacity,
                SessionEvent::blank,
            ),
            pending: Mutex::new(pending_w),
            dropped: AtomicCounter::new(),
        });
        Self {
            shared,
            pending_r,
            events: Vec::new(),
            immediate: VecDeque::new(),
            next_event: None,
        }
    }

    pub fn queue(&self) -> SessionEventQueue {
        SessionEventQueue {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Return a processed event to the pool.
    pub fn release(&self, mut ev: Box<SessionEvent>) {
        ev.reset();
        self.shared.pool.release(ev);
    }

    /// Drain the inbound ring, merging each event. Audio thread only.
    /// Returns the number of events merged.
    pub fn drain_pending(&mut self, transport_sample: SamplePos) -> usize {
        let mut merged = 0;
        while let Some(ev) = self.pending_r.pop() {
            self.merge_event(ev);
            merged += 1;
        }
        if merged > 0 {
            self.set_next_event(transport_sample);
        }
        merged
    }

    /// Audio-thread insertion, bypassing the inbound ring. Used for
    /// follow-up events scheduled while handling another event (loop
    /// returns, range stops).
    pub fn insert_now(&mut self, ev: Box<SessionEvent>, transport_sample: SamplePos) {
        self.merge_event(ev);
        self.set_next_event(transport_sample);
    }

    fn merge_event(&mut self, ev: Box<SessionEvent>) {
        match ev.action {
            EventAction::Remove => {
                let kind = ev.kind;
                let when = ev.action_sample;
                self.release(ev);
                self.remove_event(kind, Some(when));
            }
            EventAction::Clear => {
                let kind = ev.kind;
                self.clear_event_type(kind);
                self.release(ev);
            }
            EventAction::Replace => {
                self.replace_event(ev);
            }
            EventAction::Add => {
                if ev.is_immediate() {
                    self.immediate.push_back(ev);
                } else if ev.kind.is_singleton() && self.find_by_type(ev.kind).is_some() {
                    self.replace_event(ev);
                } else {
                    self.insert_sorted(ev);
                }
            }
        }
    }

    /// Remove any queued event of `kind`, then insert the replacement.
    fn replace_event(&mut self, ev: Box<SessionEvent>) {
        let kind = ev.kind;
        if let Some(idx) = self.find_by_type(kind) {
            let old = self.events.remove(idx);
            self.release(old);
        }
        self.insert_sorted(ev);
    }

    /// Insert keeping the list sorted by `action_sample`; ties keep
    /// insertion order (new event goes after existing equals).
    fn insert_sorted(&mut self, ev: Box<SessionEvent>) {
        let pos = self
            .events
            .partition_point(|e| e.action_sample <= ev.action_sample);
        self.events.insert(pos, ev);
    }

    fn find_by_type(&self, kind: EventType) -> Option<usize> {
        self.events.iter().position(|e| e.kind == kind)
    }

    /// Remove a queued event by type, optionally matching its sample.
    pub fn remove_event(&mut self, kind: EventType, action_sample: Option<SamplePos>) -> bool {
        let found = self
            .events
            .iter()
            .position(|e| e.kind == kind && action_sample.map_or(true, |s| e.action_sample == s));
        match found {
            Some(idx) => {
                let old = self.events.remove(idx);
                self.release(old);
                true
            }
            None => false,
        }
    }

    /// Remove every queued event of `kind`.
    pub fn clear_event_type(&mut self, kind: EventType) {
        let mut idx = 0;
        while idx < self.events.len() {
            if self.events[idx].kind == kind {
                let old = self.events.remove(idx);
                self.release(old);
            } else {
                idx += 1;
            }
        }
    }

    /// Position the cursor at the first event at or after `transport_sample`.
    pub fn set_next_event(&mut self, transport_sample: SamplePos) {
        self.next_event = self
            .events
            .iter()
            .position(|e| e.action_sample >= transport_sample);
    }

    /// Sample of the next timed event, if any.
    pub fn next_event_sample(&self) -> Option<SamplePos> {
        self.next_event
            .and_then(|idx| self.events.get(idx))
            .map(|e| e.action_sample)
    }

    /// Pop the next immediate event. These run before any timed event of
    /// the same cycle and are processed exactly once.
    pub fn take_immediate(&mut self) -> Option<Box<SessionEvent>> {
        self.immediate.pop_front()
    }

    /// Pop the next timed event whose `action_sample` falls inside the
    /// half-open cycle window.
    pub fn pop_due(&mut self, window: SampleRange) -> Option<Box<SessionEvent>> {
        let idx = self.next_event?;
        let due = {
            let ev = self.events.get(idx)?;
            window.contains(ev.action_sample)
        };
        if !due {
            return None;
        }
        let ev = self.events.remove(idx);
        if idx >= self.events.len() {
            self.next_event = None;
        }
        Some(ev)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn immediate_count(&self) -> usize {
        self.immediate.len()
    }

    pub fn has_event_type(&self, kind: EventType) -> bool {
        self.find_by_type(kind).is_some()
    }

    /// Sample stamp of the queued event of `kind`, if any.
    pub fn event_sample(&self, kind: EventType) -> Option<SamplePos> {
        self.find_by_type(kind).map(|idx| self.events[idx].action_sample)
    }

    /// Log the queued events at debug level.
    pub fn dump_events(&self) {
        for (n, ev) in self.events.iter().enumerate() {
            tracing::debug!(n, kind = ?ev.kind, at = ev.action_sample, "queued event");
        }
    }

    /// Check the sorted-list invariant. Test support.
    pub fn is_sorted(&self) -> bool {
        self.events
            .windows(2)
            .all(|w| w[0].action_sample <= w[1].action_sample)
    }
}
