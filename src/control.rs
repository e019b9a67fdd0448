//! Control protocol surface: what GUIs and control surfaces poll and
//! poke.
//!
//! All mutations travel as session events through the inbound ring; all
//! queries read atomics published by the audio thread at the end of
//! each cycle. Nothing here ever touches the audio thread directly.

use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use tapedeck_core::{
    AtomicDouble, EventAction, EventType, SamplePos, SampleRange, SessionEvent, SessionEventQueue,
    TransportMaster,
};
use tapedeck_disk::store::AudioStore;
use tracing::info;

/// Transport state published for pollers.
pub struct TransportQueryState {
    pub transport_sample: AtomicI64,
    pub speed: AtomicDouble,
    /// 0 stopped, 1 rolling, 2 declicking, 3 locating.
    pub motion: AtomicU8,
    pub record_armed: AtomicBool,
    pub session_end: AtomicI64,
    pub markers: Mutex<Vec<SamplePos>>,
}

impl TransportQueryState {
    pub fn new() -> Self {
        Self {
            transport_sample: AtomicI64::new(0),
            speed: AtomicDouble::new(0.0),
            motion: AtomicU8::new(0),
            record_armed: AtomicBool::new(false),
            session_end: AtomicI64::new(0),
            markers: Mutex::new(Vec::new()),
        }
    }
}

impl Default for TransportQueryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable non-RT handle onto a session.
#[derive(Clone)]
pub struct SessionHandle {
    queue: SessionEventQueue,
    query: Arc<TransportQueryState>,
    store: Arc<AudioStore>,
    sound_dir: PathBuf,
}

impl SessionHandle {
    pub(crate) fn new(
        queue: SessionEventQueue,
        query: Arc<TransportQueryState>,
        store: Arc<AudioStore>,
        sound_dir: PathBuf,
    ) -> Self {
        Self {
            queue,
            query,
            store,
            sound_dir,
        }
    }

    // ----- pokes -----

    pub fn request_transport_speed(&self, speed: f64) {
        self.queue.queue(
            EventType::SetTransportSpeed,
            EventAction::Add,
            SessionEvent::IMMEDIATE,
            0,
            speed,
        );
    }

    pub fn request_locate(&self, pos: SamplePos, with_roll: bool) {
        let kind = if with_roll {
            EventType::LocateRoll
        } else {
            EventType::Locate
        };
        self.queue
            .queue(kind, EventAction::Add, SessionEvent::IMMEDIATE, pos, 0.0);
    }

    pub fn request_roll(&self) {
        self.queue.queue(
            EventType::StartRoll,
            EventAction::Add,
            SessionEvent::IMMEDIATE,
            0,
            1.0,
        );
    }

    pub fn request_stop(&self, abort: bool) {
        if let Some(mut ev) = self.queue.alloc() {
            ev.kind = EventType::EndRoll;
            ev.action = EventAction::Add;
            ev.action_sample = SessionEvent::IMMEDIATE;
            ev.yes_or_no = abort;
            self.queue.queue_event(ev);
        }
    }

    /// Play a set of timeline ranges back to back, then stop.
    pub fn request_play_range(&self, ranges: &[SampleRange]) {
        if let Some(mut ev) = self.queue.alloc() {
            ev.kind = EventType::SetPlayAudioRange;
            ev.action = EventAction::Add;
            ev.action_sample = SessionEvent::IMMEDIATE;
            ev.audio_range = ranges.to_vec();
            self.queue.queue_event(ev);
        }
    }

    pub fn cancel_play_range(&self) {
        self.queue.queue(
            EventType::CancelPlayAudioRange,
            EventAction::Add,
            SessionEvent::IMMEDIATE,
            0,
            0.0,
        );
    }

    /// Enable or disable the play loop over `range`.
    pub fn request_play_loop(&self, range: Option<SampleRange>) {
        if let Some(mut ev) = self.queue.alloc() {
            ev.kind = EventType::SetLoop;
            ev.action = EventAction::Add;
            ev.action_sample = SessionEvent::IMMEDIATE;
            match range {
                Some(r) => {
                    ev.yes_or_no = true;
                    ev.target_sample = r.start;
                    ev.target2_sample = r.end;
                }
                None => ev.yes_or_no = false,
            }
            self.queue.queue_event(ev);
        }
    }

    /// Global record arm.
    pub fn set_record_enabled(&self, yn: bool) {
        self.query.record_armed.store(yn, Ordering::Release);
    }

    pub fn set_transport_master(&self, master: Arc<dyn TransportMaster>) {
        if let Some(mut ev) = self.queue.alloc() {
            ev.kind = EventType::SetTransportMaster;
            ev.action = EventAction::Add;
            ev.action_sample = SessionEvent::IMMEDIATE;
            ev.transport_master = Some(master);
            self.queue.queue_event(ev);
        }
    }

    /// Run a closure on the audio thread; the returned receiver fires
    /// once it has run.
    pub fn run_rt(&self, slot: impl FnOnce() + Send + 'static) -> crossbeam_channel::Receiver<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if let Some(mut ev) = self.queue.alloc() {
            ev.kind = EventType::RealTimeOperation;
            ev.action = EventAction::Add;
            ev.action_sample = SessionEvent::IMMEDIATE;
            ev.rt_slot = Some(Box::new(slot));
            ev.rt_return = Some(tx);
            self.queue.queue_event(ev);
        }
        rx
    }

    pub fn goto_start(&self) {
        self.request_locate(0, false);
    }

    pub fn goto_end(&self) {
        let end = self.query.session_end.load(Ordering::Acquire);
        self.request_locate(end, false);
    }

    pub fn add_marker(&self, pos: SamplePos) {
        self.query.markers.lock().push(pos);
    }

    pub fn markers(&self) -> Vec<SamplePos> {
        self.query.markers.lock().clone()
    }

    /// Persist a lightweight snapshot of the session under the sound
    /// directory. Full project serialization lives outside the core.
    pub fn save_state(&self, name: &str) -> std::io::Result<PathBuf> {
        #[derive(Serialize)]
        struct Snapshot {
            name: String,
            transport_sample: SamplePos,
            record_armed: bool,
            markers: Vec<SamplePos>,
            source_count: usize,
        }

        let snapshot = Snapshot {
            name: name.to_owned(),
            transport_sample: self.current_sample(),
            record_armed: self.record_enabled(),
            markers: self.markers(),
            source_count: self.store.source_count(),
        };

        let path = self.sound_dir.join(format!("{name}.snapshot.json"));
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "session snapshot saved");
        Ok(path)
    }

    // ----- polls -----

    pub fn current_sample(&self) -> SamplePos {
        self.query.transport_sample.load(Ordering::Acquire)
    }

    pub fn speed(&self) -> f64 {
        self.query.speed.get()
    }

    pub fn rolling(&self) -> bool {
        self.query.motion.load(Ordering::Acquire) == 1
    }

    pub fn stopped(&self) -> bool {
        self.query.motion.load(Ordering::Acquire) == 0
    }

    pub fn locating(&self) -> bool {
        self.query.motion.load(Ordering::Acquire) == 3
    }

    pub fn record_enabled(&self) -> bool {
        self.query.record_armed.load(Ordering::Acquire)
    }

    pub fn dropped_events(&self) -> u64 {
        self.queue.dropped_events()
    }
}
