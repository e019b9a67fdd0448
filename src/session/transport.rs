//! The session side of the transport FSM: transition actions and butler
//! work batching.

use std::collections::VecDeque;
use tapedeck_core::{SamplePos, TransportApi};
use tapedeck_disk::{Butler, ButlerRequest};
use tracing::debug;

/// Output fade bookkeeping for a declicked stop or locate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeclickRamp {
    pub remaining: usize,
    pub total: usize,
}

/// Butler work accumulated during one FSM step, sent as a single
/// request when the step ends.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct PendingButlerWork {
    pub stopped: bool,
    pub abort: bool,
    pub locate: Option<SamplePos>,
    pub with_flush: bool,
}

impl PendingButlerWork {
    fn take(&mut self) -> PendingButlerWork {
        std::mem::take(self)
    }
}

/// Implements the FSM's transition actions against the rest of the
/// session. Kept separate from [`crate::Session`] so the FSM can borrow
/// it mutably while the session owns both.
pub struct TransportCtx {
    pub(crate) butler: Butler,
    pub(crate) speed: f64,
    /// Speed a start request will roll at.
    pub(crate) default_speed: f64,
    pub(crate) transport_sample: SamplePos,
    pub(crate) declick: Option<DeclickRamp>,
    pub(crate) declick_samples: usize,
    pub(crate) pending_work: PendingButlerWork,
    pub(crate) butler_needed: bool,
    /// One entry per transport work request in flight, in send order;
    /// `Some` carries that request's locate target.
    pub(crate) work_in_flight: VecDeque<Option<SamplePos>>,
    pub(crate) last_locate_target: SamplePos,
    pub(crate) pending_clear_state: bool,
}

impl TransportCtx {
    pub(crate) fn new(butler: Butler, declick_samples: usize) -> Self {
        Self {
            butler,
            speed: 0.0,
            default_speed: 1.0,
            transport_sample: 0,
            declick: None,
            declick_samples,
            pending_work: PendingButlerWork::default(),
            butler_needed: false,
            work_in_flight: VecDeque::new(),
            last_locate_target: 0,
            pending_clear_state: false,
        }
    }

    /// Send the batched butler request accumulated during an FSM step.
    /// Returns true if a request carrying a locate went out.
    pub(crate) fn flush_butler_requests(&mut self) -> bool {
        if !self.butler_needed {
            return false;
        }
        self.butler_needed = false;
        let work = self.pending_work.take();
        let has_locate = work.locate.is_some();
        self.work_in_flight.push_back(work.locate);
        self.butler.request(ButlerRequest::TransportWork {
            stopped: work.stopped,
            abort: work.abort,
            locate: work.locate,
            with_flush: work.with_flush,
        });
        has_locate
    }

    /// Account one butler completion. Returns `Some(target)` when it was
    /// the final outstanding locate, i.e. the moment the playhead lands.
    pub(crate) fn complete_butler_work(&mut self) -> Option<SamplePos> {
        let completed = self.work_in_flight.pop_front().flatten();
        if completed.is_some() && !self.work_in_flight.iter().any(|w| w.is_some()) {
            // Later locates supersede earlier ones; land on the last
            // requested target.
            Some(self.last_locate_target)
        } else {
            None
        }
    }

    /// Current declick gain for `offset` samples into this cycle's ramp.
    pub(crate) fn declick_gain(&self, offset: usize) -> f32 {
        match self.declick {
            Some(ramp) => {
                let done = ramp.total - ramp.remaining + offset.min(ramp.remaining);
                1.0 - (done as f32 / ramp.total as f32).min(1.0)
            }
            None => 1.0,
        }
    }

    /// Advance the declick by `nframes`. Returns true when the fade has
    /// fully rendered and `DeclickDone` should be delivered.
    pub(crate) fn pump_declick(&mut self, nframes: usize) -> bool {
        match self.declick.as_mut() {
            Some(ramp) => {
                ramp.remaining = ramp.remaining.saturating_sub(nframes);
                if ramp.remaining == 0 {
                    self.declick = None;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    pub(crate) fn declicking(&self) -> bool {
        self.declick.is_some()
    }
}

impl TransportApi for TransportCtx {
    fn start_playback(&mut self) {
        self.speed = if self.default_speed == 0.0 {
            1.0
        } else {
            self.default_speed
        };
        self.declick = None;
        debug!(speed = self.speed, "playback started");
    }

    fn stop_playback(&mut self, abort: bool, clear_state: bool) {
        self.speed = 0.0;
        self.pending_work.stopped = true;
        self.pending_work.abort |= abort;
        if clear_state {
            self.pending_clear_state = true;
        }
        debug!(abort, clear_state, "playback stopped");
    }

    fn start_locate(
        &mut self,
        target: SamplePos,
        _with_roll: bool,
        with_flush: bool,
        _with_loop: bool,
    ) -> bool {
        self.pending_work.locate = Some(target);
        self.pending_work.with_flush |= with_flush;
        self.last_locate_target = target;
        self.butler_needed = true;
        // Completion arrives from the butler.
        false
    }

    fn interrupt_locate(&mut self, target: SamplePos, with_flush: bool) -> bool {
        self.pending_work.locate = Some(target);
        self.pending_work.with_flush |= with_flush;
        self.last_locate_target = target;
        self.butler_needed = true;
        false
    }

    fn schedule_butler_for_transport_work(&mut self) {
        self.butler_needed = true;
    }

    fn start_declick(&mut self, for_locate: bool) {
        debug!(for_locate, samples = self.declick_samples, "declick started");
        self.declick = Some(DeclickRamp {
            remaining: self.declick_samples.max(1),
            total: self.declick_samples.max(1),
        });
    }

    fn set_transport_speed(&mut self, speed: f64) {
        self.default_speed = speed;
        if self.speed != 0.0 {
            self.speed = speed;
        }
    }

    fn current_speed(&self) -> f64 {
        if self.speed != 0.0 {
            self.speed
        } else {
            self.default_speed
        }
    }
}
