//! Transport finite state machine.
//!
//! Runs synchronously and single-threaded from the process callback. It
//! can be re-entrant in the sense that handling one event may queue
//! another; queued events are appended and processed at the end of the
//! current step, never recursively. The `processing` counter guards this.

use crate::pool::Pool;
use crate::types::SamplePos;
use std::collections::VecDeque;
use tracing::debug;

/// Motion sub-state of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Stopped,
    Rolling,
    DeclickToStop,
    DeclickToLocate,
    WaitingForLocate,
}

/// Butler cooperation sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButlerState {
    #[default]
    NotWaitingForButler,
    WaitingForButler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEventType {
    ButlerDone,
    ButlerRequired,
    DeclickDone,
    StartTransport,
    StopTransport,
    Locate,
    LocateDone,
    SetSpeed,
}

/// One input to the FSM. All fields are plain values so events can be
/// recycled through a pool without touching the allocator.
#[derive(Debug, Clone, Copy)]
pub struct TransportEvent {
    pub kind: TransportEventType,
    /// For stop: discard captured material.
    pub abort: bool,
    /// For stop: clear pending locate/loop state.
    pub clear_state: bool,
    /// For locate.
    pub target: SamplePos,
    pub with_roll: bool,
    pub with_flush: bool,
    pub with_loop: bool,
    pub force: bool,
    /// For speed changes.
    pub speed: f64,
}

impl TransportEvent {
    fn blank() -> Self {
        Self {
            kind: TransportEventType::ButlerDone,
            abort: false,
            clear_state: false,
            target: 0,
            with_roll: false,
            with_flush: false,
            with_loop: false,
            force: false,
            speed: 0.0,
        }
    }

    pub fn start_transport() -> Self {
        Self {
            kind: TransportEventType::StartTransport,
            ..Self::blank()
        }
    }

    pub fn stop_transport(abort: bool, clear_state: bool) -> Self {
        Self {
            kind: TransportEventType::StopTransport,
            abort,
            clear_state,
            ..Self::blank()
        }
    }

    pub fn locate(
        target: SamplePos,
        with_roll: bool,
        with_flush: bool,
        with_loop: bool,
        force: bool,
    ) -> Self {
        Self {
            kind: TransportEventType::Locate,
            target,
            with_roll,
            with_flush,
            with_loop,
            force,
            ..Self::blank()
        }
    }

    pub fn set_speed(speed: f64) -> Self {
        Self {
            kind: TransportEventType::SetSpeed,
            speed,
            ..Self::blank()
        }
    }

    pub fn butler_done() -> Self {
        Self::blank()
    }

    pub fn butler_required() -> Self {
        Self {
            kind: TransportEventType::ButlerRequired,
            ..Self::blank()
        }
    }

    pub fn declick_done() -> Self {
        Self {
            kind: TransportEventType::DeclickDone,
            ..Self::blank()
        }
    }

    pub fn locate_done() -> Self {
        Self {
            kind: TransportEventType::LocateDone,
            ..Self::blank()
        }
    }
}

/// Saved arguments of the locate we are declicking toward or waiting on.
#[derive(Debug, Clone, Copy, Default)]
struct SavedLocate {
    target: SamplePos,
    with_roll: bool,
    with_flush: bool,
    with_loop: bool,
    force: bool,
    /// Rolling when the locate was requested.
    was_rolling: bool,
    /// A stop arrived while the locate was in flight.
    force_stop: bool,
}

/// The transition actions the FSM asks of its owner.
///
/// The FSM itself never performs disk I/O or touches buffers; it calls
/// out through this trait and the owner reports completions back as
/// events ([`TransportEvent::butler_done`], [`TransportEvent::locate_done`],
/// [`TransportEvent::declick_done`]).
pub trait TransportApi {
    fn start_playback(&mut self);
    fn stop_playback(&mut self, abort: bool, clear_state: bool);

    /// Begin seeking to `target`. Returns true if the locate completed
    /// synchronously (no butler work was needed); otherwise a
    /// `LocateDone` event must follow later.
    fn start_locate(
        &mut self,
        target: SamplePos,
        with_roll: bool,
        with_flush: bool,
        with_loop: bool,
    ) -> bool;

    /// Redirect an in-flight locate to a new target.
    fn interrupt_locate(&mut self, target: SamplePos, with_flush: bool) -> bool;

    /// Wake the butler for transport-related disk work.
    fn schedule_butler_for_transport_work(&mut self);

    /// Begin the output fade. A `DeclickDone` event must follow once the
    /// fade has fully rendered.
    fn start_declick(&mut self, for_locate: bool);

    /// Apply a speed that does not require a declicked restart.
    fn set_transport_speed(&mut self, speed: f64);

    fn current_speed(&self) -> f64;
}

const EVENT_POOL_SIZE: usize = 128;

pub struct TransportFsm {
    motion: MotionState,
    butler: ButlerState,
    saved_locate: Option<SavedLocate>,
    last_stop: (bool, bool),
    /// Speed to apply after a declicked zero-crossing restart.
    pending_speed: Option<f64>,
    queued: VecDeque<Box<TransportEvent>>,
    deferred: Vec<Box<TransportEvent>>,
    processing: u32,
    pool: Pool<TransportEvent>,
}

impl TransportFsm {
    pub fn new() -> Self {
        Self {
            motion: MotionState::Stopped,
            butler: ButlerState::NotWaitingForButler,
            saved_locate: None,
            last_stop: (false, false),
            pending_speed: None,
            queued: VecDeque::with_capacity(EVENT_POOL_SIZE),
            deferred: Vec::with_capacity(EVENT_POOL_SIZE),
            processing: 0,
            pool: Pool::with_capacity("transport-events", EVENT_POOL_SIZE, TransportEvent::blank),
        }
    }

    pub fn motion_state(&self) -> MotionState {
        self.motion
    }

    pub fn butler_state(&self) -> ButlerState {
        self.butler
    }

    pub fn rolling(&self) -> bool {
        self.motion == MotionState::Rolling
    }

    pub fn stopped(&self) -> bool {
        self.motion == MotionState::Stopped
    }

    pub fn locating(&self) -> bool {
        self.motion == MotionState::WaitingForLocate
    }

    pub fn declick_in_progress(&self) -> bool {
        matches!(
            self.motion,
            MotionState::DeclickToStop | MotionState::DeclickToLocate
        )
    }

    pub fn waiting_for_butler(&self) -> bool {
        self.butler == ButlerState::WaitingForButler
    }

    /// Target of the locate in flight, if any.
    pub fn locate_target(&self) -> Option<SamplePos> {
        self.saved_locate.map(|l| l.target)
    }

    /// Submit an event. If the FSM is not already mid-step the event is
    /// processed now, together with anything it queues in turn.
    pub fn enqueue(&mut self, api: &mut dyn TransportApi, ev: TransportEvent) {
        let Some(mut slot) = self.pool.alloc() else {
            debug!(kind = ?ev.kind, "transport event pool exhausted, dropping");
            return;
        };
        *slot = ev;
        self.queued.push_back(slot);
        if self.processing == 0 {
            self.process_events(api);
        }
    }

    fn process_events(&mut self, api: &mut dyn TransportApi) {
        self.processing += 1;
        while let Some(ev) = self.queued.pop_front() {
            self.process_event(api, ev);
        }
        self.processing -= 1;
    }

    fn queue_internal(&mut self, ev: TransportEvent) {
        if let Some(mut slot) = self.pool.alloc() {
            *slot = ev;
            self.queued.push_back(slot);
        }
    }

    fn defer(&mut self, ev: Box<TransportEvent>) {
        debug!(kind = ?ev.kind, motion = ?self.motion, "deferring transport event");
        self.deferred.push(ev);
    }

    /// Change motion state and re-offer anything deferred.
    fn transition_motion(&mut self, next: MotionState) {
        if self.motion == next {
            return;
        }
        debug!(from = ?self.motion, to = ?next, "transport motion");
        self.motion = next;
        // Deferred events go ahead of anything queued later.
        for ev in self.deferred.drain(..).rev() {
            self.queued.push_front(ev);
        }
    }

    fn schedule_butler(&mut self, api: &mut dyn TransportApi) {
        api.schedule_butler_for_transport_work();
        self.butler = ButlerState::WaitingForButler;
    }

    fn should_roll_after_locate(&self) -> bool {
        match self.saved_locate {
            Some(l) => l.with_roll || (l.was_rolling && !l.force_stop),
            None => false,
        }
    }

    fn begin_locate(&mut self, api: &mut dyn TransportApi, saved: SavedLocate) {
        self.saved_locate = Some(saved);
        self.transition_motion(MotionState::WaitingForLocate);
        self.schedule_butler(api);
        let done =
            api.start_locate(saved.target, saved.with_roll, saved.with_flush, saved.with_loop);
        if done {
            self.queue_internal(TransportEvent::locate_done());
        }
    }

    fn process_event(&mut self, api: &mut dyn TransportApi, ev: Box<TransportEvent>) {
        use TransportEventType::*;

        match ev.kind {
            ButlerDone => {
                self.butler = ButlerState::NotWaitingForButler;
            }

            ButlerRequired => {
                self.schedule_butler(api);
            }

            StartTransport => match self.motion {
                MotionState::Stopped => {
                    api.start_playback();
                    self.transition_motion(MotionState::Rolling);
                    self.schedule_butler(api);
                }
                MotionState::Rolling => {}
                MotionState::DeclickToStop => {
                    // A stop is in flight; start again once it lands.
                    self.defer(ev);
                    return;
                }
                MotionState::DeclickToLocate | MotionState::WaitingForLocate => {
                    // The locate will finish first; make sure we roll after.
                    if let Some(l) = self.saved_locate.as_mut() {
                        l.with_roll = true;
                        l.force_stop = false;
                    }
                }
            },

            StopTransport => match self.motion {
                MotionState::Rolling => {
                    self.last_stop = (ev.abort, ev.clear_state);
                    api.start_declick(false);
                    self.transition_motion(MotionState::DeclickToStop);
                }
                MotionState::Stopped | MotionState::DeclickToStop => {}
                MotionState::DeclickToLocate => {
                    self.defer(ev);
                    return;
                }
                MotionState::WaitingForLocate => {
                    // Come to rest at the locate target instead of rolling.
                    if let Some(l) = self.saved_locate.as_mut() {
                        l.force_stop = true;
                        l.with_roll = false;
                    }
                }
            },

            Locate => match self.motion {
                MotionState::Stopped => {
                    let saved = SavedLocate {
                        target: ev.target,
                        with_roll: ev.with_roll,
                        with_flush: ev.with_flush,
                        with_loop: ev.with_loop,
                        force: ev.force,
                        was_rolling: false,
                        force_stop: false,
                    };
                    self.begin_locate(api, saved);
                }
                MotionState::Rolling => {
                    self.saved_locate = Some(SavedLocate {
                        target: ev.target,
                        with_roll: ev.with_roll,
                        with_flush: ev.with_flush,
                        with_loop: ev.with_loop,
                        force: ev.force,
                        was_rolling: true,
                        force_stop: false,
                    });
                    api.start_declick(true);
                    self.transition_motion(MotionState::DeclickToLocate);
                }
                MotionState::DeclickToLocate => {
                    self.replace_saved_locate(&ev);
                }
                MotionState::WaitingForLocate => {
                    self.interrupt_locate(api, &ev);
                }
                MotionState::DeclickToStop => {
                    self.defer(ev);
                    return;
                }
            },

            DeclickDone => match self.motion {
                MotionState::DeclickToStop => {
                    let (abort, clear_state) = self.last_stop;
                    api.stop_playback(abort, clear_state);
                    self.transition_motion(MotionState::Stopped);
                    self.schedule_butler(api);
                    if let Some(speed) = self.pending_speed.take() {
                        // Zero-crossing restart.
                        api.set_transport_speed(speed);
                        self.queue_internal(TransportEvent::start_transport());
                    }
                }
                MotionState::DeclickToLocate => {
                    let saved = self
                        .saved_locate
                        .take()
                        .unwrap_or_default();
                    self.begin_locate(api, saved);
                }
                _ => {
                    // Stale declick from a superseded stop; ignore.
                }
            },

            LocateDone => match self.motion {
                MotionState::WaitingForLocate => {
                    if self.should_roll_after_locate() {
                        api.start_playback();
                        self.transition_motion(MotionState::Rolling);
                    } else {
                        self.transition_motion(MotionState::Stopped);
                    }
                    self.saved_locate = None;
                }
                _ => {
                    self.bad_transition(&ev);
                }
            },

            SetSpeed => {
                let current = api.current_speed();
                let crossing_zero = self.motion == MotionState::Rolling
                    && (ev.speed == 0.0 || (ev.speed * current) < 0.0);
                if crossing_zero && ev.speed == 0.0 {
                    self.last_stop = (false, false);
                    api.start_declick(false);
                    self.transition_motion(MotionState::DeclickToStop);
                } else if crossing_zero {
                    self.pending_speed = Some(ev.speed);
                    self.last_stop = (false, false);
                    api.start_declick(false);
                    self.transition_motion(MotionState::DeclickToStop);
                } else if self.motion == MotionState::WaitingForLocate && ev.speed * current < 0.0 {
                    self.defer(ev);
                    return;
                } else {
                    api.set_transport_speed(ev.speed);
                }
            }
        }

        self.pool.release(ev);
    }

    /// New locate while one is saved but not yet started: last wins
    /// unless the saved one was forced and the new one is not.
    fn replace_saved_locate(&mut self, ev: &TransportEvent) {
        if let Some(saved) = self.saved_locate {
            if saved.force && !ev.force {
                return;
            }
            self.saved_locate = Some(SavedLocate {
                target: ev.target,
                with_roll: ev.with_roll,
                with_flush: ev.with_flush,
                with_loop: ev.with_loop,
                force: ev.force,
                was_rolling: saved.was_rolling,
                force_stop: saved.force_stop,
            });
        }
    }

    /// New locate while waiting on the butler for a previous one.
    fn interrupt_locate(&mut self, api: &mut dyn TransportApi, ev: &TransportEvent) {
        if let Some(saved) = self.saved_locate {
            // Coalesce an identical, non-forcing request.
            if saved.target == ev.target && !ev.with_flush && !ev.force {
                return;
            }
            if saved.force && !ev.force {
                return;
            }
        }
        self.replace_saved_locate(ev);
        if self.saved_locate.is_none() {
            self.saved_locate = Some(SavedLocate {
                target: ev.target,
                with_roll: ev.with_roll,
                with_flush: ev.with_flush,
                with_loop: ev.with_loop,
                force: ev.force,
                was_rolling: false,
                force_stop: false,
            });
        }
        let done = api.interrupt_locate(ev.target, ev.with_flush);
        if done {
            self.queue_internal(TransportEvent::locate_done());
        }
    }

    fn bad_transition(&self, ev: &TransportEvent) {
        debug!(kind = ?ev.kind, motion = ?self.motion, butler = ?self.butler,
               "event ignored in current state");
    }

    pub fn current_state(&self) -> String {
        format!("{:?}, {:?}", self.motion, self.butler)
    }
}

impl Default for TransportFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records calls and simulates a collaborator that completes locates
    /// only when told to.
    #[derive(Default)]
    struct TestApi {
        playing: bool,
        speed: f64,
        butler_wakes: u32,
        declicks: u32,
        locates: Vec<SamplePos>,
        interrupts: Vec<SamplePos>,
        locate_completes_synchronously: bool,
    }

    impl TransportApi for TestApi {
        fn start_playback(&mut self) {
            self.playing = true;
            if self.speed == 0.0 {
                self.speed = 1.0;
            }
        }

        fn stop_playback(&mut self, _abort: bool, _clear_state: bool) {
            self.playing = false;
            self.speed = 0.0;
        }

        fn start_locate(
            &mut self,
            target: SamplePos,
            _with_roll: bool,
            _with_flush: bool,
            _with_loop: bool,
        ) -> bool {
            self.locates.push(target);
            self.locate_completes_synchronously
        }

        fn interrupt_locate(&mut self, target: SamplePos, _with_flush: bool) -> bool {
            self.interrupts.push(target);
            self.locate_completes_synchronously
        }

        fn schedule_butler_for_transport_work(&mut self) {
            self.butler_wakes += 1;
        }

        fn start_declick(&mut self, _for_locate: bool) {
            self.declicks += 1;
        }

        fn set_transport_speed(&mut self, speed: f64) {
            self.speed = speed;
        }

        fn current_speed(&self) -> f64 {
            self.speed
        }
    }

    #[test]
    fn test_start_stop_cycle() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
        assert_eq!(fsm.butler_state(), ButlerState::WaitingForButler);
        assert!(api.playing);

        fsm.enqueue(&mut api, TransportEvent::butler_done());
        assert_eq!(fsm.butler_state(), ButlerState::NotWaitingForButler);

        fsm.enqueue(&mut api, TransportEvent::stop_transport(false, false));
        assert_eq!(fsm.motion_state(), MotionState::DeclickToStop);
        assert_eq!(api.declicks, 1);
        assert!(api.playing, "playback keeps running through the declick");

        fsm.enqueue(&mut api, TransportEvent::declick_done());
        assert_eq!(fsm.motion_state(), MotionState::Stopped);
        assert_eq!(fsm.butler_state(), ButlerState::WaitingForButler);
        assert!(!api.playing);
    }

    #[test]
    fn test_locate_from_stopped_skips_declick() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::locate(48000, false, true, false, false));
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);
        assert_eq!(api.declicks, 0);
        assert_eq!(api.locates, vec![48000]);

        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Stopped);
    }

    #[test]
    fn test_locate_while_rolling_declicks_then_rolls() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::locate(96000, false, true, false, false));
        assert_eq!(fsm.motion_state(), MotionState::DeclickToLocate);

        fsm.enqueue(&mut api, TransportEvent::declick_done());
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);
        assert_eq!(api.locates, vec![96000]);

        fsm.enqueue(&mut api, TransportEvent::locate_done());
        // Was rolling before the locate, so the transport rolls again.
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
    }

    #[test]
    fn test_interrupted_locate_last_wins() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::locate(480_000, true, true, false, false));
        fsm.enqueue(&mut api, TransportEvent::declick_done());
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);

        // Second locate before LocateDone arrives.
        fsm.enqueue(&mut api, TransportEvent::locate(960_000, true, true, false, false));
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);
        assert_eq!(api.interrupts, vec![960_000]);
        assert_eq!(fsm.locate_target(), Some(960_000));

        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
    }

    #[test]
    fn test_identical_locate_coalesced() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::locate(1000, false, false, false, false));
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);

        fsm.enqueue(&mut api, TransportEvent::locate(1000, false, false, false, false));
        assert!(api.interrupts.is_empty());
    }

    #[test]
    fn test_forced_locate_not_replaced_by_unforced() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::locate(1000, false, false, false, true));
        fsm.enqueue(&mut api, TransportEvent::locate(2000, false, false, false, false));
        assert_eq!(fsm.locate_target(), Some(1000));
    }

    #[test]
    fn test_stop_during_declick_to_locate_is_deferred() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::locate(48000, true, false, false, false));
        assert_eq!(fsm.motion_state(), MotionState::DeclickToLocate);

        fsm.enqueue(&mut api, TransportEvent::stop_transport(false, false));
        // Still declicking toward the locate; the stop waits.
        assert_eq!(fsm.motion_state(), MotionState::DeclickToLocate);

        fsm.enqueue(&mut api, TransportEvent::declick_done());
        // State change re-offers the stop; it lands in WaitingForLocate
        // and cancels roll-after-locate.
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);

        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Stopped);
    }

    #[test]
    fn test_stop_while_waiting_for_locate_cancels_roll() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::locate(48000, true, false, false, false));
        assert_eq!(fsm.motion_state(), MotionState::WaitingForLocate);

        fsm.enqueue(&mut api, TransportEvent::stop_transport(false, false));
        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Stopped);
    }

    #[test]
    fn test_start_while_locating_rolls_after() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::locate(48000, false, false, false, false));
        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
    }

    #[test]
    fn test_set_speed_in_place() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::set_speed(1.5));
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
        assert_eq!(api.speed, 1.5);
        assert_eq!(api.declicks, 0);
    }

    #[test]
    fn test_set_speed_through_zero_declicks_and_restarts() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        assert_eq!(api.speed, 1.0);

        fsm.enqueue(&mut api, TransportEvent::set_speed(-1.0));
        assert_eq!(fsm.motion_state(), MotionState::DeclickToStop);

        fsm.enqueue(&mut api, TransportEvent::declick_done());
        // Restarted in reverse after the declick.
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
        assert_eq!(api.speed, -1.0);
        assert!(api.playing);
    }

    #[test]
    fn test_set_speed_to_zero_is_a_stop() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::set_speed(0.0));
        assert_eq!(fsm.motion_state(), MotionState::DeclickToStop);

        fsm.enqueue(&mut api, TransportEvent::declick_done());
        assert_eq!(fsm.motion_state(), MotionState::Stopped);
        assert!(!api.playing);
    }

    #[test]
    fn test_butler_required_raises_wait() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::butler_required());
        assert_eq!(fsm.butler_state(), ButlerState::WaitingForButler);
        assert_eq!(api.butler_wakes, 1);

        fsm.enqueue(&mut api, TransportEvent::butler_done());
        assert_eq!(fsm.butler_state(), ButlerState::NotWaitingForButler);
    }

    #[test]
    fn test_synchronous_locate_completion() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi {
            locate_completes_synchronously: true,
            ..Default::default()
        };

        // A locate that needs no butler work resolves within the same
        // enqueue step, through the internal queue rather than recursion.
        fsm.enqueue(&mut api, TransportEvent::locate(100, false, false, false, false));
        assert_eq!(fsm.motion_state(), MotionState::Stopped);
        assert_eq!(api.locates, vec![100]);
    }

    #[test]
    fn test_exactly_one_locate_done_for_interrupted_locate() {
        let mut fsm = TransportFsm::new();
        let mut api = TestApi::default();

        fsm.enqueue(&mut api, TransportEvent::start_transport());
        fsm.enqueue(&mut api, TransportEvent::locate(480_000, true, true, false, false));
        fsm.enqueue(&mut api, TransportEvent::declick_done());
        fsm.enqueue(&mut api, TransportEvent::locate(960_000, true, true, false, false));

        // One declick for the first request, one interrupt for the second.
        assert_eq!(api.declicks, 1);
        assert_eq!(api.locates.len(), 1);
        assert_eq!(api.interrupts.len(), 1);

        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
        // A stale LocateDone afterwards is ignored.
        fsm.enqueue(&mut api, TransportEvent::locate_done());
        assert_eq!(fsm.motion_state(), MotionState::Rolling);
    }
}
