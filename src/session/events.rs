//! Session event dispatch: where queued events become transport and
//! disk actions.

use super::Session;
use crate::signals::SessionSignal;
use tapedeck_core::{
    EventAction, EventType, SampleRange, SessionEvent, TransportEvent,
};
use tapedeck_disk::{ButlerRequest, Diskstream};
use tracing::debug;

impl Session {
    /// Run one session event on the audio thread. The event is recycled
    /// afterwards; an error inside a handler is logged, never unwound.
    pub(crate) fn process_event(&mut self, mut ev: Box<SessionEvent>) {
        debug!(kind = ?ev.kind, at = ev.action_sample, "processing session event");

        match ev.kind {
            EventType::SetTransportSpeed => {
                self.request_speed_now(ev.speed);
            }

            EventType::Locate => {
                self.fsm.enqueue(
                    &mut self.ctx,
                    TransportEvent::locate(ev.target_sample, ev.yes_or_no, true, false, ev.second_yes_or_no),
                );
            }

            EventType::LocateRoll => {
                self.fsm.enqueue(
                    &mut self.ctx,
                    TransportEvent::locate(ev.target_sample, true, true, false, ev.second_yes_or_no),
                );
            }

            EventType::SetLoop => {
                self.set_play_loop(ev.yes_or_no, ev.target_sample, ev.target2_sample);
            }

            EventType::PunchIn => {
                self.punch_gate = true;
                self.punch_open_sample = Some(ev.action_sample);
            }

            EventType::PunchOut => {
                self.punch_gate = false;
                self.punch_close_sample = Some(ev.action_sample);
            }

            EventType::RangeStop => {
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::stop_transport(false, false));
                self.play_ranges.clear();
            }

            EventType::RangeLocate => {
                self.fsm.enqueue(
                    &mut self.ctx,
                    TransportEvent::locate(ev.target_sample, true, true, false, false),
                );
            }

            EventType::Overwrite => {
                if let Some(stream) = ev.track {
                    self.ctx.butler.request(ButlerRequest::Overwrite(stream));
                }
            }

            EventType::AutoLoop => {
                self.handle_loop_end();
            }

            EventType::RealTimeOperation => {
                if let Some(slot) = ev.rt_slot.take() {
                    slot();
                }
                if let Some(tx) = ev.rt_return.take() {
                    let _ = tx.try_send(());
                }
            }

            EventType::AdjustPlaybackBuffering => {
                self.ctx
                    .butler
                    .request(ButlerRequest::AdjustPlaybackBuffering(ev.target_sample as usize));
            }

            EventType::AdjustCaptureBuffering => {
                self.ctx
                    .butler
                    .request(ButlerRequest::AdjustCaptureBuffering(ev.target_sample as usize));
            }

            EventType::StartRoll => {
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::start_transport());
            }

            EventType::EndRoll => {
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::stop_transport(ev.yes_or_no, false));
            }

            EventType::TransportStateChange => {
                self.signals
                    .emit(SessionSignal::TransportStateChanged(self.fsm.motion_state()));
            }

            EventType::SetTransportMaster => {
                self.master = ev.transport_master.take();
            }

            EventType::Audition => {
                if let Some(region) = ev.region {
                    self.signals.emit(SessionSignal::AuditionRequested(region));
                }
            }

            EventType::Skip => {
                self.fsm.enqueue(
                    &mut self.ctx,
                    TransportEvent::locate(ev.target_sample, self.fsm.rolling(), true, false, false),
                );
            }

            EventType::SetTimecodeTransmission => {
                self.timecode_tx = ev.yes_or_no;
            }

            EventType::SetPlayAudioRange => {
                let ranges: Vec<SampleRange> = ev.audio_range.clone();
                self.start_play_range(&ranges);
            }

            EventType::CancelPlayAudioRange => {
                self.cancel_play_range();
            }

            EventType::SyncCues => {
                self.signals.emit(SessionSignal::CuesSynced);
            }
        }

        self.post_transport_step();
        self.evmgr.release(ev);
    }

    /// Speed request: zero stops, nonzero starts or adjusts.
    pub(crate) fn request_speed_now(&mut self, speed: f64) {
        if speed == 0.0 {
            if !self.fsm.stopped() {
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::stop_transport(false, false));
            }
        } else if self.fsm.stopped() {
            self.ctx.default_speed = speed;
            self.fsm
                .enqueue(&mut self.ctx, TransportEvent::start_transport());
            self.apply_speed_to_streams(speed);
        } else {
            self.fsm
                .enqueue(&mut self.ctx, TransportEvent::set_speed(speed));
            self.apply_speed_to_streams(self.ctx.speed);
        }
    }

    pub(crate) fn apply_speed_to_streams(&mut self, speed: f64) {
        for track in &self.tracks {
            if let Some(mut entry) = self.streams.get_mut(&track.stream) {
                if let Diskstream::Audio(ds) = &mut *entry {
                    if ds.realtime_set_speed(speed, true) {
                        // Butler grows the wrap buffer off the RT path.
                        self.ctx.butler.summon();
                    }
                }
            }
        }
    }

    fn set_play_loop(&mut self, enabled: bool, start: i64, end: i64) {
        if !enabled || start >= end {
            self.loop_enabled = false;
            self.loop_range = None;
            self.evmgr.clear_event_type(EventType::AutoLoop);
            for track in &self.tracks {
                if let Some(mut entry) = self.streams.get_mut(&track.stream) {
                    match &mut *entry {
                        Diskstream::Audio(ds) => {
                            let _ = ds.set_loop(None);
                        }
                        Diskstream::Midi(ds) => {
                            let _ = ds.set_loop(None);
                        }
                    }
                }
            }
            return;
        }

        let range = SampleRange::new(start, end);
        self.loop_range = Some(range);
        self.loop_enabled = true;
        let transport = self.ctx.transport_sample;
        for track in &self.tracks {
            if let Some(mut entry) = self.streams.get_mut(&track.stream) {
                match &mut *entry {
                    Diskstream::Audio(ds) => {
                        let _ = ds.set_loop(Some(range));
                        // Rings may hold material past the loop end;
                        // rebuild them loop-aware from here.
                        ds.seek(transport);
                    }
                    Diskstream::Midi(ds) => {
                        let _ = ds.set_loop(Some(range));
                        ds.seek(transport);
                    }
                }
            }
        }
        self.ctx.butler.summon();
        self.schedule_auto_loop(range);
    }

    /// Queue (or refresh) the loop-return event at the loop end.
    pub(crate) fn schedule_auto_loop(&mut self, range: SampleRange) {
        let queue = self.evmgr.queue();
        if let Some(mut ev) = queue.alloc() {
            ev.kind = EventType::AutoLoop;
            ev.action = EventAction::Add;
            ev.action_sample = range.end;
            ev.target_sample = range.start;
            self.evmgr.insert_now(ev, self.ctx.transport_sample);
        }
    }

    /// The transport is about to cross the loop end within this cycle.
    ///
    /// When the rings already hold the post-wrap material the actual
    /// rewrap happens in the advance step with no butler involvement;
    /// otherwise the transport relocates to the loop start the ordinary
    /// (butler-assisted) way.
    fn handle_loop_end(&mut self) {
        let Some(range) = self.loop_range else {
            return;
        };
        if !self.loop_enabled {
            return;
        }

        if !self.loop_is_seamless(self.config.block_size) {
            self.fsm.enqueue(
                &mut self.ctx,
                TransportEvent::locate(range.start, true, true, true, false),
            );
        }

        self.schedule_auto_loop(range);
    }

    /// True when every audio stream has enough buffered material to
    /// play through the loop boundary without a butler wake.
    pub(crate) fn loop_is_seamless(&self, nframes: usize) -> bool {
        self.tracks.iter().all(|track| {
            self.streams
                .get(&track.stream)
                .map(|entry| match &*entry {
                    Diskstream::Audio(ds) => ds.can_internal_playback_seek(nframes as i64),
                    Diskstream::Midi(_) => true,
                })
                .unwrap_or(true)
        })
    }

    /// Begin playing a list of ranges: locate to the first, schedule
    /// the hops between them and the final stop.
    fn start_play_range(&mut self, ranges: &[SampleRange]) {
        self.evmgr.clear_event_type(EventType::RangeLocate);
        self.evmgr.clear_event_type(EventType::RangeStop);
        self.play_ranges = ranges.to_vec();

        let Some(first) = ranges.first().copied() else {
            return;
        };

        let queue = self.evmgr.queue();
        for pair in ranges.windows(2) {
            if let Some(mut ev) = queue.alloc() {
                ev.kind = EventType::RangeLocate;
                ev.action = EventAction::Add;
                ev.action_sample = pair[0].end;
                ev.target_sample = pair[1].start;
                self.evmgr.insert_now(ev, self.ctx.transport_sample);
            }
        }
        let last = ranges.last().copied().unwrap_or(first);
        if let Some(mut ev) = queue.alloc() {
            ev.kind = EventType::RangeStop;
            ev.action = EventAction::Add;
            ev.action_sample = last.end;
            self.evmgr.insert_now(ev, self.ctx.transport_sample);
        }

        self.fsm.enqueue(
            &mut self.ctx,
            TransportEvent::locate(first.start, true, true, false, false),
        );
    }

    fn cancel_play_range(&mut self) {
        self.play_ranges.clear();
        self.evmgr.clear_event_type(EventType::RangeLocate);
        self.evmgr.clear_event_type(EventType::RangeStop);
    }
}
