//! The per-cycle process path, driven by the engine callback.

use super::Session;
use crate::plugin::run_insert_chain;
use crate::signals::SessionSignal;
use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use tapedeck_core::{MotionState, SampleRange, TransportEvent};
use tapedeck_disk::{Diskstream, ProcessContext, TransportWorkDone};

/// Sync drift beyond which the transport relocates instead of nudging
/// speed, in samples.
const CHASE_THRESHOLD: i64 = 4800;

impl Session {
    /// One audio cycle. Called by the backend callback (or a test
    /// harness) with the cycle's frame count.
    ///
    /// The caller fills each track's `input` beforehand and reads each
    /// track's `output` afterwards.
    pub fn process(&mut self, nframes: usize) {
        let nframes = nframes.min(self.config.block_size);

        self.drain_butler_completions();
        self.chase_master();

        let transport = self.ctx.transport_sample;
        self.evmgr.drain_pending(transport);

        // Immediate events run once, ahead of any timed event.
        while let Some(ev) = self.evmgr.take_immediate() {
            self.process_event(ev);
        }

        // Timed events due inside this cycle, in sample order. Drain
        // them all first: a handler may re-schedule its own type at the
        // same sample (loop returns do), which must wait for the next
        // pass, not re-fire now.
        if self.ctx.speed != 0.0 {
            let window = SampleRange::new(
                self.ctx.transport_sample,
                self.ctx.transport_sample + nframes as i64,
            );
            self.evmgr.set_next_event(self.ctx.transport_sample);
            let mut due = Vec::new();
            while let Some(ev) = self.evmgr.pop_due(window) {
                due.push(ev);
            }
            for ev in due {
                self.process_event(ev);
            }
        }

        if self.ctx.speed != 0.0 && !self.fsm.locating() {
            self.run_routes(nframes);
        } else {
            for track in &mut self.tracks {
                for chan in &mut track.output {
                    chan[..nframes].fill(0.0);
                }
                track.midi_output.clear();
            }
        }

        if self.ctx.pump_declick(nframes) {
            self.fsm
                .enqueue(&mut self.ctx, TransportEvent::declick_done());
            self.post_transport_step();
        }

        if self.ctx.speed != 0.0 && !self.fsm.locating() {
            let advance = (nframes as f64 * self.ctx.speed).round() as i64;
            let mut new_pos = (self.ctx.transport_sample + advance).max(0);

            // Seamless loop rewrap: the rings hold the loop contiguously,
            // so only positions move.
            if self.loop_enabled && self.ctx.speed > 0.0 {
                if let Some(range) = self.loop_range {
                    if self.ctx.transport_sample < range.end && new_pos >= range.end {
                        new_pos = range.start + (new_pos - range.end);
                        for track in &self.tracks {
                            if let Some(mut entry) = self.streams.get_mut(&track.stream) {
                                match &mut *entry {
                                    Diskstream::Audio(ds) => ds.loop_wrap(range),
                                    Diskstream::Midi(ds) => ds.loop_wrap(range),
                                }
                            }
                        }
                    }
                }
            }

            self.ctx.transport_sample = new_pos;
        }

        // Punch edges apply to exactly one cycle.
        self.punch_open_sample = None;
        self.punch_close_sample = None;

        self.evmgr.set_next_event(self.ctx.transport_sample);
        self.update_query_state();
    }

    fn run_routes(&mut self, nframes: usize) {
        let order = self.order.load();
        let can_record = self.record_enabled() && (!self.punch_configured || self.punch_gate);
        let cycle = ProcessContext {
            transport_sample: self.ctx.transport_sample,
            nframes,
            speed: self.ctx.speed,
            can_record,
            punch_in: self.punch_configured,
            worst_output_latency: self.worst_output_latency,
            record_window_opens: self.punch_open_sample,
            record_window_closes: self.punch_close_sample,
        };

        let mut want_butler = false;

        // Render the declick ramp once into the leased automation
        // scratch; every track applies the same curve.
        let declicking = self.ctx.declicking();
        if declicking {
            if let Some(tb) = self.thread_buffers.as_mut() {
                tb.ensure_buffers(tapedeck_core::ChanCount::ZERO, nframes);
                for (n, gain) in tb.gain_automation[..nframes].iter_mut().enumerate() {
                    *gain = self.ctx.declick_gain(n);
                }
            }
        }

        for &route in order.iter() {
            let Some(idx) = self.track_index(route) else {
                continue;
            };
            let track = &mut self.tracks[idx];
            let Some(mut entry) = self.streams.get_mut(&track.stream) else {
                continue;
            };

            match &mut *entry {
                Diskstream::Audio(ds) => {
                    let inputs: SmallVec<[&[f32]; 2]> =
                        track.input.iter().map(|c| c.as_slice()).collect();
                    let result = ds.process(&cycle, &inputs, &mut track.output);
                    want_butler |= ds.commit(&result);

                    if ds.take_capture_failed() {
                        self.signals.emit(SessionSignal::CaptureFailed(track.stream));
                    }
                }
                Diskstream::Midi(ds) => {
                    track.midi_output.clear();
                    ds.process(&cycle, &track.midi_input, &mut track.midi_output);
                    want_butler |= ds.commit(&cycle);
                }
            }
            drop(entry);

            run_insert_chain(
                &mut track.inserts,
                &mut track.output,
                nframes,
                &mut track.insert_bypass,
            );

            // Output fade around stop/locate.
            if declicking {
                if let Some(tb) = self.thread_buffers.as_ref() {
                    for chan in &mut track.output {
                        for (sample, gain) in
                            chan[..nframes].iter_mut().zip(&tb.gain_automation[..nframes])
                        {
                            *sample *= gain;
                        }
                    }
                }
            }
        }

        if want_butler {
            self.ctx.butler.summon();
        }
    }

    /// Turn butler completions into FSM events. A completed transport
    /// work unit always yields `ButlerDone`; the last outstanding locate
    /// also yields exactly one `LocateDone` and moves the playhead.
    pub(crate) fn drain_butler_completions(&mut self) {
        while let Ok(TransportWorkDone) = self.butler_done_rx.try_recv() {
            if let Some(target) = self.ctx.complete_butler_work() {
                self.ctx.transport_sample = target;
                self.evmgr.set_next_event(target);
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::locate_done());
            }
            self.fsm
                .enqueue(&mut self.ctx, TransportEvent::butler_done());
            self.post_transport_step();
        }
    }

    /// Follow the configured transport master, falling back to the
    /// internal clock when it degrades.
    fn chase_master(&mut self) {
        let Some(master) = self.master.clone() else {
            return;
        };

        if !master.ok() {
            self.master = None;
            self.signals.emit(SessionSignal::SyncLost);
            return;
        }
        if !master.locked() {
            return;
        }

        let advice = master.speed_and_position();
        if !advice.valid {
            return;
        }

        let drift = advice.position - self.ctx.transport_sample;
        if drift.abs() > CHASE_THRESHOLD {
            self.fsm.enqueue(
                &mut self.ctx,
                TransportEvent::locate(advice.position, advice.speed != 0.0, true, false, false),
            );
        } else if advice.speed != self.ctx.speed {
            if advice.speed == 0.0 {
                if !self.fsm.stopped() {
                    self.fsm
                        .enqueue(&mut self.ctx, TransportEvent::stop_transport(false, false));
                }
            } else if self.fsm.stopped() {
                self.ctx.default_speed = advice.speed;
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::start_transport());
            } else {
                self.fsm
                    .enqueue(&mut self.ctx, TransportEvent::set_speed(advice.speed));
            }
        }
        self.post_transport_step();
    }

    /// Runs after any burst of FSM activity: honor clear-state stops and
    /// ship the batched butler request.
    pub(crate) fn post_transport_step(&mut self) {
        if self.ctx.pending_clear_state {
            self.ctx.pending_clear_state = false;
            self.loop_enabled = false;
            self.evmgr
                .clear_event_type(tapedeck_core::EventType::AutoLoop);
            self.evmgr
                .clear_event_type(tapedeck_core::EventType::RangeLocate);
            self.evmgr
                .clear_event_type(tapedeck_core::EventType::RangeStop);
        }
        self.ctx.flush_butler_requests();
    }

    fn update_query_state(&mut self) {
        self.query
            .transport_sample
            .store(self.ctx.transport_sample, Ordering::Release);
        self.query.speed.set(self.ctx.speed);

        let motion = match self.fsm.motion_state() {
            MotionState::Stopped => 0u8,
            MotionState::Rolling => 1,
            MotionState::DeclickToStop | MotionState::DeclickToLocate => 2,
            MotionState::WaitingForLocate => 3,
        };
        let prev = self.query.motion.swap(motion, Ordering::AcqRel);
        if prev != motion {
            self.signals
                .emit(SessionSignal::TransportStateChanged(self.fsm.motion_state()));
            self.signals
                .emit(SessionSignal::PositionChanged(self.ctx.transport_sample));
        }

        self.internal_clock
            .update(self.ctx.speed, self.ctx.transport_sample);
    }
}
