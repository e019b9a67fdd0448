//! The butler: a single background thread doing disk work on behalf of
//! every diskstream.
//!
//! The audio thread never touches disk; it wakes the butler through a
//! request channel and the butler reports transport work completions
//! back over a second channel, which the session feeds to the transport
//! FSM as `ButlerDone` on the next cycle.

use crate::diskstream::{AudioDiskstream, MidiDiskstream};
use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tapedeck_core::{DiskstreamId, SamplePos};
use thread_priority::ThreadPriority;
use tracing::{debug, warn};

/// Either flavor of diskstream, as held in the registry.
pub enum Diskstream {
    Audio(AudioDiskstream),
    Midi(MidiDiskstream),
}

impl Diskstream {
    pub fn id(&self) -> DiskstreamId {
        match self {
            Diskstream::Audio(ds) => ds.id(),
            Diskstream::Midi(ds) => ds.id(),
        }
    }

    pub fn do_refill(&mut self) -> Result<bool> {
        match self {
            Diskstream::Audio(ds) => ds.do_refill(),
            Diskstream::Midi(ds) => ds.do_refill(),
        }
    }

    pub fn do_flush(&mut self, force: bool) -> Result<bool> {
        match self {
            Diskstream::Audio(ds) => ds.do_flush(force),
            Diskstream::Midi(ds) => ds.do_flush(force),
        }
    }

    pub fn transport_stopped(&mut self, abort: bool) -> Result<()> {
        match self {
            Diskstream::Audio(ds) => ds.transport_stopped(abort),
            Diskstream::Midi(ds) => ds.transport_stopped(abort),
        }
    }

    pub fn seek(&mut self, sample: SamplePos) {
        match self {
            Diskstream::Audio(ds) => ds.seek(sample),
            Diskstream::Midi(ds) => ds.seek(sample),
        }
    }

    pub fn non_realtime_work(&mut self) {
        if let Diskstream::Audio(ds) = self {
            ds.non_realtime_set_speed();
        }
    }

    pub fn as_audio(&self) -> Option<&AudioDiskstream> {
        match self {
            Diskstream::Audio(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn as_audio_mut(&mut self) -> Option<&mut AudioDiskstream> {
        match self {
            Diskstream::Audio(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn as_midi_mut(&mut self) -> Option<&mut MidiDiskstream> {
        match self {
            Diskstream::Midi(ds) => Some(ds),
            _ => None,
        }
    }
}

/// Shared registry of diskstreams, keyed by id. Both the audio thread
/// and the butler take brief exclusive entry locks.
pub type DiskstreamRegistry = Arc<DashMap<DiskstreamId, Diskstream>>;

/// Requests the butler accepts.
#[derive(Debug, Clone, Copy)]
pub enum ButlerRequest {
    /// Generic wake: run a refill/flush pass.
    Run,
    /// Transport-related work; completion is reported back.
    TransportWork {
        stopped: bool,
        abort: bool,
        locate: Option<SamplePos>,
        with_flush: bool,
    },
    /// Rebuffer one stream after a playlist change.
    Overwrite(DiskstreamId),
    /// Resize playback rings, frames per channel.
    AdjustPlaybackBuffering(usize),
    /// Resize capture rings, frames per channel.
    AdjustCaptureBuffering(usize),
    Shutdown,
}

/// Sent back when a `TransportWork` request has fully completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportWorkDone;

pub struct Butler {
    request_tx: Sender<ButlerRequest>,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Butler {
    /// Spawn the butler over a stream registry. `done_tx` receives one
    /// message per completed transport work request.
    pub fn start(streams: DiskstreamRegistry, done_tx: Sender<TransportWorkDone>) -> Butler {
        let (request_tx, request_rx) = bounded(256);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let thread = std::thread::Builder::new()
            .name("tapedeck-butler".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                butler_loop(request_rx, streams, done_tx, shutdown_flag);
            })
            .expect("failed to spawn butler thread");

        Butler {
            request_tx,
            thread: Some(thread),
            shutdown,
        }
    }

    /// Wake the butler for an ordinary refill/flush pass.
    pub fn summon(&self) {
        let _ = self.request_tx.try_send(ButlerRequest::Run);
    }

    pub fn request(&self, req: ButlerRequest) {
        if self.request_tx.try_send(req).is_err() {
            warn!("butler request queue full, dropping {req:?}");
        }
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.request_tx.send(ButlerRequest::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Butler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn butler_loop(
    request_rx: Receiver<ButlerRequest>,
    streams: DiskstreamRegistry,
    done_tx: Sender<TransportWorkDone>,
    shutdown: Arc<AtomicBool>,
) {
    // When a pass reports pending work we poll instead of sleeping.
    let mut work_pending = false;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            final_flush(&streams);
            break;
        }

        let request = if work_pending {
            request_rx.try_recv().ok()
        } else {
            match request_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(req) => Some(req),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => {
                    final_flush(&streams);
                    return;
                }
            }
        };

        match request {
            Some(ButlerRequest::Shutdown) => {
                final_flush(&streams);
                break;
            }
            Some(ButlerRequest::TransportWork {
                stopped,
                abort,
                locate,
                with_flush,
            }) => {
                do_transport_work(&streams, stopped, abort, locate, with_flush);
                work_pending = run_pass(&streams);
                let _ = done_tx.send(TransportWorkDone);
            }
            Some(ButlerRequest::Overwrite(id)) => {
                if let Some(mut entry) = streams.get_mut(&id) {
                    if let Some(ds) = entry.as_audio_mut() {
                        ds.request_overwrite();
                    }
                    let _ = entry.do_refill();
                }
                work_pending = run_pass(&streams);
            }
            Some(ButlerRequest::AdjustPlaybackBuffering(frames)) => {
                for mut entry in streams.iter_mut() {
                    if let Some(ds) = entry.as_audio_mut() {
                        ds.adjust_playback_buffering(frames);
                    }
                }
                work_pending = run_pass(&streams);
            }
            Some(ButlerRequest::AdjustCaptureBuffering(frames)) => {
                for mut entry in streams.iter_mut() {
                    if let Some(ds) = entry.as_audio_mut() {
                        ds.adjust_capture_buffering(frames);
                    }
                }
                work_pending = run_pass(&streams);
            }
            Some(ButlerRequest::Run) | None => {
                work_pending = run_pass(&streams);
            }
        }
    }
}

/// One refill-and-flush pass over every stream. Returns true when any
/// stream reported more work.
fn run_pass(streams: &DiskstreamRegistry) -> bool {
    let mut pending = false;
    for mut entry in streams.iter_mut() {
        entry.non_realtime_work();
        match entry.do_refill() {
            Ok(more) => pending |= more,
            Err(err) => warn!(stream = %entry.id(), %err, "refill failed"),
        }
        match entry.do_flush(false) {
            Ok(more) => pending |= more,
            Err(err) => warn!(stream = %entry.id(), %err, "flush failed"),
        }
    }
    pending
}

fn do_transport_work(
    streams: &DiskstreamRegistry,
    stopped: bool,
    abort: bool,
    locate: Option<SamplePos>,
    with_flush: bool,
) {
    debug!(stopped, abort, ?locate, with_flush, "butler transport work");

    for mut entry in streams.iter_mut() {
        if stopped {
            if let Err(err) = entry.transport_stopped(abort) {
                warn!(stream = %entry.id(), %err, "capture finalization failed");
            }
        }
        if let Some(target) = locate {
            if with_flush {
                let _ = entry.do_flush(true);
            }
            entry.seek(target);
            let _ = entry.do_refill();
        }
    }
}

fn final_flush(streams: &DiskstreamRegistry) {
    for mut entry in streams.iter_mut() {
        if let Err(err) = entry.do_flush(true) {
            warn!(stream = %entry.id(), %err, "final flush failed");
        }
    }
}
