//! The session: owner of every subsystem and driver of the process
//! cycle.

mod events;
mod process;
mod transport;

pub use transport::TransportCtx;

use crate::control::{SessionHandle, TransportQueryState};
use crate::signals::{SessionSignal, SignalBus};
use crate::track::Track;
use crossbeam_channel::Receiver;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tapedeck_analysis::Analyser;
use tapedeck_core::{
    BufferManager, ChanCount, DagEdges, DiskstreamId, EngineConfig, ProcessOrder, RouteId,
    SampleRange, SessionEventManager, SortKey, ThreadBuffers, TransportFsm, TransportMaster,
};
use tapedeck_disk::{
    AudioDiskstream, Butler, DiskConfig, Diskstream, DiskstreamFlags, DiskstreamRegistry,
    MidiDiskstream, TransportWorkDone,
};
use tapedeck_disk::store::AudioStore;
use tracing::info;

/// Everything needed to bring a session up.
pub struct SessionConfig {
    pub engine: EngineConfig,
    pub disk: DiskConfig,
    /// Directory receiving capture files.
    pub sound_dir: PathBuf,
    pub worst_output_latency: i64,
}

impl SessionConfig {
    pub fn new(sound_dir: PathBuf) -> Self {
        Self {
            engine: EngineConfig::default(),
            disk: DiskConfig::default(),
            sound_dir,
            worst_output_latency: 0,
        }
    }
}

pub struct Session {
    pub(crate) config: EngineConfig,
    pub(crate) disk_config: DiskConfig,
    pub(crate) sound_dir: PathBuf,
    pub(crate) worst_output_latency: i64,

    pub(crate) store: Arc<AudioStore>,
    pub(crate) streams: DiskstreamRegistry,
    pub(crate) tracks: Vec<Track>,

    pub(crate) edges: DagEdges,
    pub(crate) order: ProcessOrder,

    pub(crate) buffers: Arc<BufferManager>,
    pub(crate) thread_buffers: Option<ThreadBuffers>,

    pub(crate) evmgr: SessionEventManager,
    pub(crate) fsm: TransportFsm,
    pub(crate) ctx: TransportCtx,
    pub(crate) butler_done_rx: Receiver<TransportWorkDone>,

    pub(crate) signals: Arc<SignalBus>,
    pub(crate) analyser: Arc<Analyser>,
    pub(crate) master: Option<Arc<dyn TransportMaster>>,
    pub(crate) internal_clock: Arc<tapedeck_core::InternalClock>,

    pub(crate) query: Arc<TransportQueryState>,

    // Punch / loop / range-play state, mutated by session events.
    pub(crate) punch_configured: bool,
    pub(crate) punch_gate: bool,
    /// Exact punch edge samples fired inside the current cycle.
    pub(crate) punch_open_sample: Option<tapedeck_core::SamplePos>,
    pub(crate) punch_close_sample: Option<tapedeck_core::SamplePos>,
    pub(crate) loop_range: Option<SampleRange>,
    pub(crate) loop_enabled: bool,
    pub(crate) play_ranges: Vec<SampleRange>,
    pub(crate) timecode_tx: bool,

    next_route: u64,
    next_stream: u64,
}

impl Session {
    pub fn new(config: SessionConfig) -> crate::Result<Session> {
        config.engine.validate()?;
        std::fs::create_dir_all(&config.sound_dir)?;

        let store = Arc::new(AudioStore::new());
        let streams: DiskstreamRegistry = Arc::new(DashMap::new());
        let signals = Arc::new(SignalBus::new());

        let (done_tx, butler_done_rx) = crossbeam_channel::bounded(64);
        let butler = Butler::start(Arc::clone(&streams), done_tx);

        let analyser = Analyser::new();
        analyser.start();

        let buffers = Arc::new(BufferManager::new(config.engine.worker_threads));
        buffers.ensure_buffers(ChanCount::new(2, 1), config.engine.block_size);
        let thread_buffers = buffers.get_thread_buffers();

        let ctx = TransportCtx::new(butler, config.engine.declick_samples);

        info!(
            sample_rate = config.engine.sample_rate,
            block = config.engine.block_size,
            "session up"
        );

        Ok(Session {
            config: config.engine,
            disk_config: config.disk,
            sound_dir: config.sound_dir,
            worst_output_latency: config.worst_output_latency,
            store,
            streams,
            tracks: Vec::new(),
            edges: DagEdges::new(),
            order: ProcessOrder::new(),
            buffers,
            thread_buffers,
            evmgr: SessionEventManager::new(512, 1024),
            fsm: TransportFsm::new(),
            ctx,
            butler_done_rx,
            signals: Arc::clone(&signals),
            analyser,
            master: None,
            internal_clock: Arc::new(tapedeck_core::InternalClock::new()),
            query: Arc::new(TransportQueryState::new()),
            punch_configured: false,
            punch_gate: false,
            punch_open_sample: None,
            punch_close_sample: None,
            loop_range: None,
            loop_enabled: false,
            play_ranges: Vec::new(),
            timecode_tx: false,
            next_route: 1,
            next_stream: 1,
        })
    }

    pub fn store(&self) -> &Arc<AudioStore> {
        &self.store
    }

    pub fn signals(&self) -> &Arc<SignalBus> {
        &self.signals
    }

    pub fn analyser(&self) -> &Arc<Analyser> {
        &self.analyser
    }

    /// Non-RT control surface for this session.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle::new(
            self.evmgr.queue(),
            Arc::clone(&self.query),
            Arc::clone(&self.store),
            self.sound_dir.clone(),
        )
    }

    /// Add an audio track: one route plus one recordable diskstream.
    pub fn add_audio_track(&mut self, name: &str, n_channels: usize) -> crate::Result<RouteId> {
        let route = RouteId(self.next_route);
        self.next_route += 1;
        let stream_id = DiskstreamId(self.next_stream);
        self.next_stream += 1;

        let playlist = self.store.create_playlist(name);
        let ds = AudioDiskstream::new(
            stream_id,
            name,
            n_channels,
            DiskstreamFlags::RECORDABLE,
            Arc::clone(&self.store),
            playlist,
            self.sound_dir.clone(),
            self.config.sample_rate,
            self.disk_config,
        )?;
        let rec_flag = ds.record_enable_flag();
        self.streams.insert(stream_id, Diskstream::Audio(ds));

        let order_key = self.tracks.len() as u32;
        self.tracks.push(Track::new(
            route,
            stream_id,
            name,
            order_key,
            n_channels,
            self.config.block_size,
            rec_flag,
        ));

        self.buffers
            .ensure_buffers(ChanCount::new(n_channels, 0), self.config.block_size);
        self.rebuild_process_order();
        Ok(route)
    }

    /// Add a tape-mode audio track with a destructive write source.
    pub fn add_tape_track(&mut self, name: &str, n_channels: usize) -> crate::Result<RouteId> {
        let route = RouteId(self.next_route);
        self.next_route += 1;
        let stream_id = DiskstreamId(self.next_stream);
        self.next_stream += 1;

        let playlist = self.store.create_playlist(name);
        let ds = AudioDiskstream::new(
            stream_id,
            name,
            n_channels,
            DiskstreamFlags::RECORDABLE | DiskstreamFlags::DESTRUCTIVE,
            Arc::clone(&self.store),
            playlist,
            self.sound_dir.clone(),
            self.config.sample_rate,
            self.disk_config,
        )?;
        let rec_flag = ds.record_enable_flag();
        self.streams.insert(stream_id, Diskstream::Audio(ds));

        let order_key = self.tracks.len() as u32;
        self.tracks.push(Track::new(
            route,
            stream_id,
            name,
            order_key,
            n_channels,
            self.config.block_size,
            rec_flag,
        ));
        self.rebuild_process_order();
        Ok(route)
    }

    /// Add a MIDI track.
    pub fn add_midi_track(&mut self, name: &str) -> RouteId {
        let route = RouteId(self.next_route);
        self.next_route += 1;
        let stream_id = DiskstreamId(self.next_stream);
        self.next_stream += 1;

        let ds = MidiDiskstream::new(
            stream_id,
            name,
            DiskstreamFlags::RECORDABLE,
            Arc::clone(&self.store),
            self.disk_config,
        );
        let rec_flag = ds.record_enable_flag();
        self.streams.insert(stream_id, Diskstream::Midi(ds));

        let order_key = self.tracks.len() as u32;
        self.tracks.push(Track::new(
            route,
            stream_id,
            name,
            order_key,
            0,
            self.config.block_size,
            rec_flag,
        ));
        self.rebuild_process_order();
        route
    }

    pub fn track(&self, route: RouteId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.route == route)
    }

    pub fn track_mut(&mut self, route: RouteId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.route == route)
    }

    pub(crate) fn track_index(&self, route: RouteId) -> Option<usize> {
        self.tracks.iter().position(|t| t.route == route)
    }

    /// Describe a track's input connection. Physical inputs imply
    /// existing-material alignment; the input latency becomes the
    /// capture offset.
    pub fn configure_track_input(
        &mut self,
        route: RouteId,
        physical: bool,
        input_latency: tapedeck_core::SampleCnt,
    ) {
        if let Some(idx) = self.track_index(route) {
            self.tracks[idx].physical_input = physical;
            let stream = self.tracks[idx].stream;
            if let Some(mut entry) = self.streams.get_mut(&stream) {
                match &mut *entry {
                    Diskstream::Audio(ds) => {
                        ds.set_align_style_from_io(physical);
                        ds.set_capture_offset(input_latency);
                    }
                    Diskstream::Midi(ds) => {
                        ds.set_capture_offset(input_latency);
                    }
                }
            }
        }
    }

    /// Pre-roll applied to a track before a scheduled play start.
    pub fn set_track_roll_delay(&mut self, route: RouteId, delay: tapedeck_core::SampleCnt) {
        if let Some(track) = self.track(route) {
            let stream = track.stream;
            if let Some(mut entry) = self.streams.get_mut(&stream) {
                match &mut *entry {
                    Diskstream::Audio(ds) => ds.set_roll_delay(delay),
                    Diskstream::Midi(ds) => ds.set_roll_delay(delay),
                }
            }
        }
    }

    /// Declare that `from` feeds `to`.
    pub fn connect(&mut self, from: RouteId, to: RouteId) {
        self.edges.add(from, to);
        self.rebuild_process_order();
    }

    pub fn disconnect(&mut self, from: RouteId, to: RouteId) {
        self.edges.remove(from, to);
        self.rebuild_process_order();
    }

    /// Recompute the topological process order and publish it for the
    /// audio thread. Called on any graph-affecting change, including
    /// rec-enable toggles.
    pub fn rebuild_process_order(&mut self) {
        let keys: Vec<(RouteId, SortKey)> =
            self.tracks.iter().map(|t| (t.route, t.sort_key())).collect();
        let result = tapedeck_core::topological_sort(&keys, &self.edges);
        self.order.publish(result.order);
    }

    pub fn process_order(&self) -> Vec<RouteId> {
        (*self.order.load()).clone()
    }

    /// Arm or disarm one track, then re-sort the graph.
    pub fn set_track_record_enabled(&mut self, route: RouteId, yn: bool) {
        if let Some(track) = self.track(route) {
            let stream = track.stream;
            if let Some(entry) = self.streams.get(&stream) {
                match &*entry {
                    Diskstream::Audio(ds) => ds.set_record_enabled(yn),
                    Diskstream::Midi(ds) => ds.set_record_enabled(yn),
                }
            }
        }
        self.rebuild_process_order();
    }

    /// Global record arm.
    pub fn set_record_enabled(&self, yn: bool) {
        self.query.record_armed.store(yn, Ordering::Release);
        self.signals.emit(SessionSignal::RecordStateChanged(yn));
    }

    pub fn record_enabled(&self) -> bool {
        self.query.record_armed.load(Ordering::Acquire)
    }

    /// Configure the auto punch window: record enable gates on inside
    /// `[range.start, range.end)`.
    pub fn set_auto_punch_range(&mut self, range: Option<SampleRange>) {
        use tapedeck_core::{EventAction, EventType};
        let queue = self.evmgr.queue();
        match range {
            Some(r) => {
                self.punch_configured = true;
                queue.queue(EventType::PunchIn, EventAction::Add, r.start, r.start, 0.0);
                queue.queue(EventType::PunchOut, EventAction::Add, r.end, r.end, 0.0);
            }
            None => {
                self.punch_configured = false;
                queue.queue(EventType::PunchIn, EventAction::Clear, 0, 0, 0.0);
                queue.queue(EventType::PunchOut, EventAction::Clear, 0, 0, 0.0);
            }
        }
    }

    /// Follow an external transport master, or return to the internal
    /// clock with `None`.
    pub fn use_transport_master(&mut self, master: Option<Arc<dyn TransportMaster>>) {
        self.master = master;
    }

    /// This session's own clock, usable as a master by another session.
    pub fn internal_clock(&self) -> Arc<tapedeck_core::InternalClock> {
        Arc::clone(&self.internal_clock)
    }

    pub fn timecode_transmission_enabled(&self) -> bool {
        self.timecode_tx
    }

    /// Ranges queued by a play-range request, in playback order.
    pub fn play_ranges(&self) -> &[SampleRange] {
        &self.play_ranges
    }

    pub fn current_sample(&self) -> tapedeck_core::SamplePos {
        self.ctx.transport_sample
    }

    pub fn transport_rolling(&self) -> bool {
        self.fsm.rolling()
    }

    pub fn transport_stopped_state(&self) -> bool {
        self.fsm.stopped()
    }

    pub fn transport_locating(&self) -> bool {
        self.fsm.locating()
    }

    pub fn waiting_for_butler(&self) -> bool {
        self.fsm.waiting_for_butler()
    }

    pub fn declick_in_progress(&self) -> bool {
        self.fsm.declick_in_progress()
    }

    /// Frames buffered for playback on a track, worst channel.
    pub fn track_playback_buffered(&self, route: RouteId) -> usize {
        self.track(route)
            .and_then(|t| self.streams.get(&t.stream))
            .and_then(|entry| entry.as_audio().map(|ds| ds.playback_buffered()))
            .unwrap_or(0)
    }

    /// The playlist backing a track's diskstream.
    pub fn track_playlist(&self, route: RouteId) -> Option<tapedeck_core::PlaylistId> {
        self.track(route)
            .and_then(|t| self.streams.get(&t.stream))
            .and_then(|entry| entry.as_audio().map(|ds| ds.playlist()))
    }

    /// A track's playlist changed outside the capture path; have the
    /// butler rebuffer it.
    pub fn notify_playlist_changed(&self, route: RouteId) {
        if let Some(track) = self.track(route) {
            self.ctx
                .butler
                .request(tapedeck_disk::ButlerRequest::Overwrite(track.stream));
        }
    }

    /// Update the furthest material extent for `goto_end`.
    pub fn update_session_extent(&self) {
        let mut end = 0;
        for track in &self.tracks {
            if let Some(entry) = self.streams.get(&track.stream) {
                if let Diskstream::Audio(ds) = &*entry {
                    end = end.max(self.store.playlist_length(ds.playlist()));
                }
            }
        }
        self.query.session_end.store(end, Ordering::Release);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.analyser.terminate();
        if let Some(tb) = self.thread_buffers.take() {
            self.buffers.put_thread_buffers(tb);
        }
        // The butler drops (and final-flushes) with the ctx.
    }
}
