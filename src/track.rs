//! Tracks: a route paired with its diskstream and per-cycle buffers.

use crate::plugin::PluginHost;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tapedeck_core::{DiskstreamId, MidiEvent, RouteId, SortKey};

/// One mixer strip: route identity, diskstream binding, I/O staging and
/// an insert chain.
///
/// The engine (or a test harness) fills `input` before each cycle and
/// reads `output` afterwards; the session wires them through the
/// diskstream and insert chain in topological route order.
pub struct Track {
    pub route: RouteId,
    pub stream: DiskstreamId,
    pub name: String,
    pub order_key: u32,
    /// Physical input connections imply existing-material alignment.
    pub physical_input: bool,
    pub input: Vec<Vec<f32>>,
    pub output: Vec<Vec<f32>>,
    pub midi_input: Vec<MidiEvent>,
    pub midi_output: Vec<MidiEvent>,
    pub inserts: Vec<Box<dyn PluginHost>>,
    pub insert_bypass: Vec<bool>,
    rec_enabled: Arc<AtomicBool>,
}

impl Track {
    pub fn new(
        route: RouteId,
        stream: DiskstreamId,
        name: &str,
        order_key: u32,
        n_channels: usize,
        block_size: usize,
        rec_enabled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            route,
            stream,
            name: name.to_owned(),
            order_key,
            physical_input: true,
            input: vec![vec![0.0; block_size]; n_channels],
            output: vec![vec![0.0; block_size]; n_channels],
            midi_input: Vec::with_capacity(256),
            midi_output: Vec::with_capacity(256),
            inserts: Vec::new(),
            insert_bypass: Vec::new(),
            rec_enabled,
        }
    }

    pub fn n_channels(&self) -> usize {
        self.input.len()
    }

    pub fn record_enabled(&self) -> bool {
        self.rec_enabled.load(Ordering::Acquire)
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            rec_enabled: self.record_enabled(),
            order_key: self.order_key,
        }
    }

    pub fn add_insert(&mut self, plugin: Box<dyn PluginHost>) {
        self.inserts.push(plugin);
        self.insert_bypass.push(false);
    }

    /// Zero the staging buffers between cycles.
    pub fn silence(&mut self) {
        for chan in self.input.iter_mut().chain(self.output.iter_mut()) {
            chan.fill(0.0);
        }
        self.midi_input.clear();
        self.midi_output.clear();
    }
}
