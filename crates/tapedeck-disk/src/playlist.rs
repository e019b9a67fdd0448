//! Playlists: ordered region collections on one diskstream's timeline.

use crate::region::Region;
use tapedeck_core::{coverage, OverlapType, PlaylistId, RegionId, SamplePos};

/// The regions of one track, kept sorted by position.
///
/// Mutation happens under the store's lock on non-RT threads; the butler
/// reads through [`Playlist::read`], which never blocks on anything
/// beyond that brief lock.
#[derive(Debug, Clone)]
pub struct Playlist {
    id: PlaylistId,
    name: String,
    regions: Vec<Region>,
    next_layer: u32,
}

impl Playlist {
    pub fn new(id: PlaylistId, name: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            regions: Vec::new(),
            next_layer: 0,
        }
    }

    pub fn id(&self) -> PlaylistId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.id == id)
    }

    /// Place a region at `pos`. Later additions land on higher layers.
    pub fn add_region(&mut self, mut region: Region, pos: SamplePos) {
        region.position = pos;
        region.layer = self.next_layer;
        self.next_layer += 1;

        let at = self
            .regions
            .partition_point(|r| r.position <= region.position);
        self.regions.insert(at, region);
    }

    pub fn remove_region(&mut self, id: RegionId) -> Option<Region> {
        let idx = self.regions.iter().position(|r| r.id == id)?;
        Some(self.regions.remove(idx))
    }

    pub fn regions_touching(&self, start: SamplePos, end: SamplePos) -> Vec<&Region> {
        self.regions
            .iter()
            .filter(|r| coverage(r.position, r.end(), start, end) != OverlapType::None)
            .collect()
    }

    /// Timeline sample just past the last region.
    pub fn length(&self) -> SamplePos {
        self.regions.iter().map(|r| r.end()).max().unwrap_or(0)
    }

    /// Fill `buf` with `buf.len()` frames starting at timeline sample
    /// `start` for one channel.
    ///
    /// Regions are composited lowest layer first; opaque regions replace
    /// what is underneath, transparent ones sum with it. `read_source`
    /// pulls frames from a source at a source-relative offset and
    /// returns how many it produced.
    ///
    /// Returns the number of frames in `buf` covered by at least one
    /// region; the remainder is silence.
    pub fn read<F>(&self, buf: &mut [f32], start: SamplePos, channel: usize, read_source: F) -> usize
    where
        F: Fn(tapedeck_core::SourceId, &mut [f32], SamplePos) -> usize,
    {
        buf.fill(0.0);
        let end = start + buf.len() as SamplePos;

        let mut by_layer: Vec<&Region> = self
            .regions
            .iter()
            .filter(|r| !r.muted && channel < r.channels())
            .filter(|r| coverage(r.position, r.end(), start, end) != OverlapType::None)
            .collect();
        by_layer.sort_by_key(|r| r.layer);

        let mut covered = 0usize;
        let mut scratch = vec![0.0f32; buf.len()];

        for region in by_layer {
            let overlap_start = start.max(region.position);
            let overlap_end = end.min(region.end());
            let frames = (overlap_end - overlap_start) as usize;
            if frames == 0 {
                continue;
            }

            let buf_offset = (overlap_start - start) as usize;
            let src_offset = region.start + (overlap_start - region.position);
            let got = read_source(
                region.sources[channel],
                &mut scratch[..frames],
                src_offset,
            );

            let dest = &mut buf[buf_offset..buf_offset + got];
            if region.opaque {
                dest.copy_from_slice(&scratch[..got]);
            } else {
                for (d, s) in dest.iter_mut().zip(&scratch[..got]) {
                    *d += *s;
                }
            }
            covered = covered.max(buf_offset + got);
        }

        covered
    }
}
