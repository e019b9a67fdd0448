//! Session-owned store of sources, regions and playlists.
//!
//! Regions refer to sources by id and playlists own their regions, so
//! there is no ownership cycle anywhere; lifetime is mediated by the
//! sources' use counts.

use crate::destructive::DestructiveSource;
use crate::error::{Error, Result};
use crate::playlist::Playlist;
use crate::region::Region;
use crate::source::{AudioFileSource, MidiSource, SourceFlags};
use dashmap::DashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tapedeck_core::{PlaylistId, RegionId, SampleCnt, SamplePos, SourceId};
use tracing::debug;

/// Closed set of source variants.
#[derive(Clone)]
pub enum Source {
    Audio(Arc<AudioFileSource>),
    Midi(Arc<MidiSource>),
    Destructive(Arc<DestructiveSource>),
}

impl Source {
    /// Length in the source's native units (frames or events).
    pub fn length(&self) -> i64 {
        match self {
            Source::Audio(s) => s.length(),
            Source::Midi(s) => s.length(),
            Source::Destructive(s) => s.length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn use_count(&self) -> u32 {
        match self {
            Source::Audio(s) => s.use_count(),
            Source::Midi(s) => s.use_count(),
            Source::Destructive(s) => s.use_count(),
        }
    }

    pub fn inc_use_count(&self) {
        match self {
            Source::Audio(s) => s.inc_use_count(),
            Source::Midi(s) => s.inc_use_count(),
            Source::Destructive(s) => s.inc_use_count(),
        }
    }

    pub fn dec_use_count(&self) {
        match self {
            Source::Audio(s) => s.dec_use_count(),
            Source::Midi(s) => s.dec_use_count(),
            Source::Destructive(s) => s.dec_use_count(),
        }
    }

    pub fn flags(&self) -> SourceFlags {
        match self {
            Source::Audio(s) => s.flags(),
            Source::Midi(s) => s.flags(),
            Source::Destructive(_) => SourceFlags::WRITABLE,
        }
    }

    /// Read audio frames; MIDI sources yield nothing here.
    pub fn read_audio(&self, buf: &mut [f32], pos: SamplePos) -> usize {
        match self {
            Source::Audio(s) => s.read(buf, pos).unwrap_or(0),
            Source::Destructive(s) => s.read(buf, pos).unwrap_or(0),
            Source::Midi(_) => 0,
        }
    }
}

/// Indexed store for one session.
pub struct AudioStore {
    sources: DashMap<SourceId, Source>,
    playlists: DashMap<PlaylistId, Playlist>,
    next_source: AtomicU64,
    next_region: AtomicU64,
    next_playlist: AtomicU64,
}

impl AudioStore {
    pub fn new() -> Self {
        Self {
            sources: DashMap::new(),
            playlists: DashMap::new(),
            next_source: AtomicU64::new(1),
            next_region: AtomicU64::new(1),
            next_playlist: AtomicU64::new(1),
        }
    }

    fn next_source_id(&self) -> SourceId {
        SourceId(self.next_source.fetch_add(1, Ordering::Relaxed))
    }

    pub fn next_region_id(&self) -> RegionId {
        RegionId(self.next_region.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a writable capture source backed by a new WAV file.
    pub fn create_audio_source(
        &self,
        name: &str,
        path: &Path,
        sample_rate: f64,
        flags: SourceFlags,
    ) -> Result<Arc<AudioFileSource>> {
        let id = self.next_source_id();
        let src = Arc::new(AudioFileSource::create(id, name, path, sample_rate, flags)?);
        self.sources.insert(id, Source::Audio(Arc::clone(&src)));
        Ok(src)
    }

    /// Open existing material as a read-only source.
    pub fn open_audio_source(&self, path: &Path) -> Result<Arc<AudioFileSource>> {
        let id = self.next_source_id();
        let src = Arc::new(AudioFileSource::open(id, path)?);
        self.sources.insert(id, Source::Audio(Arc::clone(&src)));
        Ok(src)
    }

    pub fn create_midi_source(&self, name: &str) -> Arc<MidiSource> {
        let id = self.next_source_id();
        let src = Arc::new(MidiSource::new(id, name));
        self.sources.insert(id, Source::Midi(Arc::clone(&src)));
        src
    }

    pub fn register_destructive_source(&self, src: Arc<DestructiveSource>) {
        self.sources
            .insert(src.id(), Source::Destructive(Arc::clone(&src)));
    }

    pub fn create_destructive_source(
        &self,
        name: &str,
        path: &Path,
        sample_rate: f64,
        timeline_position: SamplePos,
        curves: Arc<crate::destructive::XfadeCurves>,
    ) -> Result<Arc<DestructiveSource>> {
        let id = self.next_source_id();
        let src = Arc::new(DestructiveSource::create(
            id,
            name,
            path,
            sample_rate,
            timeline_position,
            curves,
        )?);
        self.sources.insert(id, Source::Destructive(Arc::clone(&src)));
        Ok(src)
    }

    pub fn source(&self, id: SourceId) -> Option<Source> {
        self.sources.get(&id).map(|s| s.clone())
    }

    pub fn audio_source(&self, id: SourceId) -> Option<Arc<AudioFileSource>> {
        match self.sources.get(&id).map(|s| s.clone()) {
            Some(Source::Audio(s)) => Some(s),
            _ => None,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Drop a source, applying the removal policy:
    /// a used source stays; `REMOVE_AT_DESTROY` always deletes the file;
    /// otherwise `REMOVABLE_IF_EMPTY` deletes only an empty one.
    ///
    /// Returns true if the source was removed from the store.
    pub fn finalize_source(&self, id: SourceId) -> bool {
        let Some(entry) = self.sources.get(&id).map(|s| s.clone()) else {
            return false;
        };
        if entry.use_count() > 0 {
            return false;
        }

        let flags = entry.flags();
        let delete_file = if flags.contains(SourceFlags::REMOVE_AT_DESTROY) {
            true
        } else {
            flags.contains(SourceFlags::REMOVABLE_IF_EMPTY) && entry.is_empty()
        };

        if delete_file {
            match &entry {
                Source::Audio(s) => {
                    let _ = s.mark_streaming_write_completed();
                    s.remove_file();
                }
                Source::Destructive(s) => s.remove_file(),
                Source::Midi(_) => {}
            }
            debug!(source = %id, "removed source file at finalization");
        }

        self.sources.remove(&id);
        true
    }

    pub fn create_playlist(&self, name: &str) -> PlaylistId {
        let id = PlaylistId(self.next_playlist.fetch_add(1, Ordering::Relaxed));
        self.playlists.insert(id, Playlist::new(id, name));
        id
    }

    /// Run `f` against a playlist under the store's lock.
    pub fn with_playlist<R>(&self, id: PlaylistId, f: impl FnOnce(&mut Playlist) -> R) -> Option<R> {
        self.playlists.get_mut(&id).map(|mut pl| f(&mut pl))
    }

    /// Validate a region against its sources, bump their use counts and
    /// place it on a playlist.
    pub fn add_region_to_playlist(
        &self,
        playlist: PlaylistId,
        region: Region,
        pos: SamplePos,
    ) -> Result<RegionId> {
        if !self.playlists.contains_key(&playlist) {
            return Err(Error::UnknownPlaylist(playlist));
        }
        for &sid in &region.sources {
            let src = self.source(sid).ok_or(Error::UnknownSource(sid))?;
            // MIDI length is counted in events, not frames, so only
            // audio material bounds a region's extent.
            if !matches!(src, Source::Midi(_)) {
                region.validate(src.length() as SampleCnt)?;
            }
        }
        for &sid in &region.sources {
            if let Some(src) = self.source(sid) {
                src.inc_use_count();
            }
        }

        let id = region.id;
        self.with_playlist(playlist, |pl| pl.add_region(region, pos));
        Ok(id)
    }

    /// Place several regions under one playlist lock, so a whole capture
    /// pass lands as a single edit.
    pub fn add_regions_to_playlist(
        &self,
        playlist: PlaylistId,
        regions: Vec<(Region, SamplePos)>,
    ) -> Result<Vec<RegionId>> {
        if !self.playlists.contains_key(&playlist) {
            return Err(Error::UnknownPlaylist(playlist));
        }
        for (region, _) in &regions {
            for &sid in &region.sources {
                let src = self.source(sid).ok_or(Error::UnknownSource(sid))?;
                if !matches!(src, Source::Midi(_)) {
                    region.validate(src.length() as SampleCnt)?;
                }
            }
        }

        let mut ids = Vec::with_capacity(regions.len());
        for (region, _) in &regions {
            for &sid in &region.sources {
                if let Some(src) = self.source(sid) {
                    src.inc_use_count();
                }
            }
            ids.push(region.id);
        }

        self.with_playlist(playlist, |pl| {
            for (region, pos) in regions {
                pl.add_region(region, pos);
            }
        });
        Ok(ids)
    }

    pub fn remove_region_from_playlist(
        &self,
        playlist: PlaylistId,
        region: RegionId,
    ) -> Option<Region> {
        let removed = self.with_playlist(playlist, |pl| pl.remove_region(region))??;
        for &sid in &removed.sources {
            if let Some(src) = self.source(sid) {
                src.dec_use_count();
            }
        }
        Some(removed)
    }

    /// Butler-facing playlist read for one channel.
    pub fn read_playlist(
        &self,
        playlist: PlaylistId,
        buf: &mut [f32],
        start: SamplePos,
        channel: usize,
    ) -> usize {
        let Some(pl) = self.playlists.get(&playlist) else {
            buf.fill(0.0);
            return 0;
        };
        pl.read(buf, start, channel, |sid, out, pos| {
            self.source(sid).map_or(0, |src| src.read_audio(out, pos))
        })
    }

    pub fn playlist_length(&self, playlist: PlaylistId) -> SamplePos {
        self.playlists.get(&playlist).map_or(0, |pl| pl.length())
    }
}

impl Default for AudioStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::capture_source_flags;
    use tempfile::tempdir;

    fn store_with_source(dir: &tempfile::TempDir, frames: usize) -> (AudioStore, SourceId) {
        let store = AudioStore::new();
        let src = store
            .create_audio_source(
                "take-1",
                &dir.path().join("take-1.wav"),
                48000.0,
                capture_source_flags(),
            )
            .unwrap();
        src.write(&vec![0.5; frames]).unwrap();
        src.mark_streaming_write_completed().unwrap();
        let id = src.id();
        (store, id)
    }

    #[test]
    fn test_region_validation_against_source() {
        let dir = tempdir().unwrap();
        let (store, sid) = store_with_source(&dir, 1000);
        let pl = store.create_playlist("track 1");

        let good = Region::new(store.next_region_id(), "ok", vec![sid], 0, 0, 1000);
        assert!(store.add_region_to_playlist(pl, good, 0).is_ok());

        let bad = Region::new(store.next_region_id(), "bad", vec![sid], 0, 100, 1000);
        assert!(store.add_region_to_playlist(pl, bad, 0).is_err());
    }

    #[test]
    fn test_use_counts_follow_regions() {
        let dir = tempdir().unwrap();
        let (store, sid) = store_with_source(&dir, 1000);
        let pl = store.create_playlist("track 1");

        let region = Region::new(store.next_region_id(), "r", vec![sid], 0, 0, 500);
        let rid = store.add_region_to_playlist(pl, region, 0).unwrap();
        assert_eq!(store.source(sid).unwrap().use_count(), 1);

        store.remove_region_from_playlist(pl, rid);
        assert_eq!(store.source(sid).unwrap().use_count(), 0);
    }

    #[test]
    fn test_finalize_keeps_used_source() {
        let dir = tempdir().unwrap();
        let (store, sid) = store_with_source(&dir, 1000);
        let pl = store.create_playlist("track 1");
        let region = Region::new(store.next_region_id(), "r", vec![sid], 0, 0, 500);
        store.add_region_to_playlist(pl, region, 0).unwrap();

        assert!(!store.finalize_source(sid));
        assert!(store.source(sid).is_some());
    }

    #[test]
    fn test_finalize_remove_at_destroy_deletes_file() {
        let dir = tempdir().unwrap();
        let (store, sid) = store_with_source(&dir, 1000);
        let path = store.audio_source(sid).unwrap().path();
        assert!(path.exists());

        // Non-empty, but REMOVE_AT_DESTROY wins over REMOVABLE_IF_EMPTY.
        assert!(store.finalize_source(sid));
        assert!(!path.exists());
        assert!(store.source(sid).is_none());
    }

    #[test]
    fn test_finalize_removable_if_empty_keeps_nonempty() {
        let dir = tempdir().unwrap();
        let store = AudioStore::new();
        let src = store
            .create_audio_source(
                "keep",
                &dir.path().join("keep.wav"),
                48000.0,
                SourceFlags::REMOVABLE_IF_EMPTY,
            )
            .unwrap();
        src.write(&vec![0.1; 64]).unwrap();
        src.mark_streaming_write_completed().unwrap();
        let path = src.path();
        let id = src.id();
        drop(src);

        assert!(store.finalize_source(id));
        assert!(path.exists(), "non-empty file with only REMOVABLE_IF_EMPTY survives");
    }

    #[test]
    fn test_read_playlist_composites_sources() {
        let dir = tempdir().unwrap();
        let (store, sid) = store_with_source(&dir, 1000);
        let pl = store.create_playlist("track 1");
        let region = Region::new(store.next_region_id(), "r", vec![sid], 0, 0, 1000);
        store.add_region_to_playlist(pl, region, 100).unwrap();

        let mut buf = vec![0.0f32; 200];
        store.read_playlist(pl, &mut buf, 0, 0);
        assert!(buf[..100].iter().all(|&s| s == 0.0));
        assert!(buf[100..].iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }
}
