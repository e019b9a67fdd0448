//! Shared harness for the end-to-end scenario tests.
//!
//! There is no device backend here; cycles are pumped by hand and the
//! butler/analyser threads run for real.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tapedeck::{RouteId, Session, SessionConfig};
use tempfile::TempDir;

pub const SR: f64 = 48000.0;
pub const BLOCK: usize = 1024;

static UNIQUE: AtomicU64 = AtomicU64::new(0);

pub fn new_session() -> (Session, TempDir) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = SessionConfig::new(dir.path().join("sounds"));
    config.engine.sample_rate = SR;
    config.engine.block_size = BLOCK;
    config.engine.declick_samples = 256;
    let session = Session::new(config).expect("session");
    (session, dir)
}

/// Pump cycles until `cond` holds, sleeping a little between cycles so
/// the butler can keep up. Panics on timeout.
pub fn pump_until(
    session: &mut Session,
    what: &str,
    mut cond: impl FnMut(&Session) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if cond(session) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for: {what}");
        session.process(BLOCK);
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Pump exactly `n` cycles.
pub fn pump(session: &mut Session, n: usize) {
    for _ in 0..n {
        session.process(BLOCK);
    }
}

/// Write a ramp of `frames` samples as playlist material on `route`,
/// starting at timeline zero. Sample i has value `i / frames`.
pub fn lay_down_ramp(session: &mut Session, route: RouteId, frames: usize) {
    let store = session.store().clone();
    let playlist = session.track_playlist(route).expect("audio track");

    let unique = UNIQUE.fetch_add(1, Ordering::Relaxed);
    let source = store
        .create_audio_source(
            "ramp",
            &std::env::temp_dir().join(format!(
                "tapedeck-ramp-{}-{unique}.wav",
                std::process::id()
            )),
            SR,
            tapedeck::disk::capture_source_flags(),
        )
        .expect("ramp source");
    let ramp: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
    source.write(&ramp).expect("write ramp");
    source.mark_streaming_write_completed().expect("finalize ramp");

    let region = tapedeck::Region::new(
        store.next_region_id(),
        "ramp.1",
        vec![source.id()],
        0,
        0,
        frames as i64,
    );
    store
        .add_region_to_playlist(playlist, region, 0)
        .expect("place region");
    session.update_session_extent();
}

/// The expected ramp value at frame `i` of `frames`.
pub fn ramp_value(i: usize, frames: usize) -> f32 {
    i as f32 / frames as f32
}
