//! Disk streaming scenarios: seamless looping, capture alignment and
//! the analyser pipeline.

mod helpers;

use helpers::*;
use std::time::Duration;
use tapedeck::analysis::Analysable;
use tapedeck::{SampleRange, SessionConfig};
use tapedeck::Session;

/// Loop playback crosses the loop boundary without a gap: the output of
/// the crossing cycle is exactly the playlist tail followed by the
/// playlist head.
#[test]
fn test_seamless_loop_playback() {
    let (mut session, _dir) = new_session();
    let route = session.add_audio_track("track-1", 1).unwrap();
    lay_down_ramp(&mut session, route, 96_000);
    let handle = session.handle();

    const LOOP_END: i64 = 48_000;
    handle.request_play_loop(Some(SampleRange::new(0, LOOP_END)));
    session.process(BLOCK);

    // Let the butler prefill the loop into the rings.
    pump_until(&mut session, "loop prefill", |s| {
        s.track_playback_buffered(route) >= (LOOP_END as usize) + BLOCK
    });

    handle.request_roll();

    let mut wraps = 0;
    let mut cycles = 0;
    while wraps < 2 {
        let start_pos = session.current_sample();
        session.process(BLOCK);
        cycles += 1;
        assert!(cycles < 200, "loop never wrapped");

        let track = session.track(route).unwrap();
        for k in 0..BLOCK {
            let timeline = start_pos + k as i64;
            let expected = ramp_value((timeline % LOOP_END) as usize, 96_000);
            let got = track.output[0][k];
            assert!(
                (got - expected).abs() < 1e-5,
                "cycle starting {start_pos}, frame {k}: got {got}, expected {expected}"
            );
        }

        if session.current_sample() < start_pos {
            wraps += 1;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    // Positions rewrapped into the loop.
    assert!(session.current_sample() < LOOP_END);
}

/// With existing-material alignment, the first captured frame lands at
/// roll start + capture offset + worst output latency.
#[test]
fn test_capture_alignment_with_output_latency() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SessionConfig::new(dir.path().join("sounds"));
    config.engine.sample_rate = SR;
    config.engine.block_size = BLOCK;
    config.worst_output_latency = 500;
    let mut session = Session::new(config).unwrap();

    let route = session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    session.set_track_record_enabled(route, true);
    session.set_record_enabled(true);
    if let Some(track) = session.track_mut(route) {
        for chan in &mut track.input {
            chan.fill(0.6);
        }
    }

    handle.request_roll();
    pump(&mut session, 4);
    handle.request_stop(false);
    session.process(BLOCK);
    pump_until(&mut session, "capture finalized", |s| {
        s.transport_stopped_state() && !s.waiting_for_butler()
    });

    let playlist = session.track_playlist(route).unwrap();
    let position = session
        .store()
        .with_playlist(playlist, |pl| pl.regions()[0].position)
        .unwrap();
    assert_eq!(position, 500, "capture aligned past the output latency");
}

/// A fresh capture flows straight into the analyser and comes back
/// marked analysed.
#[test]
fn test_captured_source_can_be_analysed() {
    let (mut session, _dir) = new_session();
    let route = session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    session.set_track_record_enabled(route, true);
    session.set_record_enabled(true);
    if let Some(track) = session.track_mut(route) {
        // A click per cycle gives the detector something to find.
        for chan in &mut track.input {
            chan.fill(0.0);
            for i in 0..40 {
                chan[i] = (-0.15 * i as f32).exp();
            }
        }
    }

    handle.request_roll();
    pump(&mut session, 8);
    handle.request_stop(false);
    session.process(BLOCK);
    pump_until(&mut session, "capture finalized", |s| {
        s.transport_stopped_state() && !s.waiting_for_butler()
    });

    let playlist = session.track_playlist(route).unwrap();
    let store = session.store().clone();
    let source_id = store
        .with_playlist(playlist, |pl| pl.regions()[0].sources[0])
        .unwrap();
    let source = store.audio_source(source_id).unwrap();
    assert!(!source.has_been_analysed());

    let dyn_source: std::sync::Arc<dyn Analysable> = source.clone();
    session
        .analyser()
        .queue_source_for_analysis(&dyn_source, false);

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !source.has_been_analysed() {
        assert!(std::time::Instant::now() < deadline, "analysis timed out");
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!source.transients().is_empty(), "clicks detected");
}

/// No captured sample is lost while the butler races the audio thread.
#[test]
fn test_capture_integrity_under_load() {
    let (mut session, _dir) = new_session();
    let route = session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    session.set_track_record_enabled(route, true);
    session.set_record_enabled(true);
    if let Some(track) = session.track_mut(route) {
        for chan in &mut track.input {
            chan.fill(0.3);
        }
    }

    handle.request_roll();
    for _ in 0..16 {
        session.process(BLOCK);
        std::thread::sleep(Duration::from_millis(1));
    }

    handle.request_stop(false);
    session.process(BLOCK);
    pump_until(&mut session, "drained", |s| {
        s.transport_stopped_state() && !s.waiting_for_butler()
    });

    // All captured material reached the file despite the butler racing
    // the audio thread.
    let playlist = session.track_playlist(route).unwrap();
    let store = session.store().clone();
    let (length, source_id) = store
        .with_playlist(playlist, |pl| {
            let r = &pl.regions()[0];
            (r.length, r.sources[0])
        })
        .unwrap();
    let source = store.audio_source(source_id).unwrap();
    assert!(source.length() >= length);

    let mut buf = vec![0.0f32; length as usize];
    let got = source.read(&mut buf, 0).unwrap();
    assert_eq!(got as i64, length);
    assert!(buf.iter().all(|&s| (s - 0.3).abs() < 1e-6));
}
