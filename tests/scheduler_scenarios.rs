//! Scheduler scenarios: punch singletons and sample-accurate capture
//! gating, exercised through the whole stack.

mod helpers;

use helpers::*;
use tapedeck::SampleRange;

/// Re-arming the punch window repeatedly must leave exactly one
/// punch-in/punch-out pair queued (the last), and the capture window
/// must land sample-accurately on it.
#[test]
fn test_punch_singleton_last_range_wins() {
    let (mut session, _dir) = new_session();
    let route = session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    session.set_track_record_enabled(route, true);
    session.set_record_enabled(true);

    // Three punch ranges; only the last survives.
    session.set_auto_punch_range(Some(SampleRange::new(1_000, 2_000)));
    session.set_auto_punch_range(Some(SampleRange::new(2_500, 3_500)));
    session.set_auto_punch_range(Some(SampleRange::new(3_000, 4_000)));

    // Recordable input.
    if let Some(track) = session.track_mut(route) {
        for chan in &mut track.input {
            chan.fill(0.5);
        }
    }

    handle.request_roll();
    // Roll well past the punch window.
    pump_until(&mut session, "rolled past punch window", |s| {
        s.current_sample() > 8_192
    });

    handle.request_stop(false);
    session.process(BLOCK);
    pump_until(&mut session, "stop settled", |s| {
        s.transport_stopped_state() && !s.waiting_for_butler()
    });

    // Exactly one capture region, opened and closed on the last punch
    // window's exact samples.
    let playlist = session.track_playlist(route).unwrap();
    let store = session.store().clone();
    let (count, position, length, source) = store
        .with_playlist(playlist, |pl| {
            let r = &pl.regions()[0];
            (pl.region_count(), r.position, r.length, r.sources[0])
        })
        .unwrap();

    assert_eq!(count, 1, "one punch pass, one region");
    assert_eq!(position, 3_000);
    assert_eq!(length, 1_000);

    // The captured material is the input signal.
    let src = store.audio_source(source).unwrap();
    let mut buf = vec![0.0f32; 1_000];
    let got = src.read(&mut buf, 0).unwrap();
    assert_eq!(got, 1_000);
    assert!(buf.iter().all(|&s| (s - 0.5).abs() < 1e-6));
}

/// Without a punch window, a single armed pass captures from the start
/// of the roll until the stop.
#[test]
fn test_armed_roll_captures_from_start() {
    let (mut session, _dir) = new_session();
    let route = session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    session.set_track_record_enabled(route, true);
    session.set_record_enabled(true);

    if let Some(track) = session.track_mut(route) {
        for chan in &mut track.input {
            chan.fill(0.25);
        }
    }

    handle.request_roll();
    pump(&mut session, 4);
    let captured_until = session.current_sample();

    handle.request_stop(false);
    session.process(BLOCK);
    pump_until(&mut session, "capture finalized", |s| {
        s.transport_stopped_state() && !s.waiting_for_butler()
    });

    let playlist = session.track_playlist(route).unwrap();
    let store = session.store().clone();
    let (count, position, length) = store
        .with_playlist(playlist, |pl| {
            let r = &pl.regions()[0];
            (pl.region_count(), r.position, r.length)
        })
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(position, 0, "capture began at the roll start");
    // Everything processed while rolling was captured, including the
    // declicked stop cycle.
    assert!(length >= captured_until, "captured {length} of {captured_until}");
}

/// A real-time operation queued from a control thread runs on the audio
/// thread and reports back.
#[test]
fn test_rt_operation_round_trip() {
    let (mut session, _dir) = new_session();
    session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    let done = handle.run_rt(|| {});
    assert!(done.try_recv().is_err(), "not run before a cycle");

    session.process(BLOCK);
    assert!(done.recv_timeout(std::time::Duration::from_secs(1)).is_ok());
}

/// Markers and snapshots through the control surface.
#[test]
fn test_marker_and_snapshot() {
    let (mut session, _dir) = new_session();
    session.add_audio_track("track-1", 1).unwrap();
    let handle = session.handle();

    handle.add_marker(12_345);
    handle.add_marker(67_890);
    assert_eq!(handle.markers(), vec![12_345, 67_890]);

    session.process(BLOCK);
    let path = handle.save_state("take-one").unwrap();
    assert!(path.exists());
    let body = std::fs::read_to_string(path).unwrap();
    assert!(body.contains("take-one"));
    assert!(body.contains("12345"));
}
