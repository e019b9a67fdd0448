//! Route graph ordering scenarios.

mod helpers;

use helpers::*;
use tapedeck::RouteId;

fn index_of(order: &[RouteId], r: RouteId) -> usize {
    order.iter().position(|&x| x == r).unwrap()
}

/// A -> B -> C with A rec-enabled: data flow outranks rec-enable, so A
/// still runs before B and C.
#[test]
fn test_chain_order_with_rec_enabled_head() {
    let (mut session, _dir) = new_session();
    let a = session.add_audio_track("a", 1).unwrap();
    let b = session.add_audio_track("b", 1).unwrap();
    let c = session.add_audio_track("c", 1).unwrap();

    session.connect(a, b);
    session.connect(b, c);
    session.set_track_record_enabled(a, true);

    let order = session.process_order();
    assert_eq!(order.len(), 3);
    assert!(index_of(&order, a) < index_of(&order, b));
    assert!(index_of(&order, b) < index_of(&order, c));
}

/// Independent routes: the rec-enabled one runs after the others so it
/// can record what they produce in the same cycle.
#[test]
fn test_rec_enabled_root_runs_last() {
    let (mut session, _dir) = new_session();
    let a = session.add_audio_track("a", 1).unwrap();
    let b = session.add_audio_track("b", 1).unwrap();
    let c = session.add_audio_track("c", 1).unwrap();

    session.set_track_record_enabled(a, true);

    let order = session.process_order();
    assert_eq!(order[2], a, "rec-enabled route scheduled last");
    assert!(index_of(&order, b) < index_of(&order, a));
    assert!(index_of(&order, c) < index_of(&order, a));
}

/// Toggling rec-enable re-sorts without disturbing feed order.
#[test]
fn test_rec_toggle_resorts() {
    let (mut session, _dir) = new_session();
    let a = session.add_audio_track("a", 1).unwrap();
    let b = session.add_audio_track("b", 1).unwrap();

    let before = session.process_order();
    assert_eq!(before, vec![a, b]);

    session.set_track_record_enabled(a, true);
    assert_eq!(session.process_order(), vec![b, a]);

    session.set_track_record_enabled(a, false);
    assert_eq!(session.process_order(), vec![a, b]);
}

/// Disconnecting restores independence; connecting imposes order.
#[test]
fn test_connect_disconnect_rebuilds() {
    let (mut session, _dir) = new_session();
    let a = session.add_audio_track("a", 1).unwrap();
    let b = session.add_audio_track("b", 1).unwrap();

    session.connect(b, a);
    let order = session.process_order();
    assert!(index_of(&order, b) < index_of(&order, a));

    session.disconnect(b, a);
    let order = session.process_order();
    assert_eq!(order, vec![a, b], "back to signal order");
}

/// Feedback keeps every route in the order rather than dropping any.
#[test]
fn test_feedback_keeps_all_routes() {
    let (mut session, _dir) = new_session();
    let a = session.add_audio_track("a", 1).unwrap();
    let b = session.add_audio_track("b", 1).unwrap();
    let c = session.add_audio_track("c", 1).unwrap();

    session.connect(a, b);
    session.connect(b, a);

    let order = session.process_order();
    assert_eq!(order.len(), 3);
    assert!(order.contains(&a));
    assert!(order.contains(&b));
    assert!(order.contains(&c));
}
