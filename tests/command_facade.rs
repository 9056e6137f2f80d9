//! Command verb tests
//!
//! Each verb must put the right bytes on the wire and consume exactly one
//! acknowledgement line.

mod common;

use common::{FakeBackend, ack, ack_name, qspy_responder, text, wait_for};
use qutest::protocol::{
    EncodeError, Event, EventTarget, FilterGroup, GlobalFilterSet, ObjectKind,
};
use qutest::{Session, SessionError};
use std::time::Duration;

fn attached(backend: &FakeBackend) -> Session {
    let mut session = Session::new(backend.config()).unwrap();
    session.attach().unwrap();
    session.reset_target().unwrap();
    session
}

/// Packet number `index` as received by the backend.
fn packet(backend: &FakeBackend, index: usize) -> Vec<u8> {
    assert!(wait_for(|| backend.received().len() > index));
    backend.received()[index].clone()
}

#[test]
fn every_verb_observes_its_ack() {
    let backend = FakeBackend::qspy();
    let mut session = attached(&backend);

    session
        .glb_filter(GlobalFilterSet::empty().with(FilterGroup::Sm).with(FilterGroup::U0))
        .unwrap();
    session.loc_filter(ObjectKind::Ao, "AO_Philo<2>").unwrap();
    session.current_obj(ObjectKind::SmAo, 0x2000_0100u64).unwrap();
    session.tick(0).unwrap();
    session.command("CMD_RESET", [1, 2, 3]).unwrap();
    session.command(5u8, [0, 0, 0]).unwrap();
    session.probe("BSP_random", 123).unwrap();
    session.probe(0x0800_0400u64, 7).unwrap();
    session.resume().unwrap();

    // reset went out at index 1 after attach
    let opcodes = backend.opcodes();
    assert_eq!(opcodes, vec![128, 2, 10, 136, 13, 3, 138, 1, 139, 9, 14]);
    assert_eq!(session.pending_lines(), 0);
}

#[test]
fn events_choose_wire_form_by_signal() {
    let backend = FakeBackend::qspy();
    let mut session = attached(&backend);

    session.post("EAT_SIG", &[]).unwrap();
    session.expect("%timestamp Trg-Done QS_RX_EVENT").unwrap();
    let mut expected = vec![2, 135, 253, 0, 0, 0, 0];
    expected.extend_from_slice(b"EAT_SIG\0");
    assert_eq!(packet(&backend, 2), expected);

    session.publish(6u32, &[]).unwrap();
    session.expect("%timestamp Trg-Done QS_RX_EVENT").unwrap();
    assert_eq!(packet(&backend, 3), vec![3, 16, 0, 6, 0, 0, 0]);

    session.dispatch(7u32, &[]).unwrap();
    session.expect("%timestamp Trg-Done*").unwrap();
    assert_eq!(packet(&backend, 4)[2], 255);

    session.init(0u32, &[]).unwrap();
    session.expect("%timestamp Trg-Done*").unwrap();
    assert_eq!(packet(&backend, 5)[2], 254);

    session
        .event(Event::new(EventTarget::Priority(3), "HUNGRY_SIG").with_params(vec![2u8]))
        .unwrap();
    session.expect("%timestamp Trg-Done*").unwrap();
    let sent = packet(&backend, 6);
    assert_eq!(&sent[1..7], &[135, 3, 0, 0, 1, 0]);
    assert_eq!(sent[7], 2);
}

#[test]
fn event_verbs_carry_their_parameters() {
    let backend = FakeBackend::qspy();
    let mut session = attached(&backend);

    session.post("EAT_SIG", &[2, 0]).unwrap();
    session.expect("%timestamp Trg-Done QS_RX_EVENT").unwrap();
    let mut expected = vec![2, 135, 253, 0, 0, 2, 0, 2, 0];
    expected.extend_from_slice(b"EAT_SIG\0");
    assert_eq!(packet(&backend, 2), expected);

    session.publish(6u32, &[0xAA]).unwrap();
    session.expect("%timestamp Trg-Done QS_RX_EVENT").unwrap();
    assert_eq!(packet(&backend, 3), vec![3, 16, 0, 6, 0, 1, 0, 0xAA]);

    session.dispatch(7u32, &[1, 2, 3]).unwrap();
    session.expect("%timestamp Trg-Done QS_RX_EVENT").unwrap();
    assert_eq!(packet(&backend, 4), vec![4, 16, 255, 7, 0, 3, 0, 1, 2, 3]);

    session.init(0u32, &[9]).unwrap();
    session.expect("%timestamp Trg-Done QS_RX_EVENT").unwrap();
    assert_eq!(packet(&backend, 5), vec![5, 16, 254, 0, 0, 1, 0, 9]);
}

#[test]
fn oversized_fields_are_refused_before_sending() {
    let backend = FakeBackend::qspy();
    let mut session = attached(&backend);

    let err = session.post(0x1_0005u32, &[]).unwrap_err();
    assert!(
        matches!(
            err,
            SessionError::Encode(EncodeError::FieldOverflow {
                field: "signal",
                value: 0x1_0005,
                width: 2,
            })
        ),
        "{err}"
    );
    assert!(!err.is_fatal());

    let err = session
        .current_obj(ObjectKind::Ao, 0x1_0000_0000u64)
        .unwrap_err();
    assert!(matches!(err, SessionError::Encode(_)), "{err}");

    let err = session.post("BIG_SIG", &[0u8; 0x1_0000]).unwrap_err();
    assert!(matches!(err, SessionError::Encode(_)), "{err}");

    // nothing reached the wire and the next command keeps the sequence
    session.tick(0).unwrap();
    assert_eq!(backend.opcodes(), vec![128, 2, 3]);
    assert_eq!(packet(&backend, 2), vec![2, 3, 0]);
}

#[test]
fn sequential_posts_consume_their_own_acks() {
    let mut posted = 0;
    let backend = FakeBackend::start(move |packet| match packet[1] {
        16 | 135 => {
            posted += 1;
            vec![
                ack("EVENT"),
                text(&format!("00000000{posted:02} EVENT {posted}")),
            ]
        }
        _ => qspy_responder(packet),
    });
    let mut session = attached(&backend);

    session.post(1u32, &[]).unwrap();
    session.expect("%timestamp EVENT 1").unwrap();
    session.post(2u32, &[]).unwrap();
    session.expect("%timestamp EVENT 2").unwrap();
    assert_eq!(session.pending_lines(), 0);
}

#[test]
fn skipping_a_trace_line_shows_up_as_a_mismatch() {
    let backend = FakeBackend::qspy();
    let mut session = attached(&backend);

    session.post(1u32, &[]).unwrap();
    // the Trg-Done line of the first post is still queued
    let err = session.post(2u32, &[]).unwrap_err();
    match err {
        SessionError::ExpectMismatch { expected, actual } => {
            assert_eq!(expected, "           Trg-Ack  QS_RX_EVENT");
            assert_eq!(actual, "0000000100 Trg-Done QS_RX_EVENT");
        }
        other => panic!("expected mismatch, got {other}"),
    }
}

#[test]
fn missing_ack_times_out_without_poisoning_the_queue() {
    let backend = FakeBackend::start(|packet| match packet[1] {
        3 => Vec::new(),
        _ => qspy_responder(packet),
    });
    let mut session = attached(&backend);

    let err = session.tick(0).unwrap_err();
    assert!(matches!(err, SessionError::ExpectTimeout { .. }), "{err}");
    assert!(!err.is_fatal());

    backend.send_text("0000000200 late line");
    session.expect("%timestamp late line").unwrap();

    session.current_obj(ObjectKind::Sm, "the_hsm").unwrap();
}

#[test]
fn wrong_ack_reports_both_texts() {
    let backend = FakeBackend::start(|packet| match packet[1] {
        3 => vec![ack("LOC_FILTER")],
        _ => qspy_responder(packet),
    });
    let mut session = attached(&backend);

    match session.tick(0).unwrap_err() {
        SessionError::ExpectMismatch { expected, actual } => {
            assert!(expected.ends_with("QS_RX_TICK"));
            assert!(actual.ends_with("QS_RX_LOC_FILTER"));
        }
        other => panic!("expected mismatch, got {other}"),
    }
}

#[test]
fn unresolved_names_surface_as_timeouts() {
    // a backend without dictionaries drops what it cannot resolve
    let backend = FakeBackend::start(|packet| match packet[1] {
        135..=139 => Vec::new(),
        _ => qspy_responder(packet),
    });
    let mut config = backend.config();
    config.expect_timeout_ms = 100;
    let mut session = Session::new(config).unwrap();
    session.attach().unwrap();
    session.reset_target().unwrap();

    assert!(matches!(
        session.post("NO_SUCH_SIG", &[]),
        Err(SessionError::ExpectTimeout { .. })
    ));
    session.post(4u32, &[]).unwrap();
}

#[test]
fn pause_and_resume() {
    let backend = FakeBackend::qspy();
    let mut session = attached(&backend);

    backend.send_text("           TstPause");
    session.expect_pause().unwrap();
    session.resume().unwrap();
}

#[test]
fn raw_payloads_get_the_next_sequence_number() {
    let backend = FakeBackend::start(|packet| match packet[1] {
        0xEE => vec![text("raw seen")],
        _ => qspy_responder(packet),
    });
    let mut session = attached(&backend);

    session.send_raw(vec![0xEEu8, 1, 2, 3]).unwrap();
    session
        .expect_within("raw seen", Duration::from_secs(1))
        .unwrap();
    assert_eq!(packet(&backend, 2), vec![2, 0xEE, 1, 2, 3]);
}

#[test]
fn ack_table_covers_every_acked_opcode() {
    for opcode in [1, 3, 9, 10, 11, 13, 14, 16, 135, 136, 137, 138, 139] {
        assert!(ack_name(opcode).is_some(), "opcode {opcode}");
    }
    assert!(ack_name(2).is_none());
}
