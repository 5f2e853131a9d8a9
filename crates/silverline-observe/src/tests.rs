//! Unit tests for the call event log.

use rusqlite::Connection;
use silverline_types::{is_valid_path, AnswerConfidence, CallPhase, ResolverAction};

use crate::error::ObserveError;
use crate::event::EventPayload;
use crate::store::{emit_event, phase_path, query_events, EventFilter};

fn test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    silverline_db::run_migrations(&conn).expect("migrations should succeed");
    conn
}

fn phase(from: CallPhase, to: CallPhase) -> EventPayload {
    EventPayload::PhaseChanged {
        from,
        to,
        stage: "test".to_string(),
    }
}

#[test]
fn emit_event_assigns_per_call_sequence() {
    let conn = test_db();

    let first = emit_event(&conn, "CA1", &phase(CallPhase::Incoming, CallPhase::AuthCheck))
        .expect("emit should succeed");
    let other_call = emit_event(&conn, "CA2", &phase(CallPhase::Incoming, CallPhase::AuthCheck))
        .expect("emit should succeed");
    let second = emit_event(
        &conn,
        "CA1",
        &EventPayload::Escalated {
            reason: "sentiment".to_string(),
        },
    )
    .expect("emit should succeed");

    assert_eq!(first.seq, 1);
    assert_eq!(other_call.seq, 1, "sequence is scoped to the call");
    assert_eq!(second.seq, 2);
    assert_eq!(second.event_type, "ESCALATED");
}

#[test]
fn payload_decodes_back_to_variant() {
    let conn = test_db();
    let payload = EventPayload::IdentityResolved {
        action: ResolverAction::RequestReEnrollment,
        similarity: Some(0.45),
        attempt_id: 7,
    };
    let event = emit_event(&conn, "CA9", &payload).expect("emit should succeed");

    let stored: String = conn
        .query_row(
            "SELECT payload_json FROM call_event_log WHERE id = ?1",
            [event.id],
            |row| row.get(0),
        )
        .expect("row should exist");
    assert!(stored.contains("\"IDENTITY_RESOLVED\""));
    assert!(stored.contains("request_re_enrollment"));
    assert_eq!(event.payload().expect("decode"), payload);
}

#[test]
fn query_events_filters_by_type_and_cursor() {
    let conn = test_db();
    emit_event(&conn, "CA3", &phase(CallPhase::Incoming, CallPhase::AuthCheck)).unwrap();
    emit_event(
        &conn,
        "CA3",
        &EventPayload::TurnAnswered {
            confidence: AnswerConfidence::High,
            knowledge_entries: 2,
            escalate: false,
        },
    )
    .unwrap();
    emit_event(&conn, "CA3", &phase(CallPhase::AuthCheck, CallPhase::Authenticated)).unwrap();

    let phases = query_events(
        &conn,
        "CA3",
        &EventFilter {
            event_type: Some("PHASE_CHANGED".to_string()),
            ..EventFilter::default()
        },
    )
    .unwrap();
    assert_eq!(phases.len(), 2);

    let after_first = query_events(
        &conn,
        "CA3",
        &EventFilter {
            after_seq: Some(1),
            ..EventFilter::default()
        },
    )
    .unwrap();
    assert_eq!(after_first.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);

    let limited = query_events(
        &conn,
        "CA3",
        &EventFilter {
            limit: Some(1),
            ..EventFilter::default()
        },
    )
    .unwrap();
    assert_eq!(limited.len(), 1);
}

#[test]
fn phase_path_starts_at_incoming() {
    let conn = test_db();
    emit_event(&conn, "CA4", &phase(CallPhase::Incoming, CallPhase::AuthCheck)).unwrap();
    emit_event(&conn, "CA4", &phase(CallPhase::AuthCheck, CallPhase::Signup)).unwrap();
    emit_event(&conn, "CA4", &phase(CallPhase::Signup, CallPhase::Terminated)).unwrap();

    let path = phase_path(&conn, "CA4").expect("path should load");
    assert_eq!(
        path,
        vec![
            CallPhase::Incoming,
            CallPhase::AuthCheck,
            CallPhase::Signup,
            CallPhase::Terminated
        ]
    );
    assert!(is_valid_path(&path));
}

#[test]
fn corrupt_payload_surfaces_serialization_error() {
    let conn = test_db();
    conn.execute(
        "INSERT INTO call_event_log (call_sid, event_type, seq, payload_json)
         VALUES ('CA5', 'PHASE_CHANGED', 1, 'not json')",
        [],
    )
    .unwrap();

    let err = phase_path(&conn, "CA5").expect_err("corrupt payload should fail");
    assert!(matches!(err, ObserveError::Serialization(_)));
}
