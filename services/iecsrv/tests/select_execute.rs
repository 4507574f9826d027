//! Select-before-operate command flow through the server

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use iecsrv::{
    CauseOfTransmission, CommandMode, ConnectionEvent, PointSpec, ResponseState, TypeId,
};

use support::*;

const ACT_CON: (u8, bool) = (7, false);
const ACT_CON_NEG: (u8, bool) = (7, true);
const ACT_TERM: (u8, bool) = (10, false);

/// Station 1: SbE single command 100 with auto-return to 101, direct command 200
fn setup(select_timeout_ms: u64) -> (Fixture, Arc<AtomicUsize>) {
    let fixture = Fixture::new(select_timeout_ms);
    let station = fixture.server.add_station(1).unwrap();
    let sbe = station
        .add_point(
            PointSpec::new(100, TypeId::C_SC_NA_1)
                .command_mode(CommandMode::SelectAndExecute)
                .related(101, true),
        )
        .unwrap();
    station
        .add_point(PointSpec::new(101, TypeId::M_SP_NA_1))
        .unwrap();
    station
        .add_point(PointSpec::new(200, TypeId::C_SC_NA_1))
        .unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    sbe.set_on_receive(move |_, _, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        ResponseState::Success
    });
    (fixture, received)
}

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn test_select_then_execute() {
    let (f, received) = setup(10_000);

    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    assert_eq!(f.replies(A), vec![ACT_CON]);
    assert_eq!(f.server.selection_holder(1, 100), Some(OA_A));
    assert_eq!(received.load(Ordering::SeqCst), 0);

    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, false));
    assert_eq!(f.replies(A), vec![ACT_CON, ACT_CON, ACT_TERM]);
    assert_eq!(received.load(Ordering::SeqCst), 1);

    let station = f.server.get_station(1).unwrap();
    assert_eq!(station.get_point(100).unwrap().value(), 1.0);

    // Selection is released shortly after execution
    assert!(wait_until(|| f.server.selection_holder(1, 100).is_none()));
}

#[test]
fn test_execute_triggers_auto_return() {
    let (f, _) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, false));

    assert!(wait_until(|| {
        f.transport
            .queued()
            .iter()
            .any(|a| a.cot == CauseOfTransmission::ReturnInfoRemote && a.objects()[0].ioa == 101)
    }));
}

#[test]
fn test_direct_command_skips_selection() {
    let (f, _) = setup(10_000);
    f.server.on_asdu(B, single_command(OA_B, 200, 1.0, false));
    assert_eq!(f.replies(B), vec![ACT_CON]);
    assert_eq!(f.server.active_selection_count(), 0);

    // Selecting a direct point is refused
    f.server.on_asdu(B, single_command(OA_B, 200, 1.0, true));
    assert_eq!(f.replies(B), vec![ACT_CON, ACT_CON_NEG]);
}

// ============================================================================
// Arbitration
// ============================================================================

#[test]
fn test_competing_select_is_refused() {
    let (f, received) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    f.server.on_asdu(B, single_command(OA_B, 100, 0.0, true));

    assert_eq!(f.replies(A), vec![ACT_CON]);
    assert_eq!(f.replies(B), vec![ACT_CON_NEG]);
    assert_eq!(f.server.selection_holder(1, 100), Some(OA_A));
    assert_eq!(received.load(Ordering::SeqCst), 0);
}

#[test]
fn test_execute_by_other_connection_fails_without_receive() {
    let (f, received) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    f.server.on_asdu(B, single_command(OA_B, 100, 0.0, false));

    assert_eq!(f.replies(B), vec![ACT_CON_NEG]);
    assert_eq!(received.load(Ordering::SeqCst), 0);
    assert_eq!(f.server.selection_holder(1, 100), Some(OA_A));
    let station = f.server.get_station(1).unwrap();
    assert_eq!(station.get_point(100).unwrap().value(), 0.0);
}

#[test]
fn test_execute_without_selection_fails() {
    let (f, received) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, false));
    assert_eq!(f.replies(A), vec![ACT_CON_NEG]);
    assert_eq!(received.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rejected_execute_keeps_selection() {
    let (f, _) = setup(10_000);
    let station = f.server.get_station(1).unwrap();
    station
        .get_point(100)
        .unwrap()
        .set_on_receive(|_, _, _| ResponseState::Failure);

    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, false));
    assert_eq!(f.replies(A), vec![ACT_CON, ACT_CON_NEG]);
    assert_eq!(f.server.selection_holder(1, 100), Some(OA_A));
}

// ============================================================================
// Release
// ============================================================================

#[test]
fn test_reselect_after_execute_survives_release() {
    let (f, received) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, false));
    f.server.on_asdu(A, single_command(OA_A, 100, 0.0, true));
    assert_eq!(f.replies(A), vec![ACT_CON, ACT_CON, ACT_TERM, ACT_CON]);

    // Outlast the delayed release of the first selection
    std::thread::sleep(std::time::Duration::from_millis(250));
    assert_eq!(f.server.selection_holder(1, 100), Some(OA_A));

    f.server.on_asdu(A, single_command(OA_A, 100, 0.0, false));
    assert_eq!(
        f.replies(A),
        vec![ACT_CON, ACT_CON, ACT_TERM, ACT_CON, ACT_CON, ACT_TERM]
    );
    assert_eq!(received.load(Ordering::SeqCst), 2);
}

#[test]
fn test_expired_selection_is_terminated_and_freed() {
    let (f, _) = setup(150);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));

    assert!(wait_until(|| {
        f.transport
            .direct(A)
            .iter()
            .any(|a| a.cot == CauseOfTransmission::ActivationTermination && a.objects()[0].ioa == 100)
    }));
    assert_eq!(f.server.selection_holder(1, 100), None);

    f.server.on_asdu(B, single_command(OA_B, 100, 1.0, true));
    assert_eq!(f.replies(B), vec![ACT_CON]);
}

#[test]
fn test_deactivation_releases_selection() {
    let (f, _) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));

    let deactivate = command(
        TypeId::C_SC_NA_1,
        CauseOfTransmission::Deactivation,
        OA_A,
        1,
        100,
        1.0,
        true,
    );
    f.server.on_asdu(A, deactivate);
    assert_eq!(f.replies(A), vec![ACT_CON, (9, false)]);
    assert_eq!(f.server.selection_holder(1, 100), None);
}

#[test]
fn test_closed_connection_releases_selection() {
    let (f, _) = setup(10_000);
    f.server.on_asdu(A, single_command(OA_A, 100, 1.0, true));
    f.server.on_connection_event(A, ConnectionEvent::Closed);

    assert_eq!(f.server.active_selection_count(), 0);
    f.server.on_asdu(B, single_command(OA_B, 100, 1.0, true));
    assert_eq!(f.replies(B), vec![ACT_CON]);
}
