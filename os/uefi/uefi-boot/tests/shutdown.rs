mod common;

use common::MockFirmware;
use uefi::Status;
use uefi_boot::firmware::MapKey;
use uefi_boot::handoff::{ExitState, HandoffError, ShutdownHandshake};
use uefi_boot::memory_map::{MemoryMapError, MemoryMapSnapshot, MemoryMapStorage};

fn snapshot_of<'a>(fw: &mut MockFirmware, storage: &'a mut MemoryMapStorage) -> MemoryMapSnapshot<'a> {
    let mut snapshot = MemoryMapSnapshot::new(storage.as_mut_slice());
    snapshot.acquire(fw).unwrap();
    snapshot
}

#[test]
fn current_key_exits_on_the_first_attempt() {
    let mut fw = MockFirmware::default();
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = snapshot_of(&mut fw, &mut storage);

    let mut handshake = ShutdownHandshake::new();
    assert_eq!(handshake.state(), ExitState::Running);
    let exited = handshake.run(&mut fw, &mut snapshot).unwrap();

    assert_eq!(handshake.state(), ExitState::Stopped);
    assert_eq!(exited.attempts(), 1);
    assert_eq!(exited.map_key(), MapKey::new(0x1001));
    assert_eq!(fw.map_calls, 1);
    assert_eq!(fw.exit_calls, [MapKey::new(0x1001)]);
}

#[test]
fn stale_key_is_refreshed_once_and_retried_once() {
    let mut fw = MockFirmware::default();
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = snapshot_of(&mut fw, &mut storage);
    fw.change_map();

    let mut handshake = ShutdownHandshake::new();
    let exited = handshake.run(&mut fw, &mut snapshot).unwrap();

    assert_eq!(handshake.state(), ExitState::Stopped);
    assert_eq!(exited.attempts(), 2);
    // One acquisition up front, exactly one re-acquisition.
    assert_eq!(fw.map_calls, 2);
    assert_eq!(fw.exit_calls, [MapKey::new(0x1001), MapKey::new(0x1003)]);
    assert_eq!(snapshot.map_key(), MapKey::new(0x1003));
    assert!(fw.exited);
}

#[test]
fn second_rejection_halts_without_a_third_attempt() {
    let mut fw = MockFirmware::default();
    fw.exit_script.extend([Err(Status::INVALID_PARAMETER), Err(Status::INVALID_PARAMETER), Ok(())]);
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = snapshot_of(&mut fw, &mut storage);

    let mut handshake = ShutdownHandshake::new();
    let err = handshake.run(&mut fw, &mut snapshot).unwrap_err();

    assert_eq!(
        err,
        HandoffError::ExitRejected {
            key: MapKey::new(0x1002),
            status: Status::INVALID_PARAMETER
        }
    );
    assert_eq!(handshake.state(), ExitState::Halted);
    assert_eq!(handshake.attempts(), 2);
    assert_eq!(fw.exit_calls.len(), 2);
    assert_eq!(fw.map_calls, 2);
    assert!(!fw.exited);
}

#[test]
fn halted_handshake_never_calls_the_firmware_again() {
    let mut fw = MockFirmware::default();
    fw.exit_script.extend([Err(Status::INVALID_PARAMETER), Err(Status::INVALID_PARAMETER)]);
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = snapshot_of(&mut fw, &mut storage);

    let mut handshake = ShutdownHandshake::new();
    handshake.run(&mut fw, &mut snapshot).unwrap_err();
    let map_calls = fw.map_calls;

    let err = handshake.run(&mut fw, &mut snapshot).unwrap_err();
    assert_eq!(
        err,
        HandoffError::HandshakeFinished {
            state: ExitState::Halted
        }
    );
    assert_eq!(Status::from(err), Status::ABORTED);
    assert_eq!(handshake.state(), ExitState::Halted);
    assert_eq!(handshake.attempts(), 2);
    assert_eq!(fw.exit_calls.len(), 2);
    assert_eq!(fw.map_calls, map_calls);
}

#[test]
fn stopped_handshake_does_not_exit_twice() {
    let mut fw = MockFirmware::default();
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = snapshot_of(&mut fw, &mut storage);

    let mut handshake = ShutdownHandshake::new();
    handshake.run(&mut fw, &mut snapshot).unwrap();

    // The mock asserts on any firmware call after a successful exit.
    let err = handshake.run(&mut fw, &mut snapshot).unwrap_err();
    assert_eq!(
        err,
        HandoffError::HandshakeFinished {
            state: ExitState::Stopped
        }
    );
    assert_eq!(fw.exit_calls.len(), 1);
}

#[test]
fn failed_refresh_halts_before_the_retry() {
    let mut fw = MockFirmware::default();
    let mut storage = MemoryMapStorage::new();
    let mut snapshot = snapshot_of(&mut fw, &mut storage);
    fw.change_map();
    fw.map_failures.push_back(Status::BUFFER_TOO_SMALL);

    let mut handshake = ShutdownHandshake::new();
    let err = handshake.run(&mut fw, &mut snapshot).unwrap_err();

    assert!(matches!(
        err,
        HandoffError::MemoryMap {
            source: MemoryMapError::BufferTooSmall { .. },
            ..
        }
    ));
    assert_eq!(handshake.state(), ExitState::Halted);
    assert_eq!(fw.exit_calls.len(), 1);
}
