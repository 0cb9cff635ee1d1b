use std::process::Command;
use std::time::Duration;

use rewind_native::LiveProcess;
use rewind_proc::{
    Error, ErrorKind, ExecutionConfig, Info, Process, ProcessManipulation, RecordingManipulation,
    ThreadInfo,
};
use test_log::test;

#[cfg(target_arch = "x86_64")]
const BREAKPOINT_INSTR: &[u8] = &[0xcc];

#[cfg(target_arch = "aarch64")]
const BREAKPOINT_INSTR: &[u8] = &[0x00, 0x00, 0x20, 0xd4];

fn spawn(program: &str, args: &[&str]) -> LiveProcess {
    let mut command = Command::new(program);
    command.args(args);

    LiveProcess::spawn(command, ExecutionConfig::default()).unwrap()
}

#[test]
fn exit_status_is_reported() {
    let mut process = spawn("/bin/sh", &["-c", "exit 7"]);

    let pid = process.pid();

    let err = process.resume().unwrap_err();
    assert!(matches!(err, Error::ProcessExited { pid: p, status: 7 } if p == pid));

    assert_eq!(process.valid().unwrap_err().kind(), ErrorKind::ProcessExited);
    assert_eq!(process.resume().unwrap_err().kind(), ErrorKind::ProcessExited);
    assert_eq!(process.detach(false).unwrap_err().kind(), ErrorKind::ProcessExited);
}

#[test]
fn break_at_entry_point() {
    let mut process = spawn("/bin/true", &[]);

    assert!(process.executable_path().ends_with("true"));

    let entry = process.entry_point().unwrap();

    let mut original = vec![0u8; BREAKPOINT_INSTR.len()];
    process.read_memory(entry, &mut original).unwrap();

    assert_eq!(process.write_breakpoint(entry, BREAKPOINT_INSTR).unwrap(), original);
    assert_eq!(
        process.write_breakpoint(entry, BREAKPOINT_INSTR).unwrap_err().kind(),
        ErrorKind::MemoryAccess
    );

    let thread = process.resume().unwrap();
    assert_eq!(thread.instr_addr(), entry);
    assert_eq!(process.current_thread(), Some(&thread));

    // the original instruction is executed
    process.step_instruction().unwrap();
    assert_ne!(process.current_thread().unwrap().instr_addr(), entry);

    process.clear_breakpoint(entry, &original).unwrap();

    let mut restored = vec![0u8; BREAKPOINT_INSTR.len()];
    process.read_memory(entry, &mut restored).unwrap();
    assert_eq!(restored, original);

    let err = process.resume().unwrap_err();
    assert!(matches!(err, Error::ProcessExited { status: 0, .. }));
}

#[test]
fn manual_stop_interrupts_resume() {
    let mut process = spawn("/bin/sleep", &["10"]);

    let handle = process.manual_stop_handle();

    let requester = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        handle.request().unwrap();
    });

    let thread = process.resume().unwrap();
    requester.join().unwrap();

    assert_eq!(process.current_thread(), Some(&thread));
    assert!(process.check_and_clear_manual_stop_request());
    assert!(!process.check_and_clear_manual_stop_request());

    process.detach(true).unwrap();

    assert_eq!(process.valid().unwrap_err().kind(), ErrorKind::ProcessDetached);
}

#[test]
fn recording_operations_are_unsupported() {
    let mut process = spawn("/bin/true", &[]);

    assert!(process.recorded().is_none());
    assert_eq!(process.when().unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(process.restart("").unwrap_err().kind(), ErrorKind::Unsupported);
    assert_eq!(process.checkpoint("start").unwrap_err().kind(), ErrorKind::Unsupported);

    process.detach(true).unwrap();
}
