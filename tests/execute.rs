//! Running archive executables against a live host through the capability
//! table, the way foreign code sees it.

mod common;

use core::ffi::c_char;

use common::{Board, ARCHIVE_BASE, ARCHIVE_LEN};
use extapp_firmware::api::native::{Session, NATIVE_TABLE};
use extapp_firmware::api::{ApiSlot, CapabilityTable, Host, API_VERSION};
use extapp_firmware::loader::{EntryCall, EntryInvoker, ExecState};
use extapp_firmware::{ExecError, Loader, Preferences};

type FileWrite = unsafe extern "C" fn(*const c_char, *const c_char, usize, i32) -> bool;
type InExamMode = extern "C" fn() -> bool;

/// Stands in for foreign code: checks the ABI version, then writes a file
/// through the table it was handed.
#[derive(Default)]
struct ForeignStub {
    entered: Vec<u32>,
}

fn slot<F: Copy>(table: &CapabilityTable, slot: ApiSlot) -> F {
    let raw = table.get(slot).unwrap();
    unsafe { core::mem::transmute_copy(&raw) }
}

impl EntryInvoker for ForeignStub {
    fn invoke(&mut self, call: EntryCall<'_>) -> u32 {
        self.entered.push(call.address);
        if call.api_version != API_VERSION {
            return 1;
        }
        let write: FileWrite = slot(call.table, ApiSlot::FileWrite);
        let exam: InExamMode = slot(call.table, ApiSlot::InExamMode);
        call.heap[..4].copy_from_slice(b"ran!");
        let ok = unsafe {
            write(
                b"out.txt\0".as_ptr() as *const c_char,
                call.heap.as_ptr() as *const c_char,
                4,
                0,
            )
        };
        match (ok, exam()) {
            (true, false) => 0,
            (true, true) => 2,
            _ => 3,
        }
    }
}

fn entry_word(offset: u32) -> [u8; 4] {
    (ARCHIVE_BASE + offset).to_le_bytes()
}

fn board() -> Board {
    let inside = entry_word(0x600);
    let last = entry_word(ARCHIVE_LEN as u32 - 4);
    let past = entry_word(ARCHIVE_LEN as u32);
    let below = (ARCHIVE_BASE - 4).to_le_bytes();
    Board::new(&[
        ("hello.bin", true, &inside),
        ("last.bin", true, &last),
        ("past.bin", true, &past),
        ("below.bin", true, &below),
        ("stub.bin", true, &[0x00, 0x20]),
        ("readme.txt", false, &inside),
    ])
}

fn run(host: &mut Host<'_>, name: &str, stub: &mut ForeignStub) -> (Result<u32, ExecError>, ExecState) {
    let archive = host.archive();
    let prefs = host.prefs();
    let mut loader = Loader::new(&NATIVE_TABLE, host.map().exec_window);
    let mut heap = [0u8; 32];
    let result = {
        let _session = Session::install(host).unwrap();
        loader.execute(&archive, prefs, name, &mut heap, stub)
    };
    (result, loader.state())
}

#[test]
fn foreign_code_reaches_host_through_table() {
    let _serial = common::serial();
    let mut board = board();
    let mut stub = ForeignStub::default();

    board.with_host(Preferences::new(), |host| {
        let (result, state) = run(host, "hello.bin", &mut stub);
        assert_eq!(result, Ok(0));
        assert_eq!(state, ExecState::Returned(0));
        let record = host.storage().record_named(b"out.txt").unwrap();
        assert_eq!(record.value(), b"ran!");
    });
    assert_eq!(stub.entered, [ARCHIVE_BASE + 0x600]);
}

#[test]
fn exam_mode_is_visible_to_foreign_code() {
    let _serial = common::serial();
    let mut board = board();
    let mut stub = ForeignStub::default();
    let exam = Preferences::new().with_exam_mode(true);

    board.with_host(exam, |host| {
        assert_eq!(run(host, "hello.bin", &mut stub).0, Ok(2));
        assert_eq!(
            run(host, "readme.txt", &mut stub).0,
            Err(ExecError::NotExecutable)
        );
    });
    assert_eq!(stub.entered.len(), 1);
}

#[test]
fn entry_outside_window_never_runs() {
    let _serial = common::serial();
    let mut board = board();
    let mut stub = ForeignStub::default();
    let before = board.ram.clone();

    board.with_host(Preferences::new(), |host| {
        for name in ["past.bin", "below.bin", "stub.bin"] {
            let (result, state) = run(host, name, &mut stub);
            assert_eq!(result, Err(ExecError::InvalidEntryPoint), "{}", name);
            assert_eq!(state, ExecState::Rejected(ExecError::InvalidEntryPoint));
        }
        assert_eq!(run(host, "gone.bin", &mut stub).0, Err(ExecError::NotFound));
        assert_eq!(run(host, "readme.txt", &mut stub).0, Err(ExecError::NotExecutable));
        assert!(host.storage().record_named(b"out.txt").is_none());
    });
    assert!(stub.entered.is_empty());
    assert_eq!(board.ram, before);
}

#[test]
fn last_word_of_window_is_enterable() {
    let _serial = common::serial();
    let mut board = board();
    let mut stub = ForeignStub::default();

    board.with_host(Preferences::new(), |host| {
        assert_eq!(run(host, "last.bin", &mut stub).0, Ok(0));
    });
    assert_eq!(stub.entered, [ARCHIVE_BASE + ARCHIVE_LEN as u32 - 4]);
}

#[test]
fn second_session_is_refused() {
    let _serial = common::serial();
    let mut board = board();
    let mut other = self::board();

    board.with_host(Preferences::new(), |host| {
        let _session = Session::install(host).unwrap();
        other.with_host(Preferences::new(), |inner| {
            assert!(Session::install(inner).is_none());
        });
    });
}
