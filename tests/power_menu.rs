//! Power-key menu: slot selection with confirmation, backups, brightness
//! and the idle timeout.

mod common;

use common::{Board, FIRMWARE_BASE, FIRMWARE_SLOT_LEN, VARIANT_A_MAGIC};
use extapp_firmware::bootloader::menu::MenuOutcome;
use extapp_firmware::bootloader::{SlotError, Variant};
use extapp_firmware::config::{BRIGHTNESS_MAX, BRIGHTNESS_STEP, DEFAULT_BRIGHTNESS};
use extapp_firmware::hal::sim::SimReset;
use extapp_firmware::hal::Key;
use extapp_firmware::Preferences;

fn board() -> Board {
    let mut board = Board::new(&[]);
    board.install_firmware(0, b"1.2.0", Some(VARIANT_A_MAGIC));
    board.install_firmware(1, b"12.4.0", None);
    board.install_firmware(2, b"16.1.0", None);
    board
}

fn press(board: &mut Board, keys: &[Key]) {
    for key in keys {
        assert!(board.keyboard.press(*key));
    }
}

#[test]
fn falls_through_after_idle_timeout() {
    let mut board = board();
    let outcome = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight)
    });
    assert_eq!(outcome, MenuOutcome::Continue);
    assert!(board.display.texts > 0);
}

#[test]
fn back_dismisses() {
    let mut board = board();
    press(&mut board, &[Key::BACK, Key::ONE]);
    let outcome = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight)
    });
    assert_eq!(outcome, MenuOutcome::Continue);
    assert_eq!(board.keyboard.pending(), 1);
}

#[test]
fn slot_boots_only_after_confirmation() {
    let mut board = board();
    press(&mut board, &[Key::TWO, Key::BACK, Key::ONE, Key::EXE]);
    let (outcome, status) = board.with_menu(Preferences::new(), |menu, host, backlight| {
        (menu.run(host, backlight), menu.status())
    });
    // The first selection was cancelled by Back, the second confirmed.
    match outcome {
        MenuOutcome::Boot(handoff) => {
            assert_eq!(handoff.index, 0);
            assert_eq!(handoff.base, FIRMWARE_BASE);
            assert_eq!(handoff.variant, Variant::VariantA);
        }
        other => panic!("expected a hand-off, got {:?}", other),
    }
    assert_eq!(status, "Cancelled");
}

#[test]
fn untrusted_and_empty_slots_are_refused() {
    let mut board = board();
    board.firmware[0x08] = 0;
    press(&mut board, &[Key::THREE, Key::OK]);
    let status = board.with_menu(Preferences::new(), |menu, host, backlight| {
        assert_eq!(menu.run(host, backlight), MenuOutcome::Continue);
        menu.status()
    });
    assert_eq!(status, "Cannot boot this slot");
    assert_eq!(board.detector().boot_slot(2), Err(SlotError::SlotUnrecognized));
    assert_eq!(board.detector().boot_slot(0), Err(SlotError::SlotInvalid));
}

#[test]
#[should_panic(expected = "system reset into slot at 0x90420000")]
fn confirmed_slot_resets_into_it() {
    let mut board = board();
    press(&mut board, &[Key::TWO, Key::OK]);
    let outcome = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight)
    });
    assert_eq!(FIRMWARE_BASE + FIRMWARE_SLOT_LEN, 0x9042_0000);
    if let MenuOutcome::Boot(handoff) = outcome {
        handoff.commit(&mut SimReset);
    }
}

#[test]
fn save_then_restore_backup() {
    let mut board = board();
    board.with_host(Preferences::new(), |host| {
        host.storage_mut().create_record(b"a.py", b"\x01x=1").unwrap();
    });
    let saved = board.ram.clone();

    press(&mut board, &[Key::FIVE, Key::BACK]);
    let status = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight);
        menu.status()
    });
    assert_eq!(status, "Backup saved");

    board.with_host(Preferences::new(), |host| {
        host.storage_mut().destroy(b"a.py").unwrap();
    });
    press(&mut board, &[Key::FOUR, Key::OK, Key::BACK]);
    let status = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight);
        menu.status()
    });
    assert_eq!(status, "Backup restored");
    assert_eq!(board.ram, saved);
}

#[test]
fn restore_needs_a_backup_and_confirmation() {
    let mut board = board();
    press(&mut board, &[Key::FOUR, Key::BACK]);
    let status = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight);
        menu.status()
    });
    assert_eq!(status, "No backup found");

    board.with_host(Preferences::new(), |host| {
        host.storage_mut().create_record(b"a.py", b"\x01x=1").unwrap();
        host.save_backup(0).unwrap();
        host.storage_mut().destroy(b"a.py").unwrap();
    });
    let edited = board.ram.clone();
    press(&mut board, &[Key::FOUR, Key::MINUS, Key::BACK]);
    let status = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight);
        menu.status()
    });
    assert_eq!(status, "Cancelled");
    assert_eq!(board.ram, edited);
}

#[test]
fn brightness_steps_and_saturates() {
    let mut board = board();
    press(&mut board, &[Key::PLUS; 12]);
    press(&mut board, &[Key::MINUS, Key::BACK]);
    let (level, saved) = board.with_menu(Preferences::new(), |menu, host, backlight| {
        menu.run(host, backlight);
        (menu.brightness(), host.prefs().brightness)
    });
    assert!(DEFAULT_BRIGHTNESS as u32 + 12 * BRIGHTNESS_STEP as u32 > BRIGHTNESS_MAX as u32);
    assert_eq!(level, BRIGHTNESS_MAX - BRIGHTNESS_STEP);
    assert_eq!(board.backlight.level, level);
    assert_eq!(saved, level);
}

#[test]
fn brightness_is_kept_in_preferences() {
    let mut board = board();
    press(&mut board, &[Key::MINUS, Key::MINUS, Key::BACK]);
    let prefs = board.with_menu(Preferences::new().with_exam_mode(true), |menu, host, backlight| {
        menu.run(host, backlight);
        host.prefs()
    });
    assert_eq!(prefs.brightness, DEFAULT_BRIGHTNESS - 2 * BRIGHTNESS_STEP);
    // Only the brightness changes.
    assert!(prefs.exam_mode);
    assert!(!prefs.write_permission);
}
