//! Key event codes reported by `get_key`.
//!
//! Foreign binaries expect calculator-style codes: printable keys report
//! their character, control keys a code in the 30000 range. The code depends
//! on the modifier layer the key was pressed in.

use crate::hal::{Key, ShiftAlpha};

use super::SHIFTED_ARROW_BASE;

pub const KEY_CTRL_LEFT: i16 = 30020;
pub const KEY_CTRL_UP: i16 = 30018;
pub const KEY_CTRL_DOWN: i16 = 30023;
pub const KEY_CTRL_RIGHT: i16 = 30021;
pub const KEY_CTRL_OK: i16 = 30200;
pub const KEY_CTRL_EXIT: i16 = 30002;
pub const KEY_CTRL_MENU: i16 = 30003;
pub const KEY_CTRL_EXE: i16 = 30004;
pub const KEY_CTRL_SHIFT: i16 = 30006;
pub const KEY_CTRL_ALPHA: i16 = 30007;
pub const KEY_CTRL_XTT: i16 = 30001;
pub const KEY_CTRL_VARS: i16 = 30016;
pub const KEY_CTRL_CATALOG: i16 = 30100;
pub const KEY_CTRL_DEL: i16 = 30025;
pub const KEY_CTRL_AC: i16 = 30015;
pub const KEY_CTRL_PAGEUP: i16 = 30052;
pub const KEY_CTRL_PAGEDOWN: i16 = 30053;
pub const KEY_CTRL_CUT: i16 = 30250;
pub const KEY_CTRL_CLIP: i16 = 30050;
pub const KEY_CTRL_PASTE: i16 = 30036;
pub const KEY_CTRL_F1: i16 = 30009;
pub const KEY_CTRL_F2: i16 = 30010;
pub const KEY_CTRL_F3: i16 = 30011;
pub const KEY_CTRL_F4: i16 = 30012;
pub const KEY_CTRL_F5: i16 = 30013;
pub const KEY_CTRL_F6: i16 = 30014;
pub const KEY_CTRL_F7: i16 = 30201;
pub const KEY_CTRL_F8: i16 = 30202;
pub const KEY_CTRL_F9: i16 = 30203;
pub const KEY_CTRL_F10: i16 = 30204;
pub const KEY_CTRL_F11: i16 = 30205;
pub const KEY_CTRL_F12: i16 = 30206;
pub const KEY_CTRL_F13: i16 = 30207;
pub const KEY_CTRL_F14: i16 = 30208;
pub const KEY_SHIFT_LEFT: i16 = SHIFTED_ARROW_BASE as i16;
pub const KEY_SHIFT_RIGHT: i16 = SHIFTED_ARROW_BASE as i16 + 3;
/// On/Off, and the idle report after the inactivity timeout.
pub const KEY_PRGM_ACON: i16 = 10;

pub const KEY_CHAR_EXPN: i16 = 0xA5;
pub const KEY_CHAR_LN: i16 = 0x85;
pub const KEY_CHAR_LOG: i16 = 0x95;
pub const KEY_CHAR_IMGNRY: i16 = 0x7F50;
pub const KEY_CHAR_POW: i16 = 0xA8;
pub const KEY_CHAR_SIN: i16 = 0x81;
pub const KEY_CHAR_COS: i16 = 0x82;
pub const KEY_CHAR_TAN: i16 = 0x83;
pub const KEY_CHAR_ASIN: i16 = 0x91;
pub const KEY_CHAR_ACOS: i16 = 0x92;
pub const KEY_CHAR_ATAN: i16 = 0x93;
pub const KEY_CHAR_PI: i16 = 0xD0;
pub const KEY_CHAR_ROOT: i16 = 0x86;
pub const KEY_CHAR_SQUARE: i16 = 0x8B;
pub const KEY_CHAR_EXPN10: i16 = 0xB5;
pub const KEY_CHAR_ANS: i16 = 0xC0;
pub const KEY_SHIFT_ANS: i16 = 0xC1;
pub const KEY_CHAR_STORE: i16 = 0x0E;
pub const KEY_CHAR_FACTOR: i16 = 0xDA;
pub const KEY_CHAR_NORMAL: i16 = 0xDB;

/// Marks a key position with no key behind it.
pub const NO_KEY: i16 = -1;

const fn c(ch: u8) -> i16 {
    ch as i16
}

type Layer = [i16; Key::COUNT as usize];

const PLAIN: Layer = [
    KEY_CTRL_LEFT, KEY_CTRL_UP, KEY_CTRL_DOWN, KEY_CTRL_RIGHT, KEY_CTRL_OK, KEY_CTRL_EXIT,
    KEY_CTRL_MENU, KEY_PRGM_ACON, KEY_PRGM_ACON, 9, 10, 11,
    KEY_CTRL_SHIFT, KEY_CTRL_ALPHA, KEY_CTRL_XTT, KEY_CTRL_VARS, KEY_CTRL_CATALOG, KEY_CTRL_DEL,
    KEY_CHAR_EXPN, KEY_CHAR_LN, KEY_CHAR_LOG, KEY_CHAR_IMGNRY, c(b','), KEY_CHAR_POW,
    KEY_CHAR_SIN, KEY_CHAR_COS, KEY_CHAR_TAN, KEY_CHAR_PI, KEY_CHAR_ROOT, KEY_CHAR_SQUARE,
    c(b'7'), c(b'8'), c(b'9'), c(b'('), c(b')'), NO_KEY,
    c(b'4'), c(b'5'), c(b'6'), c(b'*'), c(b'/'), NO_KEY,
    c(b'1'), c(b'2'), c(b'3'), c(b'+'), c(b'-'), NO_KEY,
    c(b'0'), c(b'.'), KEY_CHAR_EXPN10, KEY_CHAR_ANS, KEY_CTRL_EXE, NO_KEY,
];

const SHIFTED: Layer = [
    KEY_SHIFT_LEFT, KEY_CTRL_PAGEUP, KEY_CTRL_PAGEDOWN, KEY_SHIFT_RIGHT, KEY_CTRL_OK, KEY_CTRL_EXIT,
    KEY_CTRL_MENU, KEY_PRGM_ACON, KEY_PRGM_ACON, 9, 10, 11,
    KEY_CTRL_SHIFT, KEY_CTRL_ALPHA, KEY_CTRL_CUT, KEY_CTRL_CLIP, KEY_CTRL_PASTE, KEY_CTRL_AC,
    c(b'['), c(b']'), c(b'{'), c(b'}'), c(b'_'), KEY_CHAR_STORE,
    KEY_CHAR_ASIN, KEY_CHAR_ACOS, KEY_CHAR_ATAN, c(b'='), c(b'<'), c(b'>'),
    KEY_CTRL_F7, KEY_CTRL_F8, KEY_CTRL_F9, KEY_CTRL_F13, KEY_CTRL_F14, NO_KEY,
    KEY_CTRL_F4, KEY_CTRL_F5, KEY_CTRL_F6, KEY_CHAR_FACTOR, c(b'%'), NO_KEY,
    KEY_CTRL_F1, KEY_CTRL_F2, KEY_CTRL_F3, KEY_CHAR_NORMAL, c(b'\\'), NO_KEY,
    KEY_CTRL_F10, KEY_CTRL_F11, KEY_CTRL_F12, KEY_SHIFT_ANS, KEY_CTRL_EXE, NO_KEY,
];

const ALPHA: Layer = [
    KEY_CTRL_LEFT, KEY_CTRL_UP, KEY_CTRL_DOWN, KEY_CTRL_RIGHT, KEY_CTRL_OK, KEY_CTRL_EXIT,
    KEY_CTRL_MENU, KEY_PRGM_ACON, KEY_PRGM_ACON, 9, 10, 11,
    KEY_CTRL_SHIFT, KEY_CTRL_ALPHA, c(b':'), c(b';'), c(b'"'), KEY_CTRL_DEL,
    c(b'a'), c(b'b'), c(b'c'), c(b'd'), c(b'e'), c(b'f'),
    c(b'g'), c(b'h'), c(b'i'), c(b'j'), c(b'k'), c(b'l'),
    c(b'm'), c(b'n'), c(b'o'), c(b'p'), c(b'q'), NO_KEY,
    c(b'r'), c(b's'), c(b't'), c(b'u'), c(b'v'), NO_KEY,
    c(b'w'), c(b'x'), c(b'y'), c(b'z'), c(b' '), NO_KEY,
    c(b'?'), c(b'!'), KEY_CHAR_EXPN10, KEY_CHAR_ANS, KEY_CTRL_EXE, NO_KEY,
];

const SHIFTED_ALPHA: Layer = [
    KEY_SHIFT_LEFT, KEY_CTRL_PAGEUP, KEY_CTRL_PAGEDOWN, KEY_SHIFT_RIGHT, KEY_CTRL_OK, KEY_CTRL_EXIT,
    KEY_CTRL_MENU, KEY_PRGM_ACON, KEY_PRGM_ACON, 9, 10, 11,
    KEY_CTRL_SHIFT, KEY_CTRL_ALPHA, c(b':'), c(b';'), c(b'\''), c(b'%'),
    c(b'A'), c(b'B'), c(b'C'), c(b'D'), c(b'E'), c(b'F'),
    c(b'G'), c(b'H'), c(b'I'), c(b'J'), c(b'K'), c(b'L'),
    c(b'M'), c(b'N'), c(b'O'), c(b'P'), c(b'Q'), NO_KEY,
    c(b'R'), c(b'S'), c(b'T'), c(b'U'), c(b'V'), NO_KEY,
    c(b'W'), c(b'X'), c(b'Y'), c(b'Z'), c(b' '), NO_KEY,
    c(b'?'), c(b'!'), KEY_CHAR_EXPN10, KEY_CHAR_ANS, KEY_CTRL_EXE, NO_KEY,
];

static LAYERS: [Layer; 4] = [PLAIN, SHIFTED, ALPHA, SHIFTED_ALPHA];

/// Code for `key` pressed in modifier state `status`. Keys past the table
/// report [`NO_KEY`].
pub fn translate(key: Key, status: ShiftAlpha) -> i32 {
    let layer = status.shift() as usize + 2 * status.alpha() as usize;
    LAYERS[layer]
        .get(key.code() as usize)
        .copied()
        .unwrap_or(NO_KEY) as i32
}
