//! Scancode decoding for keyboard-emulating readers
//!
//! Readers type the tag code as a burst of key presses (US layout, no
//! modifiers) followed by Enter. Only key-down transitions carry data.
//!
//! Table (Linux input key codes):
//! - 2..=11: digits 1-9, 0
//! - 16..=25, 30..=38, 44..=50: letters
//! - 12, 13, 26, 27, 39, 40, 41, 43, 51, 52, 53: punctuation
//! - 28: Enter (terminator)
//! - everything else (Esc, Backspace, Tab, Ctrl, Shift, Alt, ...): ignored

use crate::input::KeyTransition;

/// Linux KEY_ENTER
pub const KEY_ENTER: u16 = 28;

/// Key code -> character, indexed by key code. `None` = ignored.
const KEY_TABLE: [Option<char>; 54] = [
    None,       // 0  reserved
    None,       // 1  Esc
    Some('1'),  // 2
    Some('2'),  // 3
    Some('3'),  // 4
    Some('4'),  // 5
    Some('5'),  // 6
    Some('6'),  // 7
    Some('7'),  // 8
    Some('8'),  // 9
    Some('9'),  // 10
    Some('0'),  // 11
    Some('-'),  // 12
    Some('='),  // 13
    None,       // 14 Backspace
    None,       // 15 Tab
    Some('Q'),  // 16
    Some('W'),  // 17
    Some('E'),  // 18
    Some('R'),  // 19
    Some('T'),  // 20
    Some('Y'),  // 21
    Some('U'),  // 22
    Some('I'),  // 23
    Some('O'),  // 24
    Some('P'),  // 25
    Some('['),  // 26
    Some(']'),  // 27
    None,       // 28 Enter (handled separately)
    None,       // 29 Left Ctrl
    Some('A'),  // 30
    Some('S'),  // 31
    Some('D'),  // 32
    Some('F'),  // 33
    Some('G'),  // 34
    Some('H'),  // 35
    Some('J'),  // 36
    Some('K'),  // 37
    Some('L'),  // 38
    Some(';'),  // 39
    Some('"'),  // 40
    Some('`'),  // 41
    None,       // 42 Left Shift
    Some('\\'), // 43
    Some('Z'),  // 44
    Some('X'),  // 45
    Some('C'),  // 46
    Some('V'),  // 47
    Some('B'),  // 48
    Some('N'),  // 49
    Some('M'),  // 50
    Some(','),  // 51
    Some('.'),  // 52
    Some('/'),  // 53
];

/// Result of decoding one raw key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// Append this character to the device buffer
    Char(char),
    /// Flush the device buffer as a completed code
    Terminator,
    /// Nothing to do
    Ignore,
}

/// Decode a raw key event. Stateless; unknown keys and non-press
/// transitions are ignored rather than treated as errors.
pub fn decode(key: u16, transition: KeyTransition) -> Decoded {
    if transition != KeyTransition::Pressed {
        return Decoded::Ignore;
    }

    if key == KEY_ENTER {
        return Decoded::Terminator;
    }

    match KEY_TABLE.get(key as usize) {
        Some(Some(c)) => Decoded::Char(*c),
        _ => Decoded::Ignore,
    }
}

/// Reverse lookup: the key a reader presses to type `c`
pub fn key_for(c: char) -> Option<u16> {
    KEY_TABLE
        .iter()
        .position(|entry| *entry == Some(c))
        .map(|idx| idx as u16)
}
