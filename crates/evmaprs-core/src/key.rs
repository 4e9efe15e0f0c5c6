// Evmaprs Key Type
// Kernel key codes (input-event-codes.h) used as targets of key actions

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Represents a single keyboard key code.
///
/// This is a newtype wrapper around u16 for type safety.
/// The numeric values match Linux input-event-codes.h definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Key(pub u16);

impl Key {
    /// Get the raw numeric code value
    pub fn code(self) -> u16 {
        self.0
    }

    /// Get the kernel name of this key (e.g. `KEY_ENTER`)
    pub fn name(self) -> &'static str {
        key_name(self.0)
    }
}

impl From<u16> for Key {
    fn from(code: u16) -> Self {
        Key(code)
    }
}

impl From<Key> for u16 {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_from_name(s).ok_or_else(|| format!("Unknown key: {}", s))
    }
}

/// Highest code registered on the virtual keyboard by default.
pub const STANDARD_KEY_MAX: u16 = 255;

// Kernel names without the KEY_ prefix, in code order.
const KEY_TABLE: &[(&str, u16)] = &[
    ("RESERVED", 0),
    ("ESC", 1),
    ("1", 2),
    ("2", 3),
    ("3", 4),
    ("4", 5),
    ("5", 6),
    ("6", 7),
    ("7", 8),
    ("8", 9),
    ("9", 10),
    ("0", 11),
    ("MINUS", 12),
    ("EQUAL", 13),
    ("BACKSPACE", 14),
    ("TAB", 15),
    ("Q", 16),
    ("W", 17),
    ("E", 18),
    ("R", 19),
    ("T", 20),
    ("Y", 21),
    ("U", 22),
    ("I", 23),
    ("O", 24),
    ("P", 25),
    ("LEFTBRACE", 26),
    ("RIGHTBRACE", 27),
    ("ENTER", 28),
    ("LEFTCTRL", 29),
    ("A", 30),
    ("S", 31),
    ("D", 32),
    ("F", 33),
    ("G", 34),
    ("H", 35),
    ("J", 36),
    ("K", 37),
    ("L", 38),
    ("SEMICOLON", 39),
    ("APOSTROPHE", 40),
    ("GRAVE", 41),
    ("LEFTSHIFT", 42),
    ("BACKSLASH", 43),
    ("Z", 44),
    ("X", 45),
    ("C", 46),
    ("V", 47),
    ("B", 48),
    ("N", 49),
    ("M", 50),
    ("COMMA", 51),
    ("DOT", 52),
    ("SLASH", 53),
    ("RIGHTSHIFT", 54),
    ("KPASTERISK", 55),
    ("LEFTALT", 56),
    ("SPACE", 57),
    ("CAPSLOCK", 58),
    ("F1", 59),
    ("F2", 60),
    ("F3", 61),
    ("F4", 62),
    ("F5", 63),
    ("F6", 64),
    ("F7", 65),
    ("F8", 66),
    ("F9", 67),
    ("F10", 68),
    ("NUMLOCK", 69),
    ("SCROLLLOCK", 70),
    ("KP7", 71),
    ("KP8", 72),
    ("KP9", 73),
    ("KPMINUS", 74),
    ("KP4", 75),
    ("KP5", 76),
    ("KP6", 77),
    ("KPPLUS", 78),
    ("KP1", 79),
    ("KP2", 80),
    ("KP3", 81),
    ("KP0", 82),
    ("KPDOT", 83),
    ("ZENKAKUHANKAKU", 85),
    ("102ND", 86),
    ("F11", 87),
    ("F12", 88),
    ("RO", 89),
    ("KATAKANA", 90),
    ("HIRAGANA", 91),
    ("HENKAN", 92),
    ("KATAKANAHIRAGANA", 93),
    ("MUHENKAN", 94),
    ("KPJPCOMMA", 95),
    ("KPENTER", 96),
    ("RIGHTCTRL", 97),
    ("KPSLASH", 98),
    ("SYSRQ", 99),
    ("RIGHTALT", 100),
    ("LINEFEED", 101),
    ("HOME", 102),
    ("UP", 103),
    ("PAGEUP", 104),
    ("LEFT", 105),
    ("RIGHT", 106),
    ("END", 107),
    ("DOWN", 108),
    ("PAGEDOWN", 109),
    ("INSERT", 110),
    ("DELETE", 111),
    ("MACRO", 112),
    ("MUTE", 113),
    ("VOLUMEDOWN", 114),
    ("VOLUMEUP", 115),
    ("POWER", 116),
    ("KPEQUAL", 117),
    ("KPPLUSMINUS", 118),
    ("PAUSE", 119),
    ("SCALE", 120),
    ("KPCOMMA", 121),
    ("HANGEUL", 122),
    ("HANJA", 123),
    ("YEN", 124),
    ("LEFTMETA", 125),
    ("RIGHTMETA", 126),
    ("COMPOSE", 127),
    ("STOP", 128),
    ("AGAIN", 129),
    ("PROPS", 130),
    ("UNDO", 131),
    ("FRONT", 132),
    ("COPY", 133),
    ("OPEN", 134),
    ("PASTE", 135),
    ("FIND", 136),
    ("CUT", 137),
    ("HELP", 138),
    ("MENU", 139),
    ("CALC", 140),
    ("SETUP", 141),
    ("SLEEP", 142),
    ("WAKEUP", 143),
    ("FILE", 144),
    ("SENDFILE", 145),
    ("DELETEFILE", 146),
    ("XFER", 147),
    ("PROG1", 148),
    ("PROG2", 149),
    ("WWW", 150),
    ("MSDOS", 151),
    ("SCREENLOCK", 152),
    ("ROTATE_DISPLAY", 153),
    ("CYCLEWINDOWS", 154),
    ("MAIL", 155),
    ("BOOKMARKS", 156),
    ("COMPUTER", 157),
    ("BACK", 158),
    ("FORWARD", 159),
    ("CLOSECD", 160),
    ("EJECTCD", 161),
    ("EJECTCLOSECD", 162),
    ("NEXTSONG", 163),
    ("PLAYPAUSE", 164),
    ("PREVIOUSSONG", 165),
    ("STOPCD", 166),
    ("RECORD", 167),
    ("REWIND", 168),
    ("PHONE", 169),
    ("ISO", 170),
    ("CONFIG", 171),
    ("HOMEPAGE", 172),
    ("REFRESH", 173),
    ("EXIT", 174),
    ("MOVE", 175),
    ("EDIT", 176),
    ("SCROLLUP", 177),
    ("SCROLLDOWN", 178),
    ("KPLEFTPAREN", 179),
    ("KPRIGHTPAREN", 180),
    ("NEW", 181),
    ("REDO", 182),
    ("F13", 183),
    ("F14", 184),
    ("F15", 185),
    ("F16", 186),
    ("F17", 187),
    ("F18", 188),
    ("F19", 189),
    ("F20", 190),
    ("F21", 191),
    ("F22", 192),
    ("F23", 193),
    ("F24", 194),
    ("PLAYCD", 200),
    ("PAUSECD", 201),
    ("PROG3", 202),
    ("PROG4", 203),
    ("SUSPEND", 205),
    ("CLOSE", 206),
    ("PLAY", 207),
    ("FASTFORWARD", 208),
    ("BASSBOOST", 209),
    ("PRINT", 210),
    ("CAMERA", 212),
    ("SEARCH", 217),
    ("BRIGHTNESSDOWN", 224),
    ("BRIGHTNESSUP", 225),
    ("MEDIA", 226),
];

// Friendly spellings accepted in addition to the kernel names.
const KEY_ALIASES: &[(&str, u16)] = &[("ESCAPE", 1), ("PRTSCR", 99), ("COFFEE", 152)];

/// Strip the `KEY_` prefix and underscores so that `KEY_LEFTALT`,
/// `LEFT_ALT` and `leftalt` all compare equal.
fn normalize(name: &str) -> String {
    let upper = name.trim().to_uppercase();
    let bare = upper.strip_prefix("KEY_").unwrap_or(&upper);
    bare.chars().filter(|c| *c != '_').collect()
}

/// Kernel name for a key code, or `KEY_UNKNOWN`
pub fn key_name(code: u16) -> &'static str {
    static KEY_NAMES: OnceLock<HashMap<u16, String>> = OnceLock::new();
    KEY_NAMES
        .get_or_init(|| {
            KEY_TABLE
                .iter()
                .map(|(name, code)| (*code, format!("KEY_{}", name)))
                .collect()
        })
        .get(&code)
        .map(String::as_str)
        .unwrap_or("KEY_UNKNOWN")
}

/// Try to parse a key name to a key code
pub fn key_from_name(name: &str) -> Option<Key> {
    static NAME_TO_CODE: OnceLock<HashMap<String, u16>> = OnceLock::new();
    let map = NAME_TO_CODE.get_or_init(|| {
        KEY_TABLE
            .iter()
            .chain(KEY_ALIASES.iter())
            .map(|(name, code)| (normalize(name), *code))
            .collect()
    });
    map.get(&normalize(name)).map(|code| Key::from(*code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_name() {
        assert_eq!(key_from_name("KEY_ENTER"), Some(Key::from(28)));
        assert_eq!(key_from_name("enter"), Some(Key::from(28)));
        assert_eq!(key_from_name("KEY_LEFTALT"), Some(Key::from(56)));
        assert_eq!(key_from_name("LEFT_ALT"), Some(Key::from(56)));
        assert_eq!(key_from_name("KEY_1"), Some(Key::from(2)));
        assert_eq!(key_from_name("escape"), Some(Key::from(1)));
        assert_eq!(key_from_name("KEY_ROTATE_DISPLAY"), Some(Key::from(153)));
        assert_eq!(key_from_name("Bar"), None);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::from(30).to_string(), "KEY_A");
        assert_eq!(Key::from(28).to_string(), "KEY_ENTER");
        assert_eq!(Key::from(600).to_string(), "KEY_UNKNOWN");
    }

    #[test]
    fn test_key_from_str() {
        assert_eq!("KEY_BACKSPACE".parse::<Key>(), Ok(Key::from(14)));
        assert!("KEY_NOPE".parse::<Key>().is_err());
    }

    #[test]
    fn test_table_codes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (name, code) in KEY_TABLE {
            assert!(seen.insert(*code), "duplicate code for {}", name);
        }
    }
}
