//! Remote-control key codes.
//!
//! The TV identifies each button on its physical remote by a symbolic name
//! such as `KEY_VOLUP` or `KEY_7`.  [`RemoteKey`] is the closed subset of
//! those names this application sends: volume, mute, the ten digits, and
//! ENTER (used to confirm a typed channel number).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a string does not name a supported key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown remote key: {0:?}")]
pub struct KeyParseError(pub String);

/// Symbolic key code understood by the TV's remote-control channel.
///
/// Serializes to the wire name (`"KEY_VOLUP"`, `"KEY_0"`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteKey {
    #[serde(rename = "KEY_VOLUP")]
    VolumeUp,
    #[serde(rename = "KEY_VOLDOWN")]
    VolumeDown,
    #[serde(rename = "KEY_MUTE")]
    Mute,
    #[serde(rename = "KEY_0")]
    Num0,
    #[serde(rename = "KEY_1")]
    Num1,
    #[serde(rename = "KEY_2")]
    Num2,
    #[serde(rename = "KEY_3")]
    Num3,
    #[serde(rename = "KEY_4")]
    Num4,
    #[serde(rename = "KEY_5")]
    Num5,
    #[serde(rename = "KEY_6")]
    Num6,
    #[serde(rename = "KEY_7")]
    Num7,
    #[serde(rename = "KEY_8")]
    Num8,
    #[serde(rename = "KEY_9")]
    Num9,
    #[serde(rename = "KEY_ENTER")]
    Enter,
}

impl RemoteKey {
    /// Every supported key, in a stable order.
    pub const ALL: [RemoteKey; 14] = [
        RemoteKey::VolumeUp,
        RemoteKey::VolumeDown,
        RemoteKey::Mute,
        RemoteKey::Num0,
        RemoteKey::Num1,
        RemoteKey::Num2,
        RemoteKey::Num3,
        RemoteKey::Num4,
        RemoteKey::Num5,
        RemoteKey::Num6,
        RemoteKey::Num7,
        RemoteKey::Num8,
        RemoteKey::Num9,
        RemoteKey::Enter,
    ];

    /// Returns the wire name the TV expects in `DataOfCmd`.
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteKey::VolumeUp => "KEY_VOLUP",
            RemoteKey::VolumeDown => "KEY_VOLDOWN",
            RemoteKey::Mute => "KEY_MUTE",
            RemoteKey::Num0 => "KEY_0",
            RemoteKey::Num1 => "KEY_1",
            RemoteKey::Num2 => "KEY_2",
            RemoteKey::Num3 => "KEY_3",
            RemoteKey::Num4 => "KEY_4",
            RemoteKey::Num5 => "KEY_5",
            RemoteKey::Num6 => "KEY_6",
            RemoteKey::Num7 => "KEY_7",
            RemoteKey::Num8 => "KEY_8",
            RemoteKey::Num9 => "KEY_9",
            RemoteKey::Enter => "KEY_ENTER",
        }
    }

    /// Maps a decimal digit (0–9) to its number key.
    pub fn from_digit(digit: u8) -> Option<Self> {
        let key = match digit {
            0 => RemoteKey::Num0,
            1 => RemoteKey::Num1,
            2 => RemoteKey::Num2,
            3 => RemoteKey::Num3,
            4 => RemoteKey::Num4,
            5 => RemoteKey::Num5,
            6 => RemoteKey::Num6,
            7 => RemoteKey::Num7,
            8 => RemoteKey::Num8,
            9 => RemoteKey::Num9,
            _ => return None,
        };
        Some(key)
    }

    /// Splits `number` into its decimal digit keys, most significant first.
    ///
    /// ```rust
    /// use tvremote_core::RemoteKey;
    ///
    /// let keys = RemoteKey::digits_of(205);
    /// assert_eq!(keys, vec![RemoteKey::Num2, RemoteKey::Num0, RemoteKey::Num5]);
    /// ```
    pub fn digits_of(number: u32) -> Vec<RemoteKey> {
        number
            .to_string()
            .bytes()
            .filter_map(|b| RemoteKey::from_digit(b - b'0'))
            .collect()
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteKey {
    type Err = KeyParseError;

    /// Accepts the wire name in any case, with or without the `KEY_` prefix
    /// (`"KEY_MUTE"`, `"mute"`, `"7"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let wanted = if upper.starts_with("KEY_") {
            upper
        } else {
            format!("KEY_{upper}")
        };
        RemoteKey::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| KeyParseError(s.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digits_of_splits_most_significant_first() {
        // Arrange / Act
        let keys = RemoteKey::digits_of(101);

        // Assert
        assert_eq!(keys, vec![RemoteKey::Num1, RemoteKey::Num0, RemoteKey::Num1]);
    }

    #[test]
    fn test_digits_of_zero_is_single_zero_key() {
        assert_eq!(RemoteKey::digits_of(0), vec![RemoteKey::Num0]);
    }

    #[test]
    fn test_from_digit_rejects_values_above_nine() {
        assert_eq!(RemoteKey::from_digit(10), None);
        assert_eq!(RemoteKey::from_digit(9), Some(RemoteKey::Num9));
    }

    #[test]
    fn test_from_str_accepts_short_and_lowercase_names() {
        assert_eq!("mute".parse::<RemoteKey>(), Ok(RemoteKey::Mute));
        assert_eq!("KEY_VOLUP".parse::<RemoteKey>(), Ok(RemoteKey::VolumeUp));
        assert_eq!("7".parse::<RemoteKey>(), Ok(RemoteKey::Num7));
        assert_eq!("key_enter".parse::<RemoteKey>(), Ok(RemoteKey::Enter));
    }

    #[test]
    fn test_from_str_rejects_unknown_key() {
        let result = "KEY_POWER".parse::<RemoteKey>();
        assert_eq!(result, Err(KeyParseError("KEY_POWER".to_string())));
    }

    #[test]
    fn test_serde_uses_wire_name() {
        let json = serde_json::to_string(&RemoteKey::VolumeDown).unwrap();
        assert_eq!(json, "\"KEY_VOLDOWN\"");
    }

    #[test]
    fn test_display_matches_as_str_for_every_key() {
        for key in RemoteKey::ALL {
            assert_eq!(key.to_string(), key.as_str());
        }
    }
}
