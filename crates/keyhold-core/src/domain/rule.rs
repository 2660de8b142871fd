//! Input propagation rules.
//!
//! A [`Rule`] tells the host what to do with one class of input event:
//! hand it on to the host's own handlers ([`Propagation::Propagate`]) or
//! swallow it ([`Propagation::Suppress`]).  The policy store never looks
//! inside a rule; it only keeps rules in order.  The fields exist so a rule
//! can be written in configuration and framed for the host.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// What the host does with an event matched by a rule.
///
/// Also used as the host's default mode when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    /// Deliver the event to the host application.
    Propagate,
    /// Swallow the event before the host sees it.
    Suppress,
}

impl Propagation {
    /// Maps the `propagate: bool` flag used by convenience APIs.
    pub fn from_flag(propagate: bool) -> Self {
        if propagate {
            Propagation::Propagate
        } else {
            Propagation::Suppress
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Propagate => f.write_str("propagate"),
            Propagation::Suppress => f.write_str("suppress"),
        }
    }
}

/// The kind of input event a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    KeyDown,
    KeyUp,
    PointerDown,
    PointerUp,
    PointerMove,
    Wheel,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::KeyDown => "key_down",
            EventKind::KeyUp => "key_up",
            EventKind::PointerDown => "pointer_down",
            EventKind::PointerUp => "pointer_up",
            EventKind::PointerMove => "pointer_move",
            EventKind::Wheel => "wheel",
        };
        f.write_str(name)
    }
}

/// Identifies the key (or pointer button) a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyId {
    /// A numeric key code or pointer button number, as understood by the host.
    Code(u32),
    /// The character a key produces.
    Char(char),
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Code(code) => write!(f, "#{code}"),
            KeyId::Char(c) => write!(f, "'{c}'"),
        }
    }
}

/// Error returned when a modifier string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown modifier '{0}' (expected ctrl, shift, alt or meta)")]
pub struct ModifierParseError(pub String);

/// Modifier key bitmask required by a rule.
///
/// Bit layout:
/// - Bit 0: Ctrl
/// - Bit 1: Shift
/// - Bit 2: Alt
/// - Bit 3: Meta (Windows/Command/Super)
///
/// In human-readable formats (TOML, JSON) the set is written as a `+`-joined
/// list of names, e.g. `"ctrl+shift"`; an empty string means no modifiers.
/// Binary formats carry the raw byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const CTRL: Modifiers = Modifiers(1 << 0);
    pub const SHIFT: Modifiers = Modifiers(1 << 1);
    pub const ALT: Modifiers = Modifiers(1 << 2);
    pub const META: Modifiers = Modifiers(1 << 3);

    const ALL_BITS: u8 = 0x0F;
    const NAMES: [(Modifiers, &'static str); 4] = [
        (Modifiers::CTRL, "ctrl"),
        (Modifiers::SHIFT, "shift"),
        (Modifiers::ALT, "alt"),
        (Modifiers::META, "meta"),
    ];

    /// Builds a set from raw bits; undefined bits are dropped.
    pub fn from_bits(bits: u8) -> Self {
        Modifiers(bits & Self::ALL_BITS)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every modifier in `other` is also in `self`.
    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Modifiers) -> Self {
        Modifiers(self.0 | other.0)
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        self.union(rhs)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for Modifiers {
    type Err = ModifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mods = Modifiers::NONE;
        for part in s.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            let flag = match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => Modifiers::CTRL,
                "shift" => Modifiers::SHIFT,
                "alt" | "option" => Modifiers::ALT,
                "meta" | "cmd" | "super" | "win" => Modifiers::META,
                _ => return Err(ModifierParseError(part.to_string())),
            };
            mods = mods | flag;
        }
        Ok(mods)
    }
}

impl Serialize for Modifiers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            serializer.serialize_u8(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Modifiers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            u8::deserialize(deserializer).map(Modifiers::from_bits)
        }
    }
}

/// A single propagation directive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub action: Propagation,
    pub kind: EventKind,
    #[serde(default)]
    pub modifiers: Modifiers,
    pub key: KeyId,
}

impl Rule {
    pub fn new(action: Propagation, kind: EventKind, modifiers: Modifiers, key: KeyId) -> Self {
        Self {
            action,
            kind,
            modifiers,
            key,
        }
    }

    /// A rule for key-down events of `key` with exactly `modifiers` held.
    pub fn keydown(action: Propagation, key: KeyId, modifiers: Modifiers) -> Self {
        Self::new(action, EventKind::KeyDown, modifiers, key)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{} {} {}", self.action, self.kind, self.key)
        } else {
            write!(f, "{} {} {}+{}", self.action, self.kind, self.modifiers, self.key)
        }
    }
}
