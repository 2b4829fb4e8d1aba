//! Event model and the append-only event log
//!
//! Events serialize to compact JSON for display. Macro files use the binary
//! codec in [`crate::storage`], never serde.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Mouse button: 0=left, 1=right, 2=middle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn code(self) -> u8 {
        match self {
            Self::Left => 0,
            Self::Right => 1,
            Self::Middle => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Left),
            1 => Some(Self::Right),
            2 => Some(Self::Middle),
            _ => None,
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        })
    }
}

impl FromStr for MouseButton {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(Self::Left),
            "right" | "r" => Ok(Self::Right),
            "middle" | "m" | "center" => Ok(Self::Middle),
            other => Err(format!("unknown mouse button: {}", other)),
        }
    }
}

/// Key identity, decided once at capture time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum KeyRef {
    /// A key that produces a single character
    Char(char),
    /// A symbolic key such as `shift` or `esc`
    Named(String),
}

impl KeyRef {
    /// Single-character input is a `Char`, anything longer is a `Named` key.
    pub fn from_input(s: &str) -> Self {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::Char(c),
            _ => Self::Named(s.to_string()),
        }
    }

    /// Token handed to the injection facility
    pub fn token(&self) -> Cow<'_, str> {
        match self {
            Self::Char(c) => Cow::Owned(c.to_string()),
            Self::Named(name) => Cow::Borrowed(name),
        }
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "{:?}", c),
            Self::Named(name) => write!(f, "<{}>", name),
        }
    }
}

/// One recorded input occurrence.
///
/// `timestamp` is wall-clock seconds since the Unix epoch at capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "e", rename_all = "snake_case")]
pub enum Event {
    MouseClick {
        timestamp: f64,
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
    },
    KeyPress {
        timestamp: f64,
        key: KeyRef,
    },
}

impl Event {
    pub fn timestamp(&self) -> f64 {
        match self {
            Self::MouseClick { timestamp, .. } | Self::KeyPress { timestamp, .. } => *timestamp,
        }
    }
}

/// Ordered, append-only sequence of events.
///
/// Insertion order is capture order. The log is never reordered; the only
/// removal is a full [`clear`](EventLog::clear).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Seconds between the first and last event
    pub fn duration(&self) -> f64 {
        match (self.first(), self.last()) {
            (Some(a), Some(b)) => (b.timestamp() - a.timestamp()).max(0.0),
            _ => 0.0,
        }
    }
}

impl From<Vec<Event>> for EventLog {
    fn from(events: Vec<Event>) -> Self {
        Self { events }
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
