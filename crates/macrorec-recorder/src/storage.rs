//! Macro file storage - a closed, versioned binary format
//!
//! ```text
//! MacroFile := version:u8, count:u32, Event[count]
//! Event     := tag:u8, timestamp:f64, payload
//!   tag=1 MouseClick: x:i32, y:i32, button:u8 (0=left,1=right,2=middle), pressed:bool
//!   tag=2 KeyPress:   kind:u8 (0=char,1=named), value:string
//! string    := len:u32, utf8[len]
//! ```
//!
//! Numbers are little-endian, `bool` is a single 0/1 byte. Every tag is checked
//! before its payload is read, and the whole file must be consumed.

use crate::events::{Event, EventLog, KeyRef, MouseButton};
use macrorec_core::{MacroError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

pub const FORMAT_VERSION: u8 = 1;
pub const EXTENSION: &str = "macro";

const TAG_MOUSE_CLICK: u8 = 1;
const TAG_KEY_PRESS: u8 = 2;
const KEY_CHAR: u8 = 0;
const KEY_NAMED: u8 = 1;

// tag + timestamp + smallest payload (key kind + empty string length)
const MIN_EVENT_LEN: usize = 1 + 8 + 1 + 4;

/// Save a log to `path`, replacing the file atomically.
///
/// The bytes go to a temporary file next to `path` which is renamed over the
/// destination only after a successful write and sync.
pub fn save(log: &EventLog, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(log)?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut builder = tempfile::Builder::new();
    builder.prefix(".macrorec-").suffix(".tmp");
    // Same mode a plain `File::create` would give, instead of 0600
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir).map_err(|e| MacroError::io(path, e))?;
    // Replacing a file keeps its permissions
    if let Ok(existing) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(existing.permissions())
            .map_err(|e| MacroError::io(path, e))?;
    }
    tmp.write_all(&bytes).map_err(|e| MacroError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| MacroError::io(path, e))?;
    tmp.persist(path).map_err(|e| MacroError::io(path, e.error))?;

    tracing::info!(path = %path.display(), events = log.len(), bytes = bytes.len(), "macro saved");
    Ok(())
}

/// Load a log from `path`. Nothing is returned unless the whole file is valid.
pub fn load(path: impl AsRef<Path>) -> Result<EventLog> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| MacroError::io(path, e))?;
    match decode(&bytes) {
        Ok(log) => {
            tracing::info!(path = %path.display(), events = log.len(), "macro loaded");
            Ok(log)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "rejected macro file");
            Err(e)
        }
    }
}

/// `macro_20250322_141500.macro`
pub fn default_file_name() -> String {
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("macro_{}.{}", ts, EXTENSION)
}

pub fn encode(log: &EventLog) -> Result<Vec<u8>> {
    let count = u32::try_from(log.len())
        .map_err(|_| MacroError::format(format!("too many events: {}", log.len())))?;

    let mut out = Vec::with_capacity(5 + log.len() * 19);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&count.to_le_bytes());

    for (i, event) in log.iter().enumerate() {
        let ts = event.timestamp();
        if !ts.is_finite() {
            return Err(MacroError::format(format!(
                "event {}: timestamp is not finite",
                i
            )));
        }
        match event {
            Event::MouseClick {
                timestamp,
                x,
                y,
                button,
                pressed,
            } => {
                out.push(TAG_MOUSE_CLICK);
                out.extend_from_slice(&timestamp.to_le_bytes());
                out.extend_from_slice(&x.to_le_bytes());
                out.extend_from_slice(&y.to_le_bytes());
                out.push(button.code());
                out.push(u8::from(*pressed));
            }
            Event::KeyPress { timestamp, key } => {
                out.push(TAG_KEY_PRESS);
                out.extend_from_slice(&timestamp.to_le_bytes());
                match key {
                    KeyRef::Char(c) => {
                        out.push(KEY_CHAR);
                        let mut buf = [0u8; 4];
                        write_str(&mut out, c.encode_utf8(&mut buf))?;
                    }
                    KeyRef::Named(name) => {
                        out.push(KEY_NAMED);
                        write_str(&mut out, name)?;
                    }
                }
            }
        }
    }

    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<EventLog> {
    let mut r = Reader::new(bytes);

    let version = r.u8("version")?;
    if version != FORMAT_VERSION {
        return Err(MacroError::format(format!(
            "unsupported version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let count = r.u32("event count")? as usize;
    // The count is untrusted; never reserve more than the remaining bytes can hold.
    let mut events = Vec::with_capacity(count.min(r.remaining() / MIN_EVENT_LEN));

    for i in 0..count {
        events.push(read_event(&mut r).map_err(|e| match e {
            MacroError::Format(msg) => MacroError::format(format!("event {}: {}", i, msg)),
            other => other,
        })?);
    }

    if r.remaining() != 0 {
        return Err(MacroError::format(format!(
            "{} trailing bytes after {} events",
            r.remaining(),
            count
        )));
    }

    Ok(EventLog::from(events))
}

fn read_event(r: &mut Reader<'_>) -> Result<Event> {
    let tag = r.u8("tag")?;
    if tag != TAG_MOUSE_CLICK && tag != TAG_KEY_PRESS {
        return Err(MacroError::format(format!("unknown tag {}", tag)));
    }

    let timestamp = r.f64("timestamp")?;
    if !timestamp.is_finite() {
        return Err(MacroError::format("timestamp is not finite"));
    }

    if tag == TAG_MOUSE_CLICK {
        let x = r.i32("x")?;
        let y = r.i32("y")?;
        let code = r.u8("button")?;
        let button = MouseButton::from_code(code)
            .ok_or_else(|| MacroError::format(format!("unknown mouse button {}", code)))?;
        let pressed = r.bool("pressed")?;
        return Ok(Event::MouseClick {
            timestamp,
            x,
            y,
            button,
            pressed,
        });
    }

    let kind = r.u8("key kind")?;
    let key = match kind {
        KEY_CHAR => {
            let value = r.string("key value")?;
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyRef::Char(c),
                _ => {
                    return Err(MacroError::format(format!(
                        "char key must be one character, got {:?}",
                        value
                    )))
                }
            }
        }
        KEY_NAMED => KeyRef::Named(r.string("key value")?.to_string()),
        other => return Err(MacroError::format(format!("unknown key kind {}", other))),
    };

    Ok(Event::KeyPress { timestamp, key })
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| MacroError::format(format!("string too long: {} bytes", s.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(MacroError::format(format!(
                "truncated {} at byte {}",
                what, self.pos
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.take(N, what)?);
        Ok(arr)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn bool(&mut self, what: &str) -> Result<bool> {
        match self.u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(MacroError::format(format!("invalid bool {} for {}", b, what))),
        }
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.array(what).map(u32::from_le_bytes)
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        self.array(what).map(i32::from_le_bytes)
    }

    fn f64(&mut self, what: &str) -> Result<f64> {
        self.array(what).map(f64::from_le_bytes)
    }

    fn string(&mut self, what: &str) -> Result<&'a str> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        std::str::from_utf8(bytes)
            .map_err(|_| MacroError::format(format!("{} is not valid UTF-8", what)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use macrorec_core::ErrorCode;
    use proptest::prelude::*;

    fn sample() -> EventLog {
        EventLog::from(vec![
            Event::MouseClick {
                timestamp: 1_742_650_000.25,
                x: 640,
                y: -12,
                button: MouseButton::Right,
                pressed: true,
            },
            Event::KeyPress {
                timestamp: 1_742_650_000.25,
                key: KeyRef::Char('ß'),
            },
            Event::KeyPress {
                timestamp: 1_742_650_001.0,
                key: KeyRef::Named("shift".into()),
            },
            Event::MouseClick {
                timestamp: 1_742_650_002.5,
                x: i32::MAX,
                y: i32::MIN,
                button: MouseButton::Middle,
                pressed: false,
            },
        ])
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let log = sample();
        let bytes = encode(&log).unwrap();
        assert_eq!(decode(&bytes).unwrap(), log);
    }

    fn event() -> impl Strategy<Value = Event> {
        let timestamp = -1.0e12f64..1.0e12;
        let button = prop_oneof![
            Just(MouseButton::Left),
            Just(MouseButton::Right),
            Just(MouseButton::Middle),
        ];
        let key = prop_oneof![
            any::<char>().prop_map(KeyRef::Char),
            ".{0,24}".prop_map(KeyRef::Named),
        ];
        prop_oneof![
            (timestamp.clone(), any::<i32>(), any::<i32>(), button, any::<bool>()).prop_map(
                |(timestamp, x, y, button, pressed)| Event::MouseClick {
                    timestamp,
                    x,
                    y,
                    button,
                    pressed,
                }
            ),
            (timestamp, key).prop_map(|(timestamp, key)| Event::KeyPress { timestamp, key }),
        ]
    }

    proptest! {
        #[test]
        fn any_log_survives_encode_decode(events in prop::collection::vec(event(), 0..40)) {
            let log = EventLog::from(events);
            let bytes = encode(&log).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), log);
        }
    }

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.macro");
        save(&sample(), &path).unwrap();
        assert_eq!(load(&path).unwrap(), sample());

        // No temporary files left behind
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("session.macro")]);
    }

    #[test]
    fn empty_log_layout() {
        let bytes = encode(&EventLog::new()).unwrap();
        assert_eq!(bytes, vec![FORMAT_VERSION, 0, 0, 0, 0]);
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn key_press_layout() {
        let log = EventLog::from(vec![Event::KeyPress {
            timestamp: 0.5,
            key: KeyRef::Named("esc".into()),
        }]);
        let bytes = encode(&log).unwrap();

        let mut expected = vec![1, 1, 0, 0, 0, TAG_KEY_PRESS];
        expected.extend_from_slice(&0.5f64.to_le_bytes());
        expected.extend_from_slice(&[KEY_NAMED, 3, 0, 0, 0]);
        expected.extend_from_slice(b"esc");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        // Second event starts after header (5) and the first mouse click (1 + 8 + 10)
        let second = 5 + 19;
        assert_eq!(bytes[second], TAG_KEY_PRESS);
        bytes[second] = 99;

        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FormatError);
        assert!(err.to_string().contains("unknown tag 99"), "{}", err);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = 2;
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FormatError);
    }

    #[test]
    fn every_truncation_is_rejected() {
        let bytes = encode(&sample()).unwrap();
        for len in 0..bytes.len() {
            let err = decode(&bytes[..len]).unwrap_err();
            assert_eq!(err.code(), ErrorCode::FormatError, "prefix of {} bytes", len);
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        assert_eq!(decode(&bytes).unwrap_err().code(), ErrorCode::FormatError);
    }

    #[test]
    fn invalid_payload_values_are_rejected() {
        let click = EventLog::from(vec![Event::MouseClick {
            timestamp: 0.0,
            x: 0,
            y: 0,
            button: MouseButton::Left,
            pressed: true,
        }]);
        let good = encode(&click).unwrap();

        let mut bad_button = good.clone();
        bad_button[5 + 1 + 8 + 8] = 7;
        assert!(decode(&bad_button).is_err());

        let mut bad_bool = good.clone();
        bad_bool[5 + 1 + 8 + 9] = 2;
        assert!(decode(&bad_bool).is_err());

        let mut bad_ts = good;
        bad_ts[6..14].copy_from_slice(&f64::NAN.to_le_bytes());
        assert!(decode(&bad_ts).is_err());
    }

    #[test]
    fn char_key_must_hold_one_character() {
        let mut bytes = vec![FORMAT_VERSION, 1, 0, 0, 0, TAG_KEY_PRESS];
        bytes.extend_from_slice(&0.0f64.to_le_bytes());
        bytes.extend_from_slice(&[KEY_CHAR, 2, 0, 0, 0]);
        bytes.extend_from_slice(b"ab");
        assert_eq!(decode(&bytes).unwrap_err().code(), ErrorCode::FormatError);
    }

    #[test]
    fn huge_count_does_not_preallocate() {
        let bytes = vec![FORMAT_VERSION, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(decode(&bytes).unwrap_err().code(), ErrorCode::FormatError);
    }

    #[test]
    fn save_into_missing_directory_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("out.macro");
        let err = save(&sample(), &path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);
        assert!(!path.exists());
    }

    #[test]
    fn failed_encode_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.macro");
        save(&sample(), &path).unwrap();

        let bad = EventLog::from(vec![Event::KeyPress {
            timestamp: f64::INFINITY,
            key: KeyRef::Char('a'),
        }]);
        assert_eq!(save(&bad, &path).unwrap_err().code(), ErrorCode::FormatError);
        assert_eq!(load(&path).unwrap(), sample());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_mode_matches_plain_create() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::File::create(&plain).unwrap();
        let saved = dir.path().join("saved.macro");
        save(&sample(), &saved).unwrap();

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&saved), mode(&plain));

        // An existing file keeps its own mode
        fs::set_permissions(&saved, fs::Permissions::from_mode(0o640)).unwrap();
        save(&EventLog::new(), &saved).unwrap();
        assert_eq!(mode(&saved), 0o640);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("absent.macro")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::IoError);
    }
}
