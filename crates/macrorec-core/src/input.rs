//! Keyboard and mouse input injection
//!
//! The platform facility that performs synthetic input sits behind [`InputInjection`].
//! [`ConsoleInjector`] is the portable implementation: it reports every action as a
//! JSON line instead of touching the OS.

use crate::error::{MacroError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};

/// Performs synthetic clicks and key presses
pub trait InputInjection: Send + Sync {
    /// Click at screen coordinates
    fn click_at(&self, x: i32, y: i32) -> Result<()>;

    /// Press and release a key. `token` is a single character or a symbolic name such as
    /// `"shift"` or `"esc"`.
    fn press_key(&self, token: &str) -> Result<()>;
}

/// One synthetic action, as printed by [`ConsoleInjector`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InjectedAction {
    Click { x: i32, y: i32 },
    Press { key: String },
}

/// Writes each injected action as one JSON line
pub struct ConsoleInjector {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleInjector {
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout())
    }

    pub fn with_writer(w: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(w)),
        }
    }

    fn emit(&self, action: InjectedAction) -> Result<()> {
        let line = serde_json::to_string(&action)
            .map_err(|e| MacroError::Injection(e.to_string()))?;
        let mut out = self.out.lock();
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .map_err(|e| MacroError::Injection(e.to_string()))
    }
}

impl InputInjection for ConsoleInjector {
    fn click_at(&self, x: i32, y: i32) -> Result<()> {
        tracing::debug!(x, y, "click");
        self.emit(InjectedAction::Click { x, y })
    }

    fn press_key(&self, token: &str) -> Result<()> {
        tracing::debug!(key = token, "press");
        self.emit(InjectedAction::Press {
            key: token.to_string(),
        })
    }
}
