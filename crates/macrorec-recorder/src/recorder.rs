//! Recorder - the Idle/Recording state machine
//!
//! The recorder owns a [`RecordingSession`] which is shared by reference with the
//! capture callbacks. Every append happens under the session lock, and the
//! timestamp is read inside that lock, so log order is both arrival order and
//! timestamp order.

use crate::capture::{CaptureHandlers, InputCapture, PointerInput, SubscriptionId};
use crate::events::{Event, EventLog, KeyRef};
use macrorec_core::{MacroError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

/// Wall-clock source for event timestamps, in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds since the Unix epoch, microsecond resolution
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Recording,
}

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Never let a timestamp go below the previous event's, even if the wall
    /// clock steps backwards mid-session
    pub monotonic_timestamps: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            monotonic_timestamps: true,
        }
    }
}

struct SessionState {
    phase: Phase,
    start_time: Option<f64>,
    // Bumped on every start so callbacks from an older subscription are ignored
    generation: u64,
    log: EventLog,
}

/// Recording state plus the log it fills
pub struct RecordingSession {
    state: Mutex<SessionState>,
    clock: Arc<dyn Clock>,
    config: RecorderConfig,
}

impl RecordingSession {
    fn new(clock: Arc<dyn Clock>, config: RecorderConfig) -> Self {
        Self {
            state: Mutex::new(SessionState {
                phase: Phase::Idle,
                start_time: None,
                generation: 0,
                log: EventLog::new(),
            }),
            clock,
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn start_time(&self) -> Option<f64> {
        self.state.lock().start_time
    }

    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().log.is_empty()
    }

    /// Copy of the current log
    pub fn snapshot(&self) -> EventLog {
        self.state.lock().log.clone()
    }

    /// Swap in a complete log, e.g. one just loaded from disk. Refused while recording.
    pub fn replace_log(&self, log: EventLog) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase == Phase::Recording {
            return Err(MacroError::Busy(
                "cannot replace the macro while recording".into(),
            ));
        }
        state.log = log;
        Ok(())
    }

    /// Enter Recording with an empty log. Returns the new generation and the
    /// previous log so a failed start can put it back.
    fn begin(&self) -> (u64, EventLog) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.phase = Phase::Recording;
        state.start_time = Some(self.clock.now());
        let previous = std::mem::take(&mut state.log);
        (state.generation, previous)
    }

    fn abort(&self, previous: EventLog) {
        let mut state = self.state.lock();
        state.phase = Phase::Idle;
        state.start_time = None;
        state.log = previous;
    }

    /// Back to Idle. Returns the number of events captured.
    fn end(&self) -> usize {
        let mut state = self.state.lock();
        state.phase = Phase::Idle;
        state.start_time = None;
        state.log.len()
    }

    /// Append an event built from the current timestamp. Ignored unless this
    /// generation is the one recording.
    fn record(&self, generation: u64, build: impl FnOnce(f64) -> Event) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Recording || state.generation != generation {
            return false;
        }
        let mut timestamp = self.clock.now();
        if self.config.monotonic_timestamps {
            if let Some(last) = state.log.last() {
                timestamp = timestamp.max(last.timestamp());
            }
        }
        state.log.push(build(timestamp));
        true
    }
}

/// Records pointer and keyboard input into a [`RecordingSession`]
pub struct Recorder {
    capture: Arc<dyn InputCapture>,
    session: Arc<RecordingSession>,
    subscription: Option<SubscriptionId>,
}

impl Recorder {
    pub fn new(capture: Arc<dyn InputCapture>) -> Self {
        Self::with_config(capture, Arc::new(SystemClock), RecorderConfig::default())
    }

    pub fn with_config(
        capture: Arc<dyn InputCapture>,
        clock: Arc<dyn Clock>,
        config: RecorderConfig,
    ) -> Self {
        Self {
            capture,
            session: Arc::new(RecordingSession::new(clock, config)),
            subscription: None,
        }
    }

    pub fn session(&self) -> &Arc<RecordingSession> {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn is_recording(&self) -> bool {
        self.phase() == Phase::Recording
    }

    /// Start a fresh recording. While already recording this restarts: the
    /// current hooks are released and the log is cleared.
    pub fn start(&mut self) -> Result<()> {
        if let Some(id) = self.subscription.take() {
            self.capture.unsubscribe(id);
            let dropped = self.session.end();
            tracing::info!(dropped, "restarting recording");
        }

        let (generation, previous) = self.session.begin();
        match self.capture.subscribe(self.handlers(generation)) {
            Ok(id) => {
                self.subscription = Some(id);
                tracing::info!(session = generation, "recording started");
                Ok(())
            }
            Err(e) => {
                self.session.abort(previous);
                tracing::warn!(error = %e, "could not subscribe to input capture");
                Err(match e {
                    MacroError::CaptureUnavailable(_) => e,
                    other => MacroError::CaptureUnavailable(other.to_string()),
                })
            }
        }
    }

    /// Stop recording and release the capture hooks. Blocks until the capture
    /// side has let go, so inputs it had already accepted are still recorded.
    /// Returns the number of events recorded, or `None` if nothing was recording.
    pub fn stop(&mut self) -> Option<usize> {
        let id = self.subscription.take()?;
        self.capture.unsubscribe(id);
        let events = self.session.end();
        tracing::info!(events, "recording stopped");
        Some(events)
    }

    fn handlers(&self, generation: u64) -> CaptureHandlers {
        let pointer_session = Arc::clone(&self.session);
        let key_session = Arc::clone(&self.session);
        CaptureHandlers {
            on_pointer: Arc::new(move |p: PointerInput| {
                pointer_session.record(generation, |timestamp| Event::MouseClick {
                    timestamp,
                    x: p.x,
                    y: p.y,
                    button: p.button,
                    pressed: p.pressed,
                });
            }),
            on_key: Arc::new(move |key: KeyRef| {
                key_session.record(generation, |timestamp| Event::KeyPress { timestamp, key });
            }),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}
