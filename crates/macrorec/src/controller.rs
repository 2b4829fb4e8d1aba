//! Controller - the command surface of the macro recorder
//!
//! Every command returns a [`Status`] meant for display. Failures are folded into
//! the status; nothing here panics or exits.

use macrorec_core::{ErrorReport, InputInjection, MacroError};
use macrorec_recorder::storage;
use macrorec_recorder::{
    EventLog, InputCapture, Phase, Recorder, ReplayOutcome, Replayer, StopSignal,
};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    /// Nothing went wrong, but nothing happened either
    Advisory,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub level: StatusLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl Status {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            message: message.into(),
            error: None,
        }
    }

    pub fn advisory(message: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Advisory,
            message: message.into(),
            error: None,
        }
    }

    pub fn error(e: &MacroError) -> Self {
        Self {
            level: StatusLevel::Error,
            message: e.to_string(),
            error: Some(ErrorReport::from(e)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == StatusLevel::Error
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.level {
            StatusLevel::Info => "[*]",
            StatusLevel::Advisory | StatusLevel::Error => "[!]",
        };
        write!(f, "{} {}", marker, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StopRecording,
    PlayMacro,
    SaveMacro(PathBuf),
    LoadMacro(PathBuf),
}

pub struct Controller {
    recorder: Recorder,
    replayer: Replayer,
    injector: Arc<dyn InputInjection>,
    stop: StopSignal,
}

impl Controller {
    pub fn new(capture: Arc<dyn InputCapture>, injector: Arc<dyn InputInjection>) -> Self {
        Self::with_recorder(Recorder::new(capture), injector)
    }

    pub fn with_recorder(recorder: Recorder, injector: Arc<dyn InputInjection>) -> Self {
        Self {
            recorder,
            replayer: Replayer::new(),
            injector,
            stop: StopSignal::new(),
        }
    }

    pub fn replayer(mut self, replayer: Replayer) -> Self {
        self.replayer = replayer;
        self
    }

    /// Handle that cancels a running [`play_macro`](Self::play_macro) from another thread
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.recorder.phase()
    }

    /// Copy of the current macro
    pub fn log(&self) -> EventLog {
        self.recorder.session().snapshot()
    }

    pub fn execute(&mut self, command: Command) -> Status {
        match command {
            Command::StartRecording => self.start_recording(),
            Command::StopRecording => self.stop_recording(),
            Command::PlayMacro => self.play_macro(),
            Command::SaveMacro(path) => self.save_macro(path),
            Command::LoadMacro(path) => self.load_macro(path),
        }
    }

    pub fn start_recording(&mut self) -> Status {
        let restart = self.recorder.is_recording();
        match self.recorder.start() {
            Ok(()) if restart => Status::info("Recording restarted..."),
            Ok(()) => Status::info("Recording started..."),
            Err(e) => Status::error(&e),
        }
    }

    pub fn stop_recording(&mut self) -> Status {
        match self.recorder.stop() {
            Some(events) => Status::info(format!("Recording stopped. {} events captured.", events)),
            None => Status::advisory("Not recording."),
        }
    }

    /// Blocks until the macro has played, failed, or been cancelled through
    /// [`stop_signal`](Self::stop_signal)
    pub fn play_macro(&self) -> Status {
        if let Err(e) = self.ensure_idle("play") {
            return Status::error(&e);
        }
        let log = self.log();
        self.stop.reset();

        match self.replayer.play(&log, self.injector.as_ref(), &self.stop) {
            Ok(ReplayOutcome::EmptyLog) => Status::advisory("No events recorded."),
            Ok(ReplayOutcome::Completed(stats)) => Status::info(format!(
                "Playback finished: {} clicks, {} keys.",
                stats.clicks, stats.keys
            )),
            Ok(ReplayOutcome::Cancelled(stats)) => Status::advisory(format!(
                "Playback cancelled after {} of {} events.",
                stats.total(),
                log.len()
            )),
            Err(e) => Status::error(&e),
        }
    }

    pub fn save_macro(&self, path: impl AsRef<Path>) -> Status {
        let path = path.as_ref();
        if let Err(e) = self.ensure_idle("save") {
            return Status::error(&e);
        }
        let log = self.log();
        match storage::save(&log, path) {
            Ok(()) => Status::info(format!(
                "Macro saved to {} ({} events)",
                path.display(),
                log.len()
            )),
            Err(e) => Status::error(&e),
        }
    }

    /// All or nothing: the current macro is only replaced by a fully valid file
    pub fn load_macro(&self, path: impl AsRef<Path>) -> Status {
        let path = path.as_ref();
        if let Err(e) = self.ensure_idle("load") {
            return Status::error(&e);
        }
        let loaded = match storage::load(path) {
            Ok(log) => log,
            Err(e) => return Status::error(&e),
        };
        let events = loaded.len();
        match self.recorder.session().replace_log(loaded) {
            Ok(()) => Status::info(format!(
                "Macro loaded from {} ({} events)",
                path.display(),
                events
            )),
            Err(e) => Status::error(&e),
        }
    }

    fn ensure_idle(&self, action: &str) -> Result<(), MacroError> {
        match self.recorder.phase() {
            Phase::Idle => Ok(()),
            Phase::Recording => Err(MacroError::Busy(format!(
                "stop recording before trying to {}",
                action
            ))),
        }
    }
}
