//! macrorec-recorder - macro recording and replay
//!
//! Captures mouse clicks and key presses into an ordered event log, replays the
//! log with its original timing, and stores it in the `.macro` binary format.
//!
//! The OS hooks are collaborators behind two traits:
//!
//! - [`InputCapture`] delivers raw pointer and keyboard occurrences
//! - [`macrorec_core::InputInjection`] performs synthetic clicks and key presses

pub mod capture;
pub mod events;
pub mod recorder;
pub mod replay;
pub mod storage;
pub mod testing;

pub use capture::{
    CaptureHandlers, CaptureSender, ChannelCapture, InputCapture, PointerInput, SubscriptionId,
};
pub use events::*;
pub use recorder::{Clock, Phase, Recorder, RecorderConfig, RecordingSession, SystemClock};
pub use replay::{ReplayOutcome, ReplayStats, Replayer, StopSignal};

pub mod prelude {
    pub use crate::capture::{ChannelCapture, InputCapture, PointerInput};
    pub use crate::events::*;
    pub use crate::recorder::{Phase, Recorder, RecorderConfig};
    pub use crate::replay::{ReplayOutcome, ReplayStats, Replayer, StopSignal};
    pub use crate::storage;
}
