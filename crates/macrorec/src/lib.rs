//! # macrorec
//!
//! Record mouse clicks and key presses, save them, and replay them later with
//! their original timing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use macrorec::prelude::*;
//! use std::sync::Arc;
//!
//! let (capture, _input) = ChannelCapture::new();
//! let mut controller = Controller::new(Arc::new(capture), Arc::new(ConsoleInjector::stdout()));
//!
//! println!("{}", controller.start_recording());
//! // ... inputs arrive through `_input` ...
//! println!("{}", controller.stop_recording());
//! println!("{}", controller.save_macro("session.macro"));
//! println!("{}", controller.play_macro());
//! ```

pub mod controller;

pub use macrorec_core::*;

// Re-export recorder module
pub use macrorec_recorder as recorder;

pub use controller::{Command, Controller, Status, StatusLevel};
pub use macrorec_recorder::{
    storage, ChannelCapture, CaptureSender, Event, EventLog, InputCapture, KeyRef, MouseButton,
    Phase, PointerInput, Recorder, ReplayOutcome, ReplayStats, Replayer, StopSignal,
};

/// Prelude - import everything you need
pub mod prelude {
    pub use crate::controller::{Command, Controller, Status, StatusLevel};
    pub use macrorec_core::prelude::*;
    pub use macrorec_recorder::prelude::*;
    pub use macrorec_recorder::CaptureSender;
}
