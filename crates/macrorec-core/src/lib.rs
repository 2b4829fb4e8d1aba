//! macrorec-core - shared primitives for the macro recorder
//!
//! Structured errors plus the input injection seam used by replay.

pub mod error;
pub mod input;

pub use error::{ErrorCode, ErrorReport, MacroError, Result};
pub use input::{ConsoleInjector, InjectedAction, InputInjection};

pub mod prelude {
    pub use crate::error::{ErrorCode, ErrorReport, MacroError, Result};
    pub use crate::input::{ConsoleInjector, InputInjection};
}
