//! `roc-core`: error taxonomy and cooperative-cancellation primitives
//! shared by every other crate in the workspace. No I/O lives here.

pub mod contract;
pub mod error;

pub use contract::{Cancellation, Deadline};
pub use error::{EngineError, ErrorCategory, Result};
