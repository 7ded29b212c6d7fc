#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod progression;
pub mod time;

pub use error::{ProgressionError, TransitionBlock};
pub use progression::{DayState, DayView, ProgressionState, Reconciliation, VideoWatched};
pub use time::Clock;
