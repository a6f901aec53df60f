//! The scheduler loop: detection, fetch, parse, and project cycles.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod scheduler;

pub use error::{CycleError, Result};
pub use scheduler::{CycleReport, Scheduler};
