#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod index;

pub use error::{RadarError, Result};
pub use index::{RadarIndex, SqliteRadarIndex};
