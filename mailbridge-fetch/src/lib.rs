#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod channel;
pub mod error;

pub use channel::{FetchOutcome, FetchedMessage, ScriptChannel, SubprocessScriptChannel};
pub use error::{FetchError, Result};
