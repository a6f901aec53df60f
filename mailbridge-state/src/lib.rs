#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod record;
pub mod store;

pub use error::{Result, StateError};
pub use record::{DetectedMeta, HeaderSummary, MessageRecord, SyncStatus};
pub use store::StateStore;
