//! Projects parsed messages into pages in a remote document database,
//! resolving thread linkage, uploading attachments and inline images,
//! and decoding embedded calendar invites.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod blocks;
pub mod calendar;
pub mod error;
pub mod projector;
pub mod rate_limiter;
pub mod remote;
pub mod retry;

pub use blocks::{Block, BlockConverter, SimpleHtmlBlockConverter};
pub use calendar::{CalendarInvite, decode_invite};
pub use error::{FailureClass, ProjectError, Result};
pub use projector::{ProjectOutcome, Projector, RecordFlags};
pub use rate_limiter::RateLimiter;
pub use remote::{NotionLikeClient, RemoteDatabase};
