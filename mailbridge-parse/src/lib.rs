#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod content;
pub mod error;
pub mod message;

pub use content::{digest_dir_name, sniff_image};
pub use error::{ParseError, Result};
pub use message::{Attachment, CalendarPart, InlinePart, ParsedMessage, parse_message};
