//! Content-addressed naming and image signature sniffing.

use sha2::{Digest, Sha256};

/// First 16 hex characters of the SHA-256 of `message_id`, used to name
/// the per-message temporary directory with a bounded, filesystem-safe
/// length regardless of how long the real `Message-ID` is.
#[must_use]
pub fn digest_dir_name(message_id: &str) -> String {
    let hash = Sha256::digest(message_id.as_bytes());
    hex::encode(hash)[..16].to_string()
}

/// Recognize common image formats by magic bytes, for attachments whose
/// filename carries no extension.
#[must_use]
pub fn sniff_image(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG")
        || bytes.starts_with(b"\xff\xd8\xff")
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
}
