//! Object storage collaborator used to hand recorded audio to the worker.
//!
//! The worker downloads audio itself, so voice turns need a time-limited
//! URL. Uploads store either a public object URL or a bare key; both are
//! accepted here.

use std::time::Duration;

use crate::error::Result;
use crate::launcher::BoxFuture;

/// Produces time-limited download URLs for stored objects.
pub trait AudioUrlSigner: Send + Sync {
    /// Presigned GET URL for `key`, valid for `expires`.
    fn presign_get<'a>(&'a self, key: &'a str, expires: Duration) -> BoxFuture<'a, Result<String>>;
}

/// Recover the object key from an object URL, or return `input` unchanged.
///
/// Handles both virtual-hosted (`https://bucket.s3.region.amazonaws.com/key`)
/// and path-style (`https://host/bucket/key`) URLs. Query and fragment are
/// dropped.
///
/// ```
/// use simwire_client::storage::object_key_from_url_or_key;
///
/// let key = object_key_from_url_or_key(
///     "https://voice.s3.ap-northeast-2.amazonaws.com/uploads/voice/a.mp3",
///     "voice",
/// );
/// assert_eq!(key, "uploads/voice/a.mp3");
/// assert_eq!(object_key_from_url_or_key("uploads/a.mp3", "voice"), "uploads/a.mp3");
/// ```
pub fn object_key_from_url_or_key(input: &str, bucket: &str) -> String {
    let rest = match input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return input.to_string(),
    };

    let path = match rest.find('/') {
        Some(slash) => &rest[slash + 1..],
        None => "",
    };
    let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();

    if !bucket.is_empty() {
        if let Some(key) = path.strip_prefix(bucket).and_then(|p| p.strip_prefix('/')) {
            return key.to_string();
        }
    }
    path.to_string()
}
