//! Newline-delimited JSON codec for worker records.
//!
//! **Never** pretty-print: the worker reads exactly one record per line,
//! so an embedded newline would split a call in two. `serde_json::to_writer`
//! escapes newlines inside strings, which keeps each call on one line.
//!
//! # Example
//!
//! ```
//! use simwire_client::codec::JsonLineCodec;
//! use simwire_client::protocol::{Call, Request};
//!
//! let call = Call::new(1, Request::Feedback { session_id: 3, user_profile: None });
//! let line = JsonLineCodec::encode(&call).unwrap();
//! assert_eq!(&line[..], b"{\"id\":1,\"action\":\"feedback\",\"sessionId\":3}\n");
//!
//! let resp = JsonLineCodec::decode(b"{\"id\":1,\"ok\":true,\"feedback\":{}}").unwrap();
//! assert!(resp.ok);
//! assert!(JsonLineCodec::decode(b"not json").is_none());
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Result;
use crate::protocol::{Call, Response};
use crate::sanitize::sanitize_line;

/// JSON-lines codec for calls and responses.
pub struct JsonLineCodec;

impl JsonLineCodec {
    /// Encode a call to a single `\n`-terminated line.
    ///
    /// # Errors
    ///
    /// Returns error if the call cannot be serialized.
    pub fn encode(call: &Call) -> Result<Bytes> {
        let mut writer = BytesMut::with_capacity(128).writer();
        serde_json::to_writer(&mut writer, call)?;
        let mut buf = writer.into_inner();
        buf.put_u8(b'\n');
        Ok(buf.freeze())
    }

    /// Decode one line (without its newline) into a response record.
    ///
    /// Returns `None` for anything that is not a well-formed response:
    /// invalid JSON, a non-object, or an object missing `id`/`ok`. Such
    /// lines are logged at debug level and otherwise ignored.
    pub fn decode(line: &[u8]) -> Option<Response> {
        let text = sanitize_line(line);
        match serde_json::from_str::<Response>(&text) {
            Ok(resp) => Some(resp),
            Err(e) => {
                tracing::debug!(error = %e, len = line.len(), "Ignoring unparseable worker line");
                None
            }
        }
    }
}
