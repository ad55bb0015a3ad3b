//! Protocol module - line framing and record types.
//!
//! This module implements the worker's line protocol:
//! - Line buffer for accumulating partial reads from stdout
//! - Call/response records and the typed results built from them

mod line_buffer;
mod message;

pub use line_buffer::{LineBuffer, DEFAULT_MAX_LINE_LENGTH};
pub use message::{
    Action, Call, ChatReply, ConversationStatus, Request, Response, SessionFeedback, SessionId,
    DEFAULT_USER_PROFILE,
};
