//! Protocol records exchanged with the simulator worker.
//!
//! Client → worker, one JSON object per line:
//!
//! ```text
//! {"id":1,"action":"init","sessionId":7,"userProfile":"{...}"}
//! {"id":2,"action":"chat","sessionId":7,"userInput":"hello","userProfile":"{...}"}
//! {"id":3,"action":"transcribe","sessionId":7,"audioUrl":"https://...","userProfile":"{...}"}
//! {"id":4,"action":"feedback","sessionId":7,"userProfile":"{...}"}
//! ```
//!
//! Worker → client:
//!
//! ```text
//! {"id":2,"ok":true,"responseText":"...","status":"ongoing","audioBase64":null}
//! {"id":3,"ok":false,"error":"..."}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Profile sent with `init` when the caller supplies none.
pub const DEFAULT_USER_PROFILE: &str =
    r#"{"user_profile": {"name": "사용자", "scenario_type": "default"}}"#;

/// Session identifier, shared with the persistence layer.
pub type SessionId = i64;

/// Action name of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Init,
    Chat,
    Transcribe,
    Feedback,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Init => "init",
            Action::Chat => "chat",
            Action::Transcribe => "transcribe",
            Action::Feedback => "feedback",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific payload of a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Request {
    Init {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userProfile")]
        user_profile: String,
    },
    Chat {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userInput")]
        user_input: String,
        #[serde(rename = "userProfile", skip_serializing_if = "Option::is_none")]
        user_profile: Option<String>,
    },
    Transcribe {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "audioUrl")]
        audio_url: String,
        #[serde(rename = "userProfile", skip_serializing_if = "Option::is_none")]
        user_profile: Option<String>,
    },
    Feedback {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        #[serde(rename = "userProfile", skip_serializing_if = "Option::is_none")]
        user_profile: Option<String>,
    },
}

impl Request {
    pub fn action(&self) -> Action {
        match self {
            Request::Init { .. } => Action::Init,
            Request::Chat { .. } => Action::Chat,
            Request::Transcribe { .. } => Action::Transcribe,
            Request::Feedback { .. } => Action::Feedback,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Request::Init { session_id, .. }
            | Request::Chat { session_id, .. }
            | Request::Transcribe { session_id, .. }
            | Request::Feedback { session_id, .. } => *session_id,
        }
    }
}

/// One outbound call: a request plus its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

impl Call {
    pub fn new(id: u64, request: Request) -> Self {
        Self { id, request }
    }
}

/// One inbound response record.
///
/// Action-specific fields stay in `fields` until the facade extracts them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    /// Look up an action-specific field, treating JSON `null` as absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }
}

/// Whether the simulated conversation continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationStatus {
    Ongoing,
    Finished,
    Other(String),
}

impl ConversationStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "ongoing" => ConversationStatus::Ongoing,
            "finished" => ConversationStatus::Finished,
            other => ConversationStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ConversationStatus::Ongoing => "ongoing",
            ConversationStatus::Finished => "finished",
            ConversationStatus::Other(s) => s,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ConversationStatus::Finished)
    }
}

impl Serialize for ConversationStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Result of a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response_text: String,
    pub status: ConversationStatus,
    pub audio_base64: Option<String>,
}

/// Post-session evaluation produced by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub advice: Option<String>,
    #[serde(default, rename = "good_points", alias = "strengths")]
    pub strengths: Option<Vec<String>>,
    #[serde(default, rename = "bad_points", alias = "weaknesses")]
    pub weaknesses: Option<Vec<String>>,
    #[serde(default, rename = "detailed_analysis", alias = "analysis")]
    pub analysis: Option<Value>,
}
