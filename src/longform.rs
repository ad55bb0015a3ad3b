//! Turn orchestration for long-form practice calls.
//!
//! Sits between a request handler and the [`SimulatorClient`]. A turn never
//! fails from the caller's point of view: when the simulator is disabled,
//! unreachable or unhelpful, the turn gets a static fallback reply and the
//! conversation can continue.

use std::time::Duration;

use crate::client::SimulatorClient;
use crate::config::{AudioPolicy, SimulatorConfig, DEFAULT_AUDIO_URL_EXPIRES};
use crate::error::Result;
use crate::protocol::{ChatReply, ConversationStatus, SessionFeedback, SessionId};
use crate::storage::{object_key_from_url_or_key, AudioUrlSigner};

/// Reply used whenever the simulator cannot produce one.
pub const FALLBACK_REPLY_TEXT: &str = "죄송합니다, 잘 못 들었어요. 다시 한 번 말씀해 주시겠어요?";

/// One user turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub session_id: SessionId,
    /// Typed text. Takes precedence over audio.
    pub text: Option<String>,
    /// Object key or URL of recorded audio.
    pub audio: Option<String>,
    pub profile: Option<String>,
}

impl TurnInput {
    pub fn text(session_id: SessionId, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn voice(session_id: SessionId, audio: impl Into<String>) -> Self {
        Self {
            session_id,
            audio: Some(audio.into()),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    fn typed_text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Result of one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    /// What the user said: the typed text or the transcript.
    pub user_text: Option<String>,
    pub ai_text: String,
    pub ai_audio_base64: Option<String>,
    pub status: ConversationStatus,
    /// `true` when `ai_text` is the static fallback.
    pub fallback: bool,
}

impl TurnReply {
    pub fn fallback(user_text: Option<String>) -> Self {
        Self {
            user_text,
            ai_text: FALLBACK_REPLY_TEXT.to_string(),
            ai_audio_base64: None,
            status: ConversationStatus::Ongoing,
            fallback: true,
        }
    }
}

/// Drives simulator turns for long-form sessions.
pub struct LongformTurns<S> {
    client: Option<SimulatorClient>,
    signer: S,
    bucket: String,
    audio: AudioPolicy,
    audio_url_expires: Duration,
}

impl<S: AudioUrlSigner> LongformTurns<S> {
    /// `client` is `None` when the simulator is turned off.
    pub fn new(client: Option<SimulatorClient>, signer: S, bucket: impl Into<String>) -> Self {
        Self {
            client,
            signer,
            bucket: bucket.into(),
            audio: AudioPolicy::default(),
            audio_url_expires: DEFAULT_AUDIO_URL_EXPIRES,
        }
    }

    /// Take the audio policy and URL lifetime from `config`.
    pub fn with_config(mut self, config: &SimulatorConfig) -> Self {
        self.audio = config.audio.clone();
        self.audio_url_expires = config.audio_url_expires;
        self
    }

    pub fn audio_policy(mut self, policy: AudioPolicy) -> Self {
        self.audio = policy;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Run one turn, falling back to the static reply on any failure.
    pub async fn reply(&self, input: TurnInput) -> TurnReply {
        let typed = input.typed_text().map(str::to_string);
        let Some(client) = &self.client else {
            return TurnReply::fallback(typed);
        };

        match self.try_reply(client, &input).await {
            Ok(Some((user_text, reply))) => TurnReply {
                user_text: Some(user_text),
                ai_text: reply.response_text,
                ai_audio_base64: self.audio.filter(reply.audio_base64),
                status: reply.status,
                fallback: false,
            },
            Ok(None) => {
                tracing::info!(session_id = input.session_id, "No usable user text, sending fallback reply");
                TurnReply::fallback(typed)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = input.session_id,
                    code = e.code(),
                    error = %e,
                    "Simulator turn failed, sending fallback reply"
                );
                TurnReply::fallback(typed)
            }
        }
    }

    async fn try_reply(&self, client: &SimulatorClient, input: &TurnInput) -> Result<Option<(String, ChatReply)>> {
        let profile = input.profile.as_deref();

        let user_text = match (input.typed_text(), input.audio.as_deref()) {
            (Some(text), _) => text.to_string(),
            (None, Some(audio)) if !audio.trim().is_empty() => {
                let key = object_key_from_url_or_key(audio.trim(), &self.bucket);
                let url = self.signer.presign_get(&key, self.audio_url_expires).await?;
                match client.transcribe(input.session_id, &url, profile).await? {
                    Some(transcript) => transcript,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };

        let reply = client.chat_turn(input.session_id, &user_text, profile).await?;
        Ok(Some((user_text, reply)))
    }

    /// Evaluation for a finished session; empty when unavailable.
    pub async fn finish(&self, session_id: SessionId, profile: Option<&str>) -> SessionFeedback {
        let Some(client) = &self.client else {
            return SessionFeedback::default();
        };

        match client.feedback(session_id, profile).await {
            Ok(feedback) => feedback,
            Err(e) => {
                tracing::warn!(session_id, code = e.code(), error = %e, "Simulator feedback failed");
                SessionFeedback::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::oneshot;

    use crate::error::SimulatorError;
    use crate::launcher::{BoxFuture, WorkerExit, WorkerIo, WorkerLauncher};

    /// In-memory worker answering every call through `reply`.
    struct FakeWorker {
        reply: fn(&Value) -> Value,
    }

    impl WorkerLauncher for FakeWorker {
        fn launch(&self) -> Result<WorkerIo> {
            let (client_in, worker_in) = tokio::io::duplex(64 * 1024);
            let (mut worker_out, client_out) = tokio::io::duplex(64 * 1024);
            let reply = self.reply;

            let task = tokio::spawn(async move {
                let mut lines = BufReader::new(worker_in).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let call: Value = serde_json::from_str(&line).unwrap();
                    let mut response = reply(&call);
                    response["id"] = call["id"].clone();
                    let out = format!("{}\n", response);
                    if worker_out.write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });

            let (kill, kill_rx) = oneshot::channel::<()>();
            let exit = Box::pin(async move {
                let mut task = task;
                tokio::select! {
                    _ = &mut task => {}
                    _ = kill_rx => {
                        task.abort();
                        let _ = task.await;
                    }
                }
                WorkerExit { code: Some(0) }
            });

            Ok(WorkerIo {
                stdin: Box::new(client_in),
                stdout: Box::new(client_out),
                stderr: None,
                exit,
                kill,
            })
        }
    }

    fn simulator(call: &Value) -> Value {
        match call["action"].as_str() {
            Some("chat") => json!({
                "ok": true,
                "responseText": format!("echo: {}", call["userInput"].as_str().unwrap_or_default()),
                "status": "ongoing",
                "audioBase64": "QUJD",
            }),
            Some("transcribe") => {
                if call["audioUrl"].as_str().unwrap_or_default().contains("silence") {
                    json!({"ok": true, "transcript": null})
                } else {
                    json!({"ok": true, "transcript": "여보세요"})
                }
            }
            Some("feedback") => json!({"ok": true, "feedback": {"score": 80, "summary": "good"}}),
            _ => json!({"ok": true}),
        }
    }

    fn broken(call: &Value) -> Value {
        match call["action"].as_str() {
            Some("init") => json!({"ok": true}),
            _ => json!({"ok": false, "error": "model offline"}),
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSigner {
        keys: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl AudioUrlSigner for RecordingSigner {
        fn presign_get<'a>(&'a self, key: &'a str, expires: Duration) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                if self.fail {
                    return Err(SimulatorError::Storage("access denied".into()));
                }
                self.keys.lock().unwrap().push(key.to_string());
                Ok(format!("https://signed.example/{}?expires={}", key, expires.as_secs()))
            })
        }
    }

    fn turns(reply: fn(&Value) -> Value, signer: RecordingSigner) -> LongformTurns<RecordingSigner> {
        let client = SimulatorClient::builder().launcher(FakeWorker { reply }).build();
        LongformTurns::new(Some(client), signer, "voice")
    }

    #[tokio::test]
    async fn test_text_turn() {
        let turns = turns(simulator, RecordingSigner::default());
        let reply = turns.reply(TurnInput::text(1, "  hello ")).await;

        assert!(!reply.fallback);
        assert_eq!(reply.user_text.as_deref(), Some("hello"));
        assert_eq!(reply.ai_text, "echo: hello");
        assert_eq!(reply.ai_audio_base64.as_deref(), Some("QUJD"));
        assert_eq!(reply.status, ConversationStatus::Ongoing);
    }

    #[tokio::test]
    async fn test_voice_turn_presigns_and_transcribes() {
        let signer = RecordingSigner::default();
        let turns = turns(simulator, signer.clone());

        let reply = turns
            .reply(TurnInput::voice(2, "https://voice.s3.ap-northeast-2.amazonaws.com/u/a.mp3"))
            .await;

        assert!(!reply.fallback);
        assert_eq!(reply.user_text.as_deref(), Some("여보세요"));
        assert_eq!(reply.ai_text, "echo: 여보세요");
        assert_eq!(*signer.keys.lock().unwrap(), vec!["u/a.mp3".to_string()]);
    }

    #[tokio::test]
    async fn test_silent_voice_falls_back() {
        let turns = turns(simulator, RecordingSigner::default());
        let reply = turns.reply(TurnInput::voice(3, "uploads/silence.mp3")).await;

        assert!(reply.fallback);
        assert_eq!(reply.ai_text, FALLBACK_REPLY_TEXT);
        assert_eq!(reply.user_text, None);
    }

    #[tokio::test]
    async fn test_signer_failure_falls_back() {
        let signer = RecordingSigner {
            fail: true,
            ..RecordingSigner::default()
        };
        let turns = turns(simulator, signer);
        let reply = turns.reply(TurnInput::voice(4, "uploads/a.mp3")).await;
        assert!(reply.fallback);
    }

    #[tokio::test]
    async fn test_worker_error_falls_back() {
        let turns = turns(broken, RecordingSigner::default());
        let reply = turns.reply(TurnInput::text(5, "hi")).await;

        assert!(reply.fallback);
        assert_eq!(reply.user_text.as_deref(), Some("hi"));
        assert_eq!(turns.finish(5, None).await, SessionFeedback::default());
    }

    #[tokio::test]
    async fn test_disabled_simulator() {
        let turns = LongformTurns::new(None, RecordingSigner::default(), "voice");
        assert!(!turns.is_enabled());

        let reply = turns.reply(TurnInput::text(6, "hi")).await;
        assert_eq!(reply, TurnReply::fallback(Some("hi".into())));
        assert_eq!(turns.finish(6, None).await, SessionFeedback::default());
    }

    #[tokio::test]
    async fn test_audio_policy_applied() {
        let turns = turns(simulator, RecordingSigner::default()).audio_policy(AudioPolicy {
            disabled: false,
            max_len: 2,
        });
        let reply = turns.reply(TurnInput::text(7, "hi")).await;

        assert!(!reply.fallback);
        assert_eq!(reply.ai_audio_base64, None);
    }

    #[tokio::test]
    async fn test_finish_returns_feedback() {
        let turns = turns(simulator, RecordingSigner::default());
        let feedback = turns.finish(8, Some(r#"{"user_profile": {}}"#)).await;

        assert_eq!(feedback.score, Some(80.0));
        assert_eq!(feedback.summary.as_deref(), Some("good"));
    }
}
