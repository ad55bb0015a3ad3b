//! Client builder and facade.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring how the worker
//! is launched and supervised. The [`SimulatorClient`] is the public surface:
//! every operation ensures its session is initialized, then issues one
//! correlated call and awaits the result.
//!
//! # Example
//!
//! ```ignore
//! use simwire_client::{CommandLauncher, SimulatorClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SimulatorClient::builder()
//!         .launcher(CommandLauncher::new("python").arg("scripts/simulator_bridge.py"))
//!         .call_timeout(std::time::Duration::from_secs(60))
//!         .build();
//!
//!     let reply = client.chat_turn(1, "hello", None).await?;
//!     println!("{} ({})", reply.response_text, reply.status.as_str());
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use crate::config::SimulatorConfig;
use crate::error::{Result, SimulatorError};
use crate::launcher::{CommandLauncher, WorkerLauncher};
use crate::protocol::{ChatReply, ConversationStatus, Request, Response, SessionFeedback, SessionId};
use crate::session::init_profile;
use crate::supervisor::{RespawnPolicy, Supervisor, SupervisorConfig};

/// Default interpreter for the bridge script.
pub const DEFAULT_PROGRAM: &str = "python";

/// Default bridge script, relative to the working directory.
pub const DEFAULT_BRIDGE_SCRIPT: &str = "./scripts/simulator_bridge.py";

/// Builder for configuring and creating a simulator client.
pub struct ClientBuilder {
    launcher: Option<Box<dyn WorkerLauncher>>,
    supervisor: SupervisorConfig,
    call_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            launcher: None,
            supervisor: SupervisorConfig::default(),
            call_timeout: None,
        }
    }

    /// Set how worker instances are launched.
    ///
    /// Default: `python ./scripts/simulator_bridge.py`
    pub fn launcher(mut self, launcher: impl WorkerLauncher) -> Self {
        self.launcher = Some(Box::new(launcher));
        self
    }

    /// Set the respawn policy.
    ///
    /// Default: respawn immediately, unbounded
    pub fn respawn_policy(mut self, policy: RespawnPolicy) -> Self {
        self.supervisor.respawn = policy;
        self
    }

    /// Bound how long a single call may wait for its response.
    ///
    /// Default: no timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.supervisor.writer.channel_capacity = capacity;
        self
    }

    /// Set the maximum accepted length of one worker output line.
    ///
    /// Default: 64 MiB
    pub fn max_line_length(mut self, max: usize) -> Self {
        self.supervisor.max_line_length = max;
        self
    }

    /// Build the client. The worker is not started until the first call.
    pub fn build(self) -> SimulatorClient {
        let call_timeout = self.call_timeout;
        let supervisor = match self.launcher {
            Some(launcher) => Supervisor::new(BoxedLauncher(launcher), self.supervisor),
            None => Supervisor::new(
                CommandLauncher::new(DEFAULT_PROGRAM).arg(DEFAULT_BRIDGE_SCRIPT),
                self.supervisor,
            ),
        };
        SimulatorClient {
            supervisor,
            call_timeout,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct BoxedLauncher(Box<dyn WorkerLauncher>);

impl WorkerLauncher for BoxedLauncher {
    fn launch(&self) -> Result<crate::launcher::WorkerIo> {
        self.0.launch()
    }
}

/// Handle to the simulator worker.
///
/// Cheap to clone; all clones share one worker process.
#[derive(Clone)]
pub struct SimulatorClient {
    supervisor: Supervisor,
    call_timeout: Option<Duration>,
}

impl SimulatorClient {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client from configuration.
    ///
    /// Returns `None` when the simulator is disabled by configuration.
    pub fn from_config(config: &SimulatorConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }

        let launcher = CommandLauncher::new(&config.program).arg(&config.bridge_script);
        let mut builder = Self::builder()
            .launcher(launcher)
            .respawn_policy(config.respawn.clone());
        if let Some(timeout) = config.call_timeout {
            builder = builder.call_timeout(timeout);
        }
        Some(builder.build())
    }

    /// Make sure the worker has a simulator for `session_id`.
    ///
    /// Sends `init` at most once per session per worker instance. A failed
    /// `init` leaves the session uninitialized, so the next call retries.
    pub async fn ensure_initialized(&self, session_id: SessionId, profile: Option<&str>) -> Result<()> {
        if self.supervisor.is_initialized(session_id) {
            return Ok(());
        }

        let request = Request::Init {
            session_id,
            user_profile: init_profile(profile),
        };
        let (generation, _) = self.supervisor.call(request, self.call_timeout).await?;

        if !self.supervisor.mark_initialized(session_id, generation) {
            tracing::debug!(session_id, generation, "Worker exited right after init");
        }
        Ok(())
    }

    /// Run one conversational turn.
    pub async fn chat_turn(
        &self,
        session_id: SessionId,
        user_input: &str,
        profile: Option<&str>,
    ) -> Result<ChatReply> {
        self.ensure_initialized(session_id, profile).await?;

        let response = self
            .call(Request::Chat {
                session_id,
                user_input: user_input.to_string(),
                user_profile: profile.map(str::to_string),
            })
            .await?;

        chat_reply_from(&response)
    }

    /// Fetch the post-session evaluation.
    pub async fn feedback(&self, session_id: SessionId, profile: Option<&str>) -> Result<SessionFeedback> {
        self.ensure_initialized(session_id, profile).await?;

        let response = self
            .call(Request::Feedback {
                session_id,
                user_profile: profile.map(str::to_string),
            })
            .await?;

        Ok(feedback_from(&response))
    }

    /// Transcribe recorded audio the worker can fetch from `audio_url`.
    ///
    /// `Ok(None)` means no speech was detected.
    pub async fn transcribe(
        &self,
        session_id: SessionId,
        audio_url: &str,
        profile: Option<&str>,
    ) -> Result<Option<String>> {
        self.ensure_initialized(session_id, profile).await?;

        let response = self
            .call(Request::Transcribe {
                session_id,
                audio_url: audio_url.to_string(),
                user_profile: profile.map(str::to_string),
            })
            .await?;

        Ok(response
            .str_field("transcript")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string))
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let (_, response) = self.supervisor.call(request, self.call_timeout).await?;
        Ok(response)
    }

    /// Start the worker ahead of the first call.
    pub async fn ensure_running(&self) -> Result<()> {
        self.supervisor.ensure_running().await
    }

    /// Kill the worker. The next call launches a new one.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// Allow launches again after the respawn policy gave up.
    pub fn reset_respawn(&self) {
        self.supervisor.reset_respawn();
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn pending_calls(&self) -> usize {
        self.supervisor.pending_calls()
    }

    pub fn initialized_sessions(&self) -> usize {
        self.supervisor.initialized_sessions()
    }

    /// Number of worker instances launched so far.
    pub fn worker_generation(&self) -> u64 {
        self.supervisor.generation()
    }
}

fn chat_reply_from(response: &Response) -> Result<ChatReply> {
    // Lone surrogates were stripped when the line was decoded.
    let text = response.str_field("responseText").unwrap_or_default();
    if text.trim().is_empty() {
        return Err(SimulatorError::EmptyAfterSanitize);
    }

    let status = response
        .str_field("status")
        .map(ConversationStatus::parse)
        .unwrap_or(ConversationStatus::Ongoing);

    let audio_base64 = response
        .str_field("audioBase64")
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    Ok(ChatReply {
        response_text: text.to_string(),
        status,
        audio_base64,
    })
}

fn feedback_from(response: &Response) -> SessionFeedback {
    let Some(value) = response.field("feedback") else {
        return SessionFeedback::default();
    };
    match serde_json::from_value(value.clone()) {
        Ok(feedback) => feedback,
        Err(e) => {
            tracing::warn!(error = %e, "Unexpected feedback shape from worker");
            SessionFeedback::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> Response {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_builder_configuration() {
        let builder = SimulatorClient::builder()
            .call_timeout(Duration::from_secs(10))
            .channel_capacity(16)
            .max_line_length(1024)
            .respawn_policy(RespawnPolicy {
                backoff: Some(Duration::from_millis(100)),
                max_consecutive_failures: Some(3),
            });

        assert_eq!(builder.call_timeout, Some(Duration::from_secs(10)));
        assert_eq!(builder.supervisor.writer.channel_capacity, 16);
        assert_eq!(builder.supervisor.max_line_length, 1024);
        assert_eq!(builder.supervisor.respawn.max_consecutive_failures, Some(3));
    }

    #[test]
    fn test_build_does_not_launch() {
        let client = ClientBuilder::default().build();
        assert!(!client.is_running());
        assert_eq!(client.worker_generation(), 0);
    }

    #[test]
    fn test_chat_reply_fields() {
        let reply = chat_reply_from(&response(json!({
            "id": 1, "ok": true, "responseText": "hi", "status": "finished", "audioBase64": "AAAA"
        })))
        .unwrap();

        assert_eq!(reply.response_text, "hi");
        assert!(reply.status.is_finished());
        assert_eq!(reply.audio_base64.as_deref(), Some("AAAA"));
    }

    #[test]
    fn test_chat_reply_empty_text_is_distinct_error() {
        let err = chat_reply_from(&response(json!({"id": 1, "ok": true, "responseText": ""})))
            .unwrap_err();
        assert!(matches!(err, SimulatorError::EmptyAfterSanitize));

        let err = chat_reply_from(&response(json!({"id": 1, "ok": true}))).unwrap_err();
        assert_eq!(err.code(), "SIMULATOR_EMPTY_RESPONSE");
    }

    #[test]
    fn test_feedback_missing_is_default() {
        let fb = feedback_from(&response(json!({"id": 1, "ok": true})));
        assert_eq!(fb, SessionFeedback::default());

        let fb = feedback_from(&response(json!({"id": 1, "ok": true, "feedback": {"score": 50}})));
        assert_eq!(fb.score, Some(50.0));
    }
}
