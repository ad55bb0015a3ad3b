//! # simwire-client
//!
//! Async client for a conversation simulator running as a worker subprocess.
//!
//! The worker (a script wrapping the model stack) speaks newline-delimited
//! JSON over its stdio. This crate launches it lazily, multiplexes
//! concurrent calls over the single pipe, correlates responses by id,
//! respawns the worker after it dies and re-initializes sessions against
//! the new instance.
//!
//! ## Architecture
//!
//! - **stdin**: one `{id, action, ...}` call per line, written by a single writer task
//! - **stdout**: one `{id, ok, ...}` response per line, read by a reader task
//! - **stderr**: diagnostics only, forwarded to `tracing` under `simwire::worker`
//!
//! ## Example
//!
//! ```ignore
//! use simwire_client::{SimulatorClient, SimulatorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SimulatorConfig::from_env()?;
//!     let client = SimulatorClient::from_config(&config).expect("simulator disabled");
//!
//!     let reply = client.chat_turn(42, "여보세요?", None).await?;
//!     println!("{}", reply.response_text);
//!
//!     let feedback = client.feedback(42, None).await?;
//!     println!("{:?}", feedback.score);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod launcher;
pub mod longform;
pub mod protocol;
pub mod sanitize;
pub mod session;
pub mod storage;
pub mod supervisor;
pub mod writer;

mod client;

pub use client::{ClientBuilder, SimulatorClient, DEFAULT_BRIDGE_SCRIPT, DEFAULT_PROGRAM};
pub use config::{AudioPolicy, SimulatorConfig};
pub use error::{Result, SimulatorError};
pub use launcher::{CommandLauncher, WorkerExit, WorkerIo, WorkerLauncher};
pub use longform::{LongformTurns, TurnInput, TurnReply};
pub use protocol::{ChatReply, ConversationStatus, SessionFeedback, SessionId};
pub use storage::AudioUrlSigner;
pub use supervisor::RespawnPolicy;
