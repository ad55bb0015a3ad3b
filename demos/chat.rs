//! Interactive chat against the simulator worker.
//!
//! ```text
//! SIMULATOR_BRIDGE=scripts/simulator_bridge.py RUST_LOG=simwire_client=debug \
//!     cargo run --example chat
//! ```
//!
//! Type a line to send a turn, `/feedback` for the evaluation, `/quit` to stop.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use simwire_client::{SimulatorClient, SimulatorConfig};

const SESSION_ID: i64 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = SimulatorConfig::from_env()?;
    let Some(client) = SimulatorClient::from_config(&config) else {
        eprintln!("simulator disabled (SIMULATOR_ENABLED=false)");
        return Ok(());
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/feedback" => match client.feedback(SESSION_ID, None).await {
                Ok(feedback) => println!("{}", serde_json::to_string_pretty(&feedback)?),
                Err(e) => eprintln!("[{}] {}", e.code(), e),
            },
            text => match client.chat_turn(SESSION_ID, text, None).await {
                Ok(reply) => {
                    println!("{}", reply.response_text);
                    if reply.status.is_finished() {
                        println!("(call ended)");
                    }
                }
                Err(e) => eprintln!("[{}] {}", e.code(), e),
            },
        }
    }

    client.shutdown().await;
    Ok(())
}
