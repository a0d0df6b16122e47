//! Reverse demo binary
//!
//! Sends request chains to a string-reversing worker over one-way channels.

use reverse_demo::{ReverseAction, spawn_demo};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reverse_demo=debug,porter_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Reverse Example: Request/Response over One-Way Channels ===\n");

    let store = spawn_demo();

    println!(">>> Sending: Reverse(\"Reverse me!\")");
    let reply = store
        .send_and_wait_for(
            ReverseAction::Reverse("Reverse me!".to_string()),
            ReverseAction::is_outcome,
            WAIT,
        )
        .await?;
    println!("Reply: {reply:?}");

    println!("\n>>> Sending: ReverseChained(\"Reverse me too!\")");
    let reply = store
        .send_and_wait_for(
            ReverseAction::ReverseChained("Reverse me too!".to_string()),
            ReverseAction::is_outcome,
            WAIT,
        )
        .await?;
    println!("Reply: {reply:?}");

    println!("\n>>> Sending: ReverseChecked(\"\")");
    let reply = store
        .send_and_wait_for(ReverseAction::ReverseChecked(String::new()), ReverseAction::is_outcome, WAIT)
        .await?;
    println!("Reply: {reply:?}");

    let results = store.state(|s| s.results.clone()).await;
    tracing::info!(count = results.len(), "Demo finished");
    println!("\nAll results: {results:?}");

    store.shutdown(WAIT).await?;

    println!("\n=== Demonstration Complete ===");
    println!("\nKey concepts demonstrated:");
    println!("  • Chain: a description of requests and the work between them");
    println!("  • Port: allocates ids, emits envelopes, resolves replies");
    println!("  • Listener: feeds finished chains back into the Store");
    Ok(())
}
