use keystone::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Reads a `ClientConfig` from the JSON file given as the first argument,
/// or falls back to defaults.
fn load_config() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let config = serde_json::from_str(&raw)?;
            tracing::info!(%path, "loaded config");
            Ok(config)
        }
        None => Ok(ClientConfig::default()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

async fn show(
    label: &str,
    request: impl std::future::Future<Output = Result<Ticket<LoopbackPlatform>, TicketError>>,
) -> Result<(), TicketError> {
    let mut ticket = request.await?;
    println!("{label}: {ticket:?}");
    println!("{label}: {}", hex(ticket.get_bytes()?));
    ticket.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let mut client = KeystoneClientBuilder::new()
        .config(config)
        .build(LoopbackPlatform::auto_completing())?;
    let broker = client.broker();

    show("identity", broker.request_ticket_for_identity(123456u64)).await?;
    show("endpoint", broker.request_ticket_for_endpoint("192.168.0.5:1234")).await?;
    show("context", broker.request_ticket("test")).await?;

    // A request canceled before the authority answers never yields a ticket.
    client.platform().set_auto_complete(false);
    let pending = broker.issue("abandoned")?;
    let handle = pending.handle();
    pending.cancel();
    client.platform().complete(handle, [0u8; 4]);
    println!("abandoned: canceled {handle} before completion");

    if let Some(totals) = client.shutdown().await {
        println!(
            "pump: {} polls, {} delivered, {} discarded",
            totals.polls, totals.delivered, totals.discarded
        );
    }
    Ok(())
}
