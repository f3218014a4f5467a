use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use offerwatch::manager::{EventSink, FnSink, OfferEvent};
use offerwatch::AppConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "offerwatch", about = "Trade offer poller and lifecycle manager")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/offerwatch.toml")]
    config: String,

    /// Run a single full poll, print the poll state as JSON and exit
    #[arg(long)]
    once: bool,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

fn log_event(event: &OfferEvent) {
    let offer_id = event.offer().and_then(|o| o.id()).unwrap_or_default();
    match event {
        OfferEvent::PollFailure(e) => warn!(error = %e, "Poll failed"),
        OfferEvent::SessionExpired(message) => error!(%message, "Session expired; log in again"),
        OfferEvent::SentOfferChanged { offer, old_state }
        | OfferEvent::ReceivedOfferChanged { offer, old_state } => info!(
            event = event.name(),
            offer_id,
            from = %old_state,
            to = %offer.state,
            "Offer changed"
        ),
        OfferEvent::PollSuccess | OfferEvent::PollData(_) | OfferEvent::OfferList { .. } => {}
        _ => info!(event = event.name(), offer_id, "Offer event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config
    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let config = AppConfig::from_toml(&config_str)?
        .with_env(std::env::var(offerwatch::ACCESS_TOKEN_ENV).ok());

    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(FnSink(log_event))];
    let manager =
        offerwatch::build_manager(&config, sinks, None).context("Failed to build manager")?;

    if cli.once {
        manager
            .poll(true)
            .await
            .map_err(|e| anyhow::anyhow!("Poll failed: {e}"))?;
        let state = manager.poll_state();
        let output = if cli.pretty {
            serde_json::to_string_pretty(&state)?
        } else {
            serde_json::to_string(&state)?
        };
        println!("{output}");
        return Ok(());
    }

    manager.start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Shutting down");
    manager.shutdown();

    Ok(())
}
