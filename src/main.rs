use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use venux_rs::config::ClientConfig;
use venux_rs::engine::validator::OrderBookValidator;
use venux_rs::session::Credential;
use venux_rs::transport::websocket::WebSocketTransport;
use venux_rs::{logging_dispatcher, telemetry, ClientFacade};

/// Connects to the venue, runs the scripted demo, waits a moment and exits.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    api_key: String,
    secret_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env
    let cli = Cli::parse();

    let config = ClientConfig::load()?;
    telemetry::init_tracing(&config.log_filter);
    telemetry::init_metrics()?;

    let credential = Credential::new(cli.api_key, cli.secret_key);
    let transport = Arc::new(WebSocketTransport::new(config.transport.clone()));
    let client = ClientFacade::new(
        transport,
        config.session.poll_interval(),
        config.transport.event_buffer,
    );

    let mut delivery = client
        .connect(
            &credential,
            logging_dispatcher(OrderBookValidator::new()),
            config.session.ready_timeout(),
        )
        .await?;
    if let Err(e) = client.demo(&config.demo) {
        error!(error = %e, "Demo failed");
        client.stop().await;
        delivery.abort();
        return Err(e.into());
    }

    info!("Waiting a moment and exiting.");
    let finished_early = tokio::select! {
        _ = tokio::time::sleep(config.session.shutdown_grace()) => None,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted");
            None
        }
        result = &mut delivery => Some(result),
    };

    client.stop().await;

    let result = match finished_early {
        Some(result) => result,
        None => delivery.await,
    };
    match result? {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "Fatal client error");
            Err(e.into())
        }
    }
}
