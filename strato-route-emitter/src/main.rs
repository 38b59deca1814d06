use anyhow::Context;
use clap::Parser;
use strato_route_emitter::config::Config;
use strato_route_emitter::emitter::{LogEmitter, NatsEmitter};
use strato_route_emitter::events::EventReader;
use strato_route_emitter::reconcile;
use strato_routes::RoutingTable;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    info!(emitter_id = %Uuid::new_v4(), "starting route emitter");

    let table = RoutingTable::new(config.direct_instance_routes);
    let events = EventReader::open(&config.events).await?;

    let mut sigint = signal(SignalKind::interrupt()).context("failed to set up SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to set up SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    };

    match &config.nats_url {
        Some(url) => {
            let client = match (&config.nats_username, &config.nats_password) {
                (Some(user), Some(password)) => {
                    async_nats::ConnectOptions::with_user_and_password(
                        user.clone(),
                        password.clone(),
                    )
                    .connect(url.as_str())
                    .await
                }
                _ => async_nats::connect(url.as_str()).await,
            }
            .with_context(|| format!("failed to connect to NATS at {url}"))?;
            info!(url = %url, "connected to NATS");

            let emitter = NatsEmitter::new(client);
            reconcile::run(table, events, &emitter, config.sync_interval(), shutdown).await
        }
        None => {
            info!("no NATS URL configured; running in dry-run mode");
            reconcile::run(table, events, &LogEmitter, config.sync_interval(), shutdown).await
        }
    }
}
