mod alerts;
mod click_guard;
mod commands;
mod config;
mod directory;
mod http;
mod platform;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::alerts::silence::AlertmanagerClient;
use crate::alerts::AlertRelay;
use crate::commands::CommandRouter;
use crate::config::Config;
use crate::directory::{ConfigFileStore, SubscriberDirectory};
use crate::platform::hangouts::client::{GoogleChatClient, PubSubSubscription};
use crate::platform::hangouts::HangoutsPlatform;

#[tokio::main]
async fn main() -> Result<()> {
    let mut verbose = false;
    let mut config_path = PathBuf::from("botanist.toml");
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbose = true,
            _ => config_path = PathBuf::from(arg),
        }
    }

    // Initialize logging
    let default_filter = if verbose {
        "debug,botanist=debug"
    } else {
        "info,botanist=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Project: {}", config.hangouts.project);
    info!("  Subscription: {}", config.hangouts.subscription);
    info!("  Alert listener: {}", config.alertmanager.listen);

    let directory = SubscriberDirectory::new(
        config.hangouts.alert_subscribers.clone(),
        Arc::new(ConfigFileStore::new(&config_path, config.clone())),
    );
    info!("  Alert groups: {}", directory.group_count().await);
    let platform = Arc::new(HangoutsPlatform::new(
        Arc::new(GoogleChatClient::new(&config.hangouts)),
        directory,
        CommandRouter::with_default_commands()?,
        Arc::new(AlertmanagerClient::new(config.alertmanager.silence_timeout())),
    ));

    let relay = Arc::new(AlertRelay::new(platform.clone()));
    let subscription = PubSubSubscription::new(&config.hangouts);

    info!("Botanist is starting...");
    tokio::select! {
        result = alerts::webhook::serve(config.alertmanager.listen, relay) => result?,
        result = platform.run(subscription) => result?,
        _ = tokio::signal::ctrl_c() => info!("Botanist exiting"),
    }

    Ok(())
}
