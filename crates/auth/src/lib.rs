// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device-side authentication subsystem for a fleet-managed agent.
//!
//! The daemon half (`manager`) holds the device key, probes identity, signs
//! authentication requests and exchanges them with the backend for a JWT.
//! The client half (`Authenticator` over a `ManagerBridge`) caches that JWT
//! and coordinates concurrent consumers over the message bus.

pub mod authenticator;
pub mod bus;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod identity;
pub mod manager;
pub mod signer;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::NatsBridge;
use crate::config::AuthConfig;
use crate::fetcher::FetchConfig;
use crate::manager::ManagerService;
use crate::signer::Ed25519Signer;

pub use crate::authenticator::{AuthData, Authenticator};
pub use crate::error::AuthError;

/// Run the authentication manager daemon until shutdown.
pub async fn run(config: AuthConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let signer = Arc::new(Ed25519Signer::load_or_generate(&config.private_key)?);
    let http = fetcher::build_http_client(config.server_certificate.as_deref())?;
    let fetch = FetchConfig {
        server_url: config.server_url.clone(),
        identity_probe: config.identity_probe.clone(),
        tenant_token: config.tenant_token.clone(),
    };

    let opts = match config.bus_token {
        Some(ref token) => async_nats::ConnectOptions::with_token(token.clone()),
        None => async_nats::ConnectOptions::new(),
    };
    let bus = opts.connect(&config.bus_url).await?;
    tracing::info!(url = %config.bus_url, "connected to message bus");

    let service = ManagerService::new(bus, http, fetch, signer);

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signals.cancel();
        }
    });

    service.run(shutdown).await
}

/// Connect an [`Authenticator`] client to an already-running manager.
pub async fn connect(config: &AuthConfig) -> Result<Authenticator, AuthError> {
    let bridge = NatsBridge::connect(&config.bus_url, config.bus_token.clone()).await?;
    Ok(Authenticator::spawn(bridge, config.fetch_timeout()))
}
