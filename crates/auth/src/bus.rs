// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message-bus boundary to the authentication-manager process.
//!
//! The manager is a separate, already-running service reachable under a
//! well-known name. It exposes two remote calls and one broadcast signal;
//! everything here is `(token, server_url)` string pairs on the wire.

use std::future::Future;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::authenticator::AuthData;
use crate::error::AuthError;

/// Well-known bus name of the authentication-manager service.
pub const BUS_NAME: &str = "io.mender.AuthenticationManager";
/// Interface exposed by the manager object.
pub const BUS_INTERFACE: &str = "io.mender.Authentication1";
/// Remote call: return the currently held `(token, server_url)` pair.
pub const METHOD_GET_JWT_TOKEN: &str = "GetJwtToken";
/// Remote call: ask the manager to run its own fetch cycle.
pub const METHOD_FETCH_JWT_TOKEN: &str = "FetchJwtToken";
/// Signal emitted whenever the manager obtains or refreshes a token.
pub const SIGNAL_JWT_TOKEN_STATE_CHANGE: &str = "JwtTokenStateChange";

/// Bus subject for a member of the manager interface.
pub fn subject(member: &str) -> String {
    format!("{BUS_NAME}.{BUS_INTERFACE}.{member}")
}

/// Wire pair carried by replies and signals. Empty token means "no token".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub server_url: String,
}

impl From<AuthData> for TokenPair {
    fn from(auth: AuthData) -> Self {
        Self { token: auth.token, server_url: auth.server_url }
    }
}

impl From<TokenPair> for AuthData {
    fn from(pair: TokenPair) -> Self {
        Self { token: pair.token, server_url: pair.server_url }
    }
}

/// Reply to `FetchJwtToken`: the trigger was accepted, nothing more.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FetchReply {
    pub accepted: bool,
}

/// Client view of the authentication manager.
///
/// `subscribe` hands out receivers on a broadcast channel that is fed for
/// the lifetime of the bridge; the subscription outlives any single fetch.
pub trait ManagerBridge: Send + Sync + 'static {
    /// `GetJwtToken`: `None` when the manager holds no token.
    fn query_token(&self) -> impl Future<Output = Result<Option<AuthData>, AuthError>> + Send;

    /// `FetchJwtToken`: whether the manager accepted the trigger.
    fn trigger_fetch(&self) -> impl Future<Output = Result<bool, AuthError>> + Send;

    /// Receiver for `JwtTokenStateChange` signals.
    fn subscribe(&self) -> broadcast::Receiver<TokenPair>;
}

/// NATS-backed bridge to the manager service.
pub struct NatsBridge {
    client: async_nats::Client,
    signal_tx: broadcast::Sender<TokenPair>,
}

impl NatsBridge {
    /// Connect to the bus and establish the signal subscription.
    pub async fn connect(url: &str, token: Option<String>) -> Result<Self, AuthError> {
        let opts = match token {
            Some(token) => async_nats::ConnectOptions::with_token(token),
            None => async_nats::ConnectOptions::new(),
        };
        let client = opts
            .connect(url)
            .await
            .map_err(|e| AuthError::Ipc(format!("bus connect {url}: {e}")))?;

        let mut sub = client
            .subscribe(subject(SIGNAL_JWT_TOKEN_STATE_CHANGE))
            .await
            .map_err(|e| AuthError::Ipc(format!("signal subscribe: {e}")))?;

        let (signal_tx, _) = broadcast::channel(16);
        let pump_tx = signal_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                match serde_json::from_slice::<TokenPair>(&msg.payload) {
                    Ok(pair) => {
                        let _ = pump_tx.send(pair);
                    }
                    Err(e) => {
                        tracing::debug!(err = %e, "bridge: invalid token-change signal payload");
                    }
                }
            }
            tracing::debug!("bridge: signal subscription ended");
        });

        tracing::info!(url, "connected to authentication manager bus");
        Ok(Self { client, signal_tx })
    }

    async fn request(&self, member: &str) -> Result<async_nats::Message, AuthError> {
        self.client
            .request(subject(member), Vec::new().into())
            .await
            .map_err(|e| AuthError::Ipc(format!("{member}: {e}")))
    }
}

impl ManagerBridge for NatsBridge {
    async fn query_token(&self) -> Result<Option<AuthData>, AuthError> {
        let msg = self.request(METHOD_GET_JWT_TOKEN).await?;
        let pair: TokenPair = serde_json::from_slice(&msg.payload)
            .map_err(|e| AuthError::Ipc(format!("malformed GetJwtToken reply: {e}")))?;
        if pair.token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(pair.into()))
        }
    }

    async fn trigger_fetch(&self) -> Result<bool, AuthError> {
        let msg = self.request(METHOD_FETCH_JWT_TOKEN).await?;
        let reply: FetchReply = serde_json::from_slice(&msg.payload)
            .map_err(|e| AuthError::Ipc(format!("malformed FetchJwtToken reply: {e}")))?;
        Ok(reply.accepted)
    }

    fn subscribe(&self) -> broadcast::Receiver<TokenPair> {
        self.signal_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_follow_service_interface_member() {
        assert_eq!(
            subject(METHOD_GET_JWT_TOKEN),
            "io.mender.AuthenticationManager.io.mender.Authentication1.GetJwtToken"
        );
    }

    #[test]
    fn token_pair_defaults_to_empty() -> anyhow::Result<()> {
        let pair: TokenPair = serde_json::from_str("{}")?;
        assert!(pair.token.is_empty());
        assert!(pair.server_url.is_empty());
        Ok(())
    }
}
