// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication-manager service: the bus-facing side of the subsystem.
//!
//! Serves `GetJwtToken` and `FetchJwtToken` on the well-known subjects and
//! publishes `JwtTokenStateChange` whenever a fetch lands a new token.
//! Fetch requests arriving while a cycle is running coalesce into it; the
//! signal that ends the cycle answers everyone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::bus::{
    subject, FetchReply, TokenPair, METHOD_FETCH_JWT_TOKEN, METHOD_GET_JWT_TOKEN,
    SIGNAL_JWT_TOKEN_STATE_CHANGE,
};
use crate::fetcher::{self, FetchConfig};
use crate::signer::Signer;

/// Token held by the manager plus the single-fetch latch.
pub struct ManagerState {
    current: RwLock<TokenPair>,
    fetch_in_flight: AtomicBool,
}

impl ManagerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(TokenPair::default()),
            fetch_in_flight: AtomicBool::new(false),
        })
    }

    /// Current pair; empty token when no authentication has succeeded yet.
    pub async fn current(&self) -> TokenPair {
        self.current.read().await.clone()
    }

    pub async fn store(&self, pair: TokenPair) {
        *self.current.write().await = pair;
    }

    /// Claim the fetch latch. Returns false when a cycle is already running.
    pub fn begin_fetch(&self) -> bool {
        self.fetch_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_fetch(&self) {
        self.fetch_in_flight.store(false, Ordering::SeqCst);
    }
}

/// The manager service: owns the bus client, the HTTP client and the signer.
pub struct ManagerService {
    state: Arc<ManagerState>,
    bus: async_nats::Client,
    http: reqwest::Client,
    fetch: FetchConfig,
    signer: Arc<dyn Signer>,
}

impl ManagerService {
    pub fn new(
        bus: async_nats::Client,
        http: reqwest::Client,
        fetch: FetchConfig,
        signer: Arc<dyn Signer>,
    ) -> Arc<Self> {
        Arc::new(Self { state: ManagerState::new(), bus, http, fetch, signer })
    }

    /// Serve both methods until `shutdown` fires or the bus drops.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut get_sub = self.bus.subscribe(subject(METHOD_GET_JWT_TOKEN)).await?;
        let mut fetch_sub = self.bus.subscribe(subject(METHOD_FETCH_JWT_TOKEN)).await?;
        tracing::info!(server = %self.fetch.server_url, "authentication manager serving");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = get_sub.next() => {
                    let Some(msg) = msg else { break };
                    self.handle_get(msg).await;
                }
                msg = fetch_sub.next() => {
                    let Some(msg) = msg else { break };
                    self.handle_fetch(msg).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_get(&self, msg: async_nats::Message) {
        let Some(reply) = msg.reply else {
            tracing::debug!("manager: GetJwtToken without reply subject");
            return;
        };
        let pair = self.state.current().await;
        match serde_json::to_vec(&pair) {
            Ok(bytes) => {
                if let Err(e) = self.bus.publish(reply, bytes.into()).await {
                    tracing::warn!(err = %e, "manager: GetJwtToken reply failed");
                }
            }
            Err(e) => tracing::warn!(err = %e, "manager: GetJwtToken encode failed"),
        }
    }

    /// Reply accepted and run (or join) the fetch cycle. A request landing
    /// while a cycle is running is answered by that cycle's signal.
    async fn handle_fetch(self: &Arc<Self>, msg: async_nats::Message) {
        if self.state.begin_fetch() {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                service.run_fetch_cycle().await;
            });
        } else {
            tracing::debug!("manager: fetch already in flight, coalescing");
        }

        if let Some(reply) = msg.reply {
            match serde_json::to_vec(&FetchReply { accepted: true }) {
                Ok(bytes) => {
                    if let Err(e) = self.bus.publish(reply, bytes.into()).await {
                        tracing::warn!(err = %e, "manager: FetchJwtToken reply failed");
                    }
                }
                Err(e) => tracing::warn!(err = %e, "manager: FetchJwtToken encode failed"),
            }
        }
    }

    async fn run_fetch_cycle(self: Arc<Self>) {
        let result = fetcher::fetch_token(&self.http, &self.fetch, self.signer.as_ref()).await;

        match result {
            Ok(token) => {
                let pair = TokenPair { token, server_url: self.fetch.server_url.clone() };
                self.state.store(pair.clone()).await;
                self.publish_state_change(&pair).await;
                // Released only once the pair is readable; a trigger landing
                // earlier coalesces instead of refetching.
                self.state.end_fetch();
                tracing::info!(server = %self.fetch.server_url, "device authenticated");
            }
            Err(e) => {
                self.state.end_fetch();
                // No signal on failure; waiters run into their own timeout.
                tracing::warn!(err = %e, "manager: token fetch failed");
            }
        }
    }

    async fn publish_state_change(&self, pair: &TokenPair) {
        match serde_json::to_vec(pair) {
            Ok(bytes) => {
                if let Err(e) =
                    self.bus.publish(subject(SIGNAL_JWT_TOKEN_STATE_CHANGE), bytes.into()).await
                {
                    tracing::warn!(err = %e, "manager: state-change signal failed");
                }
            }
            Err(e) => tracing::warn!(err = %e, "manager: state-change encode failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn state_starts_empty_and_stores_pairs() {
        let state = ManagerState::new();
        assert!(state.current().await.token.is_empty());

        let pair =
            TokenPair { token: "FOOBARJWTTOKEN".into(), server_url: "https://some.server".into() };
        state.store(pair.clone()).await;
        assert_eq!(state.current().await, pair);
    }

    #[test]
    fn fetch_latch_admits_one_cycle() {
        let state = ManagerState::new();
        assert!(state.begin_fetch());
        assert!(!state.begin_fetch());
        state.end_fetch();
        assert!(state.begin_fetch());
    }

    #[tokio::test]
    async fn latch_stays_claimed_until_pair_is_stored() {
        let state = ManagerState::new();
        let pair =
            TokenPair { token: "FOOBARJWTTOKEN".into(), server_url: "https://some.server".into() };

        assert!(state.begin_fetch());
        assert!(!state.begin_fetch(), "trigger during the cycle coalesces");

        state.store(pair.clone()).await;
        state.end_fetch();

        // The next trigger to win the latch already sees the fresh token.
        assert!(state.begin_fetch());
        assert_eq!(state.current().await, pair);
    }
}
