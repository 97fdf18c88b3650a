// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token cache and request coordinator.
//!
//! A single actor task owns the cached auth data, the fetch state and the
//! waiter queue; callers talk to it through a cloneable handle. Concurrent
//! `with_token` calls during one fetch cycle fold into one waiter queue and
//! are served by the single in-flight result, in FIFO order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::bus::{ManagerBridge, TokenPair};
use crate::error::AuthError;

/// The currently known credential. Valid iff the token is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthData {
    pub token: String,
    pub server_url: String,
}

impl AuthData {
    pub fn is_valid(&self) -> bool {
        !self.token.is_empty()
    }
}

/// Default window to wait for a token-change signal after triggering a fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

type WaiterTx = oneshot::Sender<Result<AuthData, AuthError>>;

enum Cmd {
    GetToken { reply: WaiterTx },
    Expire { ack: oneshot::Sender<()> },
}

/// Completion of an asynchronous step of the fetch cycle. Stale generations
/// (a cycle that already ended) are dropped on receipt.
enum CycleEvent {
    QueryDone { generation: u64, result: Result<Option<AuthData>, AuthError> },
    TriggerDone { generation: u64, result: Result<bool, AuthError> },
    TimedOut { generation: u64 },
}

/// Handle to the coordinator actor.
#[derive(Clone)]
pub struct Authenticator {
    cmd_tx: mpsc::Sender<Cmd>,
}

impl Authenticator {
    /// Spawn the coordinator over `bridge`.
    ///
    /// The token-change subscription is established here, once, and feeds
    /// the cache for the whole lifetime of the actor, whether or not a
    /// fetch is in progress.
    pub fn spawn<B: ManagerBridge>(bridge: B, fetch_timeout: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let signal_rx = bridge.subscribe();
        let (event_tx, event_rx) = mpsc::channel(8);
        let actor = Actor {
            bridge: Arc::new(bridge),
            fetch_timeout,
            event_tx,
            cached: AuthData::default(),
            fetching: None,
            generation: 0,
            waiters: VecDeque::new(),
        };
        tokio::spawn(actor.run(cmd_rx, event_rx, signal_rx));
        Self { cmd_tx }
    }

    /// Resolve to the current auth data, fetching through the manager when
    /// the cache is empty. Concurrent callers share one fetch cycle.
    pub async fn with_token(&self) -> Result<AuthData, AuthError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::GetToken { reply: tx })
            .await
            .map_err(|_| AuthError::Ipc("authenticator not running".into()))?;
        rx.await.map_err(|_| AuthError::Ipc("authenticator dropped request".into()))?
    }

    /// Invalidate the cached auth data. A fetch already in progress is not
    /// affected; the next `with_token` call starts (or joins) a fresh cycle.
    pub async fn expire_token(&self) -> Result<(), AuthError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Expire { ack: tx })
            .await
            .map_err(|_| AuthError::Ipc("authenticator not running".into()))?;
        rx.await.map_err(|_| AuthError::Ipc("authenticator dropped request".into()))
    }
}

struct Actor<B> {
    bridge: Arc<B>,
    fetch_timeout: Duration,
    event_tx: mpsc::Sender<CycleEvent>,
    cached: AuthData,
    /// Generation of the in-flight fetch cycle, `None` when idle.
    fetching: Option<u64>,
    generation: u64,
    waiters: VecDeque<WaiterTx>,
}

impl<B: ManagerBridge> Actor<B> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Cmd>,
        mut event_rx: mpsc::Receiver<CycleEvent>,
        mut signal_rx: broadcast::Receiver<TokenPair>,
    ) {
        let mut signal_open = true;
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::GetToken { reply }) => self.handle_get(reply),
                    Some(Cmd::Expire { ack }) => {
                        self.cached = AuthData::default();
                        let _ = ack.send(());
                    }
                    // All handles dropped.
                    None => break,
                },
                Some(event) = event_rx.recv() => self.handle_event(event),
                sig = signal_rx.recv(), if signal_open => match sig {
                    Ok(pair) => self.handle_signal(pair),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "authenticator lagged on token signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::warn!("token-change signal channel closed");
                        signal_open = false;
                    }
                },
            }
        }
    }

    fn handle_get(&mut self, reply: WaiterTx) {
        if self.cached.is_valid() {
            // Resolved through the channel, so the caller still observes an
            // asynchronous completion even on a cache hit.
            let _ = reply.send(Ok(self.cached.clone()));
            return;
        }
        self.waiters.push_back(reply);
        if self.fetching.is_none() {
            self.start_cycle();
        }
    }

    /// Begin a fetch cycle: query the manager for a token it may already
    /// hold. At most one cycle is in flight per actor.
    fn start_cycle(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.fetching = Some(generation);
        tracing::debug!(generation, "starting token fetch cycle");

        let bridge = Arc::clone(&self.bridge);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = bridge.query_token().await;
            let _ = event_tx.send(CycleEvent::QueryDone { generation, result }).await;
        });
    }

    fn handle_event(&mut self, event: CycleEvent) {
        match event {
            CycleEvent::QueryDone { generation, result } if self.fetching == Some(generation) => {
                match result {
                    Ok(Some(auth)) => {
                        tracing::debug!(generation, "manager already held a token");
                        self.cached = auth;
                        self.finish_cycle(Ok(self.cached.clone()));
                    }
                    Ok(None) => self.trigger_and_arm(generation),
                    Err(e) => {
                        tracing::warn!(generation, err = %e, "token query failed");
                        self.finish_cycle(Err(e));
                    }
                }
            }
            CycleEvent::TriggerDone { generation, result } if self.fetching == Some(generation) => {
                match result {
                    // Acceptance only means the trigger was taken; the token
                    // arrives via the signal (or the timer fires).
                    Ok(accepted) => {
                        tracing::debug!(generation, accepted, "fetch trigger answered");
                    }
                    Err(e) => {
                        tracing::warn!(generation, err = %e, "fetch trigger failed");
                        self.finish_cycle(Err(e));
                    }
                }
            }
            CycleEvent::TimedOut { generation } if self.fetching == Some(generation) => {
                tracing::warn!(generation, "timed out waiting for token-change signal");
                self.finish_cycle(Err(AuthError::Timeout));
            }
            // A cycle that already ended; nothing to do.
            _ => {}
        }
    }

    /// The manager holds no token: tell it to fetch one, and arm the
    /// timeout timer no matter how the trigger call is answered.
    fn trigger_and_arm(&mut self, generation: u64) {
        let bridge = Arc::clone(&self.bridge);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = bridge.trigger_fetch().await;
            let _ = event_tx.send(CycleEvent::TriggerDone { generation, result }).await;
        });

        let event_tx = self.event_tx.clone();
        let timeout = self.fetch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = event_tx.send(CycleEvent::TimedOut { generation }).await;
        });
    }

    /// Unconditional cache update; an in-progress cycle is satisfied by it
    /// even if this instance never issued the trigger.
    fn handle_signal(&mut self, pair: TokenPair) {
        tracing::debug!(valid = !pair.token.is_empty(), "token-change signal received");
        self.cached = pair.into();
        if self.fetching.is_some() {
            self.finish_cycle(Ok(self.cached.clone()));
        }
    }

    /// Drain the waiter queue in FIFO order and return to idle. Stale timer
    /// and round-trip completions are discarded by the generation check.
    fn finish_cycle(&mut self, result: Result<AuthData, AuthError>) {
        self.fetching = None;
        while let Some(waiter) = self.waiters.pop_front() {
            let _ = waiter.send(result.clone());
        }
    }
}

#[cfg(test)]
#[path = "authenticator_tests.rs"]
mod tests;
