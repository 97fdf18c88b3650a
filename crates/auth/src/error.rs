// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Error kinds for the device authentication subsystem.
///
/// Every failure mode is recoverable: a later `with_token` call starts a
/// fresh fetch cycle regardless of what failed before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Identity probe could not be started or exited non-zero.
    Probe(String),
    /// Private key unreadable or malformed.
    Sign(String),
    /// HTTP/network failure or non-200 backend status.
    Transport(String),
    /// Message bus unreachable or malformed reply.
    Ipc(String),
    /// No token-change signal arrived within the configured window.
    Timeout,
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Probe(_) => "PROBE_ERROR",
            Self::Sign(_) => "SIGN_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Ipc(_) => "IPC_ERROR",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe(msg)
            | Self::Sign(msg)
            | Self::Transport(msg)
            | Self::Ipc(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::Timeout => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for AuthError {}
