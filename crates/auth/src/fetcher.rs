// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token fetcher: turns device identity into a signed authentication request
//! and exchanges it with the backend for a JWT.
//!
//! No retries at this layer; the caller owns retry policy. Each call yields
//! exactly one outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;

use crate::error::AuthError;
use crate::identity;
use crate::signer::Signer;

/// Backend endpoint receiving signed authentication requests.
pub const AUTH_REQUEST_PATH: &str = "/api/devices/v1/authentication/auth_requests";

/// Header carrying the base64 signature of the request body.
pub const SIGNATURE_HEADER: &str = "X-MEN-Signature";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Inputs for a token fetch, minus the signing key (passed as a [`Signer`]).
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Backend base URL, e.g. `https://hosted.example.com`.
    pub server_url: String,
    /// Path to the identity probe program.
    pub identity_probe: PathBuf,
    /// Optional tenant token included in the request body.
    pub tenant_token: Option<String>,
}

/// Signed request body. The signature covers these exact serialized bytes.
#[derive(Serialize)]
struct AuthRequestBody<'a> {
    id_data: &'a str,
    pubkey: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_token: Option<&'a str>,
}

/// Build the HTTP client, optionally pinning the backend server certificate.
pub fn build_http_client(server_certificate: Option<&Path>) -> Result<reqwest::Client, AuthError> {
    let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
    if let Some(cert_path) = server_certificate {
        let pem = std::fs::read(cert_path)
            .map_err(|e| AuthError::Transport(format!("{}: {e}", cert_path.display())))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| AuthError::Transport(format!("{}: {e}", cert_path.display())))?;
        builder = builder.add_root_certificate(cert);
    }
    builder.build().map_err(|e| AuthError::Transport(format!("client build: {e}")))
}

/// Run one full fetch: probe identity, sign the canonical payload, POST it,
/// and return the token from a 200 response body.
pub async fn fetch_token(
    client: &reqwest::Client,
    config: &FetchConfig,
    signer: &dyn Signer,
) -> Result<String, AuthError> {
    let identity = identity::collect_identity(&config.identity_probe).await?;
    let id_data = identity::canonical_json(&identity)?;

    let body = AuthRequestBody {
        id_data: &id_data,
        pubkey: signer.public_key_pem(),
        tenant_token: config.tenant_token.as_deref(),
    };
    let body_bytes = serde_json::to_vec(&body)
        .map_err(|e| AuthError::Transport(format!("request serialization: {e}")))?;
    let signature = BASE64.encode(signer.sign(&body_bytes)?);

    let url = format!("{}{}", config.server_url.trim_end_matches('/'), AUTH_REQUEST_PATH);
    let resp = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(body_bytes)
        .send()
        .await
        .map_err(|e| AuthError::Transport(format!("{url}: {e}")))?;

    let status = resp.status();
    if status != reqwest::StatusCode::OK {
        let text = resp.text().await.unwrap_or_default();
        return Err(AuthError::Transport(format!("auth request failed ({status}): {text}")));
    }

    // The whole response body is the opaque token.
    resp.text().await.map_err(|e| AuthError::Transport(format!("{url}: {e}")))
}
