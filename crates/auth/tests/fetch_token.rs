// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end fetch against a fake backend: probe, sign, POST, token.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use device_auth::fetcher::{self, FetchConfig, AUTH_REQUEST_PATH, SIGNATURE_HEADER};
use device_auth::signer::{Ed25519Signer, Signer};
use device_auth::AuthError;

const TOKEN: &str = "FOOBARJWTTOKEN";

struct CapturedRequest {
    signature: Option<String>,
    raw_body: String,
}

#[derive(Clone)]
struct Backend {
    status: StatusCode,
    captured: Arc<Mutex<Option<CapturedRequest>>>,
}

async fn auth_requests(
    State(backend): State<Backend>,
    headers: HeaderMap,
    raw_body: String,
) -> (StatusCode, String) {
    let signature =
        headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).map(str::to_owned);
    *backend.captured.lock().await = Some(CapturedRequest { signature, raw_body });
    (backend.status, TOKEN.to_string())
}

async fn start_backend(status: StatusCode) -> anyhow::Result<(String, Backend)> {
    let backend = Backend { status, captured: Arc::new(Mutex::new(None)) };
    let app = Router::new()
        .route(AUTH_REQUEST_PATH, post(auth_requests))
        .with_state(backend.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), backend))
}

fn write_probe_script(dir: &std::path::Path) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("identity-probe");
    std::fs::write(
        &path,
        "#!/bin/sh\n\
         echo key1=value1\n\
         echo key2=value2\n\
         echo key3=value3\n\
         echo key1=value11\n",
    )?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(path)
}

#[tokio::test]
async fn fetch_returns_token_and_sends_signed_identity() -> anyhow::Result<()> {
    let (server_url, backend) = start_backend(StatusCode::OK).await?;
    let dir = tempfile::tempdir()?;
    let probe = write_probe_script(dir.path())?;

    let signer = Ed25519Signer::generate().map_err(|e| anyhow::anyhow!(e))?;
    let config = FetchConfig {
        server_url,
        identity_probe: probe,
        tenant_token: Some("tenant-secret".into()),
    };
    let client = fetcher::build_http_client(None).map_err(|e| anyhow::anyhow!(e))?;

    let token = fetcher::fetch_token(&client, &config, &signer)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    assert_eq!(token, TOKEN);

    let captured = backend
        .captured
        .lock()
        .await
        .take()
        .ok_or_else(|| anyhow::anyhow!("backend saw no request"))?;

    // The signature header verifies against the exact body bytes.
    let sig_b64 = captured.signature.ok_or_else(|| anyhow::anyhow!("no signature header"))?;
    let sig = Signature::from_slice(&BASE64.decode(sig_b64)?)?;
    signer.verifying_key().verify(captured.raw_body.as_bytes(), &sig)?;

    let body: serde_json::Value = serde_json::from_str(&captured.raw_body)?;
    assert_eq!(body["tenant_token"], "tenant-secret");
    assert!(body["pubkey"]
        .as_str()
        .is_some_and(|p| p.starts_with("-----BEGIN PUBLIC KEY-----")));

    // id_data is itself canonical JSON, duplicates folded last-write-wins.
    let id_data: serde_json::Value =
        serde_json::from_str(body["id_data"].as_str().unwrap_or_default())?;
    assert_eq!(id_data["key1"], "value11");
    assert_eq!(id_data["key2"], "value2");
    assert_eq!(id_data["key3"], "value3");
    Ok(())
}

#[tokio::test]
async fn rejected_request_is_transport_error() -> anyhow::Result<()> {
    let (server_url, _backend) = start_backend(StatusCode::UNAUTHORIZED).await?;
    let dir = tempfile::tempdir()?;
    let probe = write_probe_script(dir.path())?;

    let signer = Ed25519Signer::generate().map_err(|e| anyhow::anyhow!(e))?;
    let config = FetchConfig { server_url, identity_probe: probe, tenant_token: None };
    let client = fetcher::build_http_client(None).map_err(|e| anyhow::anyhow!(e))?;

    let err = match fetcher::fetch_token(&client, &config, &signer).await {
        Ok(token) => anyhow::bail!("expected rejection, got token {token:?}"),
        Err(e) => e,
    };
    assert!(matches!(err, AuthError::Transport(_)), "got {err}");
    Ok(())
}
