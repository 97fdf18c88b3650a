// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device identity probe: runs the external identity-reporting program and
//! parses its `key=value` output into an ordered map.

use std::path::Path;
use std::process::Stdio;

use indexmap::IndexMap;

use crate::error::AuthError;

/// Ordered device-identity attributes.
///
/// Key order follows first occurrence in the probe output; a repeated key
/// overwrites the value in place (last write wins).
pub type IdentityMap = IndexMap<String, String>;

/// Parse line-oriented `key=value` probe output.
///
/// Lines without a `=`, or with an empty key, are ignored.
pub fn parse_identity_output(output: &str) -> IdentityMap {
    let mut map = IdentityMap::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        map.insert(key.to_owned(), value.to_owned());
    }
    map
}

/// Run the identity probe program and collect its attributes.
///
/// The program is invoked with no arguments; stdout is parsed, stderr is
/// logged. A spawn failure or non-zero exit status is a [`AuthError::Probe`].
pub async fn collect_identity(probe_path: &Path) -> Result<IdentityMap, AuthError> {
    let output = tokio::process::Command::new(probe_path)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AuthError::Probe(format!("{}: {e}", probe_path.display())))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::warn!(probe = %probe_path.display(), "identity probe stderr: {}", stderr.trim());
        }
        return Err(AuthError::Probe(format!(
            "{} exited with {}",
            probe_path.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_identity_output(&stdout))
}

/// Canonical byte representation of the identity payload: compact JSON in
/// slot order. This is the exact byte string that gets signed.
pub fn canonical_json(identity: &IdentityMap) -> Result<String, AuthError> {
    serde_json::to_string(identity)
        .map_err(|e| AuthError::Probe(format!("identity serialization: {e}")))
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
