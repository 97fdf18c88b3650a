// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use super::{canonical_json, collect_identity, parse_identity_output};
use crate::error::AuthError;

// ── parse_identity_output ─────────────────────────────────────────────────

#[test]
fn duplicate_keys_last_write_wins() {
    let map = parse_identity_output("key1=value1\nkey2=value2\nkey3=value3\nkey1=value11\n");
    assert_eq!(map.len(), 3);
    assert_eq!(map["key1"], "value11");
    assert_eq!(map["key2"], "value2");
    assert_eq!(map["key3"], "value3");
}

#[test]
fn key_order_follows_first_occurrence() {
    let map = parse_identity_output("b=1\na=2\nb=3\n");
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["b", "a"]);
}

#[test]
fn lines_without_separator_are_ignored() {
    let map = parse_identity_output("mac=aa:bb\nnot a pair\n=orphan\nsku=x1\n");
    assert_eq!(map.len(), 2);
    assert_eq!(map["mac"], "aa:bb");
    assert_eq!(map["sku"], "x1");
}

#[test]
fn value_may_contain_separator() {
    let map = parse_identity_output("cmdline=root=/dev/sda1\n");
    assert_eq!(map["cmdline"], "root=/dev/sda1");
}

#[test]
fn canonical_json_preserves_slot_order() -> anyhow::Result<()> {
    let map = parse_identity_output("key1=value1\nkey2=value2\nkey1=value11\n");
    let json = canonical_json(&map).map_err(|e| anyhow::anyhow!(e))?;
    assert_eq!(json, r#"{"key1":"value11","key2":"value2"}"#);
    Ok(())
}

// ── collect_identity ──────────────────────────────────────────────────────

fn write_script(dir: &tempfile::TempDir, body: &str) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.path().join("device-identity");
    let mut file = std::fs::File::create(&path)?;
    file.write_all(body.as_bytes())?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))?;
    Ok(path)
}

#[tokio::test]
async fn probe_script_output_is_parsed() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(
        &dir,
        "#!/bin/sh\necho \"key1=value1\"\necho \"key2=value2\"\necho \"key1=value11\"\nexit 0\n",
    )?;

    let map = collect_identity(&script).await.map_err(|e| anyhow::anyhow!(e))?;
    assert_eq!(map["key1"], "value11");
    assert_eq!(map["key2"], "value2");
    Ok(())
}

#[tokio::test]
async fn probe_non_zero_exit_is_probe_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let script = write_script(&dir, "#!/bin/sh\necho \"key=value\"\nexit 2\n")?;

    let err = match collect_identity(&script).await {
        Ok(_) => anyhow::bail!("expected probe error"),
        Err(e) => e,
    };
    assert!(matches!(err, AuthError::Probe(_)), "got {err}");
    Ok(())
}

#[tokio::test]
async fn probe_missing_program_is_probe_error() {
    let err = collect_identity(std::path::Path::new("/nonexistent/device-identity")).await;
    assert!(matches!(err, Err(AuthError::Probe(_))));
}
