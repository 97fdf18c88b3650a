// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request signing with the device private key.
//!
//! The backend verifies a detached signature over the canonical request
//! payload. The concrete algorithm is a deployment detail, so signing is a
//! trait; the shipped implementation is Ed25519 over PKCS#8 PEM key material.

use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};

use crate::error::AuthError;

/// Signing capability for authentication requests.
pub trait Signer: Send + Sync {
    /// Produce a detached signature over `payload`.
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AuthError>;

    /// PEM-encoded public key matching the signing key, sent to the backend
    /// so it can verify the request and pin the device identity.
    fn public_key_pem(&self) -> &str;
}

/// Ed25519 signer backed by a PKCS#8 private key.
pub struct Ed25519Signer {
    key: SigningKey,
    public_pem: String,
}

impl Ed25519Signer {
    /// Load a signer from a PKCS#8 PEM string.
    pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
        let key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| AuthError::Sign(format!("invalid private key: {e}")))?;
        Self::from_key(key)
    }

    /// Load a signer from a PKCS#8 PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self, AuthError> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Sign(format!("{}: {e}", path.display())))?;
        Self::from_pem(&pem)
    }

    /// Generate a fresh signing key.
    pub fn generate() -> Result<Self, AuthError> {
        let key = SigningKey::generate(&mut rand_core::OsRng);
        Self::from_key(key)
    }

    /// Load the key at `path`, generating and persisting one if missing.
    ///
    /// A malformed existing key is an error rather than being overwritten.
    pub fn load_or_generate(path: &Path) -> Result<Self, AuthError> {
        if path.exists() {
            return Self::from_pem_file(path);
        }
        let signer = Self::generate()?;
        signer.save_pem_file(path)?;
        tracing::info!(path = %path.display(), "generated new device key");
        Ok(signer)
    }

    /// Persist the private key as PKCS#8 PEM, owner-readable only.
    pub fn save_pem_file(&self, path: &Path) -> Result<(), AuthError> {
        let pem = self
            .key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::Sign(format!("key encoding: {e}")))?;
        std::fs::write(path, pem.as_bytes())
            .map_err(|e| AuthError::Sign(format!("{}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::Sign(format!("{}: {e}", path.display())))?;
        }
        Ok(())
    }

    fn from_key(key: SigningKey) -> Result<Self, AuthError> {
        let public_pem = key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::Sign(format!("public key encoding: {e}")))?;
        Ok(Self { key, public_pem })
    }

    /// Verifying key, used by tests and by the manager's startup log.
    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.key.verifying_key()
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AuthError> {
        Ok(self.key.sign(payload).to_bytes().to_vec())
    }

    fn public_key_pem(&self) -> &str {
        &self.public_pem
    }
}

#[cfg(test)]
#[path = "signer_tests.rs"]
mod tests;
