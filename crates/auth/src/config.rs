// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the device authentication daemon.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "device-authd", about = "Device authentication daemon")]
pub struct AuthConfig {
    /// Backend server base URL.
    #[arg(long, default_value = "https://hosted.mender.io", env = "DEVICE_AUTH_SERVER_URL")]
    pub server_url: String,

    /// Path to the device private key (PKCS#8 PEM). Generated if missing.
    #[arg(long, default_value = "/var/lib/device-auth/device.key", env = "DEVICE_AUTH_KEY")]
    pub private_key: std::path::PathBuf,

    /// Identity probe executable; prints `key=value` lines on stdout.
    #[arg(
        long,
        default_value = "/usr/share/device-auth/identity/identity-probe",
        env = "DEVICE_AUTH_IDENTITY_PROBE"
    )]
    pub identity_probe: std::path::PathBuf,

    /// Tenant token for hosted multi-tenant backends.
    #[arg(long, env = "DEVICE_AUTH_TENANT_TOKEN")]
    pub tenant_token: Option<String>,

    /// Pin the backend TLS certificate to this PEM file.
    #[arg(long, env = "DEVICE_AUTH_SERVER_CERTIFICATE")]
    pub server_certificate: Option<std::path::PathBuf>,

    /// Seconds to wait for a token-change signal after triggering a fetch.
    #[arg(long, default_value_t = 10, env = "DEVICE_AUTH_FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: u64,

    /// Message bus URL.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "DEVICE_AUTH_BUS_URL")]
    pub bus_url: String,

    /// Bus auth token. If unset, the connection is unauthenticated.
    #[arg(long, env = "DEVICE_AUTH_BUS_TOKEN")]
    pub bus_token: Option<String>,
}

impl AuthConfig {
    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }
}
