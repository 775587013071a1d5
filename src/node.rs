// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent startup — assembles all subsystems and runs them.
//!
//! # Startup sequence
//!
//! [`run`] performs these steps in order:
//!
//! 1. Read the device identity (hostname + MAC address).
//! 2. Load or derive the device key (`key.secret`).
//! 3. Load or generate the encrypted token (`token.secret`).
//! 4. Bind the HTTP port, scanning upward on contention.
//! 5. Open the operator's browser on the status page (unless disabled).
//! 6. Serve until SIGINT/SIGTERM, then drain and exit 0.
//!
//! Startup failures (no free port, unwritable secret files) propagate out
//! of [`run`] and the process exits non-zero.

use std::time::Duration;

use tracing::{info, warn};

use crate::{
    command::{CommandExecutor, VERSION},
    config::AgentConfig,
    crypto::{
        device_key::{DeviceIdentity, DeviceKey},
        token::TokenStore,
    },
    http::{self, AppState},
};

/// Run the agent to completion. This is the entry point for a plain
/// `nuvio-agent` invocation.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!(version = VERSION, "starting local agent");

    let identity = DeviceIdentity::detect();
    info!(
        hostname = %identity.hostname,
        mac = %identity.mac_string(),
        "device identity"
    );

    let key = DeviceKey::load_or_derive(&config.files.key_file, &identity)?;
    let store = TokenStore::new(config.files.token_file.clone(), key, identity.clone());
    let token = store.get_or_create()?;
    info!("authorization token: {token}");

    let listener = http::bind_with_fallback(&config.http).await?;
    let port = listener.local_addr()?.port();
    let url = format!("http://localhost:{port}");
    info!("server listening on {url}");

    if config.http.open_browser {
        tokio::spawn(launch_browser(url));
    }

    let state = AppState::new(
        token,
        identity,
        CommandExecutor {
            timeout_secs: config.exec.command_timeout_secs,
        },
    );
    http::serve(listener, http::router(state, config.http.max_body_bytes)).await?;

    info!("agent stopped");
    Ok(())
}

/// Discard the persisted token record and print a freshly generated token.
///
/// Called by `nuvio-agent regenerate-token`. The console must be re-paired
/// with the new value.
pub fn regenerate_token(config: &AgentConfig) -> anyhow::Result<()> {
    let identity = DeviceIdentity::detect();
    let key = DeviceKey::load_or_derive(&config.files.key_file, &identity)?;
    let store = TokenStore::new(config.files.token_file.clone(), key, identity);

    if config.files.token_file.exists() {
        std::fs::remove_file(&config.files.token_file)?;
    }
    let token = store.get_or_create()?;

    println!("New device token (paste it into the console):");
    println!("  {token}");
    Ok(())
}

/// Open the operator's default browser on the status page, one second after
/// startup so the listener is accepting by the time the tab loads.
async fn launch_browser(url: String) {
    tokio::time::sleep(Duration::from_secs(1)).await;

    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("open").arg(&url).spawn();
    #[cfg(target_os = "windows")]
    let result = std::process::Command::new("cmd")
        .args(["/C", "start", &url])
        .spawn();
    #[cfg(all(unix, not(target_os = "macos")))]
    let result = std::process::Command::new("xdg-open").arg(&url).spawn();

    match result {
        Ok(_) => info!(%url, "opened browser"),
        Err(e) => warn!("could not open browser: {e}"),
    }
}
