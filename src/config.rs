// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Agent configuration loaded from YAML.
//!
//! Configuration is YAML (never TOML).  Layers are **deep-merged** — you can
//! override only the fields you care about in each file.
//!
//! Search order (later overrides earlier):
//! 1. `/etc/nuvio/agent.yaml`
//! 2. `~/.config/nuvio/agent.yaml`
//! 3. `.nuvio/agent.yaml` (workspace-local)
//! 4. Path given to [`load`] explicitly.
//!
//! **All defaults match a zero-config install.** Running `load(None)` with no
//! config file gives you port 8843 with a 50-port fallback scan, secrets in
//! the working directory, and a 30-second command timeout.
//!
//! # Example full config
//! ```yaml
//! http:
//!   host: "0.0.0.0"
//!   port: 8843
//!   port_scan: 50
//!
//! files:
//!   token_file: "token.secret"
//!   key_file: "key.secret"
//!
//! exec:
//!   command_timeout_secs: 30
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub exec: ExecConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Interface to listen on. Default: all interfaces, so the console can
    /// reach the agent over the LAN. Set to `127.0.0.1` for loopback-only.
    #[serde(default = "default_host")]
    pub host: String,

    /// First port to try. Default: 8843.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How many consecutive ports to try above `port` when the bind fails.
    /// Exhausting the range is a fatal startup error.
    #[serde(default = "default_port_scan")]
    pub port_scan: u16,

    /// Maximum request body size in bytes (default: 4 MiB).
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,

    /// Open the operator's browser on the status page after binding.
    #[serde(default = "default_true")]
    pub open_browser: bool,
}

/// Locations of the persisted secrets. Relative paths resolve against the
/// working directory, matching where the console installer drops the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Encrypted token blob (AES-256-GCM under the device key).
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,

    /// Wrapped device key material (URL-safe base64).
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

/// Command execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Hard timeout for `execute_command`; the child is killed when it fires.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8843
}
fn default_port_scan() -> u16 {
    50
}
fn default_max_body() -> usize {
    4 * 1024 * 1024
}
fn default_true() -> bool {
    true
}
fn default_token_file() -> PathBuf {
    PathBuf::from("token.secret")
}
fn default_key_file() -> PathBuf {
    PathBuf::from("key.secret")
}
fn default_command_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            port_scan: default_port_scan(),
            max_body_bytes: default_max_body(),
            open_browser: true,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            key_file: default_key_file(),
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(PathBuf::from("/etc/nuvio/agent.yaml"));
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/nuvio/agent.yaml"));
    }
    paths.push(PathBuf::from(".nuvio/agent.yaml"));
    paths
}

pub fn load(extra: Option<&Path>) -> anyhow::Result<AgentConfig> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading agent config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit agent config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let config: AgentConfig = if matches!(&merged, serde_yaml::Value::Mapping(m) if m.is_empty()) {
        AgentConfig::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    Ok(config)
}

fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
