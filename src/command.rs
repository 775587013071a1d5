// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Command protocol and execution.
//!
//! The console POSTs a JSON object with a `type` discriminator; dispatch is
//! an exhaustive match over a closed enum with an explicit [`Command::Unknown`]
//! case, so adding a command is a compile-time-checked extension.
//!
//! Dispatch never propagates a failure: every outcome, including internal
//! faults, becomes a [`CommandResult`] the gateway serializes back as
//! HTTP 200 — business-level failures are not HTTP-level failures.
//!
//! # Security
//!
//! `execute_command` runs console-supplied text through the host shell with
//! no allow-list, sandboxing, or privilege reduction. This is deliberate
//! remote-administration behavior and the system's core attack surface:
//! whoever holds the bearer token has full shell access as the agent's
//! user. Deploy only on networks where that is acceptable, and treat the
//! token file accordingly. Hardening (command allow-lists, a dedicated
//! unprivileged user) is the first thing to add before exposing the agent
//! beyond a trusted LAN.

use std::process::Stdio;

use serde::Serialize;
use serde_json::{json, Map, Value};
use sysinfo::{CpuRefreshKind, System};
use tokio::process::Command as Process;
use tracing::debug;

/// Agent version reported by `ping` and the liveness probe.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A request from the console, parsed from its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    GetSystemInfo,
    ExecuteCommand { command: String },
    /// Any unrecognized tag; kept verbatim for the error message.
    Unknown(String),
}

impl Command {
    /// Parse a command from a decoded JSON object.
    ///
    /// Missing or non-string `type` falls through to [`Command::Unknown`];
    /// a missing `command` parameter becomes the empty string and is
    /// rejected by the executor with a structured error.
    pub fn from_value(value: &Value) -> Command {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        match tag {
            "ping" => Command::Ping,
            "get_system_info" => Command::GetSystemInfo,
            "execute_command" => Command::ExecuteCommand {
                command: value
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// Outcome of one command. Serialized with a `status` tag:
/// `{"status":"ok", ...payload}` or `{"status":"error","message":"..."}`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResult {
    Ok {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

impl CommandResult {
    fn ok(payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        CommandResult::Ok { payload }
    }

    fn error(message: impl Into<String>) -> Self {
        CommandResult::Error {
            message: message.into(),
        }
    }
}

/// Executes commands on behalf of the gateway.
pub struct CommandExecutor {
    /// Hard timeout for shell commands; the child is killed when it fires.
    pub timeout_secs: u64,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl CommandExecutor {
    pub async fn execute(&self, command: &Command) -> CommandResult {
        match command {
            Command::Ping => CommandResult::ok(json!({ "version": VERSION })),
            Command::GetSystemInfo => system_info(),
            Command::ExecuteCommand { command } if command.trim().is_empty() => {
                CommandResult::error("command not specified")
            }
            Command::ExecuteCommand { command } => self.run_shell(command).await,
            Command::Unknown(tag) => CommandResult::error(format!("unknown command: {tag}")),
        }
    }

    /// Run `command` via the host shell with a hard timeout.
    ///
    /// stdout and stderr are both captured and decoded with lossy UTF-8.
    /// Exit 0 reports `ok` with the captured text; a non-zero exit reports
    /// the same text as an `error` — a reported failure, not a fault.
    async fn run_shell(&self, command: &str) -> CommandResult {
        debug!(cmd = %command, timeout = self.timeout_secs, "executing shell command");

        #[cfg(unix)]
        let mut cmd = {
            let mut c = Process::new("sh");
            c.arg("-c").arg(command);
            c
        };
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Process::new("cmd");
            c.arg("/C").arg(command);
            c
        };

        // No controlling terminal for the child, and SIGKILL when the
        // timeout drops the future — a timed-out child must not keep running.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(self.timeout_secs),
            cmd.output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.is_empty() {
                    text.push_str(&stderr);
                }

                if output.status.success() {
                    CommandResult::ok(json!({ "result": text }))
                } else {
                    CommandResult::error(text)
                }
            }
            Ok(Err(e)) => CommandResult::error(format!("failed to start command: {e}")),
            Err(_) => CommandResult::error("command timed out"),
        }
    }
}

/// Platform identification for `get_system_info`.
fn system_info() -> CommandResult {
    let mut sys = System::new();
    sys.refresh_cpu_specifics(CpuRefreshKind::everything());
    let processor = sys
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .unwrap_or_default();

    CommandResult::ok(json!({
        "system": System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
        "release": System::kernel_version().unwrap_or_default(),
        "version": System::os_version().unwrap_or_default(),
        "machine": System::cpu_arch().unwrap_or_else(|| std::env::consts::ARCH.to_string()),
        "processor": processor,
    }))
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Command {
        Command::from_value(&serde_json::from_str(json).unwrap())
    }

    fn as_json(result: &CommandResult) -> Value {
        serde_json::to_value(result).unwrap()
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn parses_known_tags() {
        assert_eq!(parse(r#"{"type":"ping"}"#), Command::Ping);
        assert_eq!(parse(r#"{"type":"get_system_info"}"#), Command::GetSystemInfo);
        assert_eq!(
            parse(r#"{"type":"execute_command","command":"ls"}"#),
            Command::ExecuteCommand {
                command: "ls".to_string()
            }
        );
    }

    #[test]
    fn unknown_tag_is_preserved() {
        assert_eq!(
            parse(r#"{"type":"frobnicate"}"#),
            Command::Unknown("frobnicate".to_string())
        );
    }

    #[test]
    fn missing_type_is_unknown() {
        assert_eq!(parse(r#"{}"#), Command::Unknown("unknown".to_string()));
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ping_reports_version() {
        let out = CommandExecutor::default().execute(&Command::Ping).await;
        let v = as_json(&out);
        assert_eq!(v["status"], "ok");
        assert_eq!(v["version"], VERSION);
    }

    #[tokio::test]
    async fn unknown_command_echoes_tag() {
        let out = CommandExecutor::default()
            .execute(&Command::Unknown("frobnicate".to_string()))
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "error");
        assert_eq!(v["message"], "unknown command: frobnicate");
    }

    #[tokio::test]
    async fn system_info_has_all_fields() {
        let out = CommandExecutor::default()
            .execute(&Command::GetSystemInfo)
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "ok");
        for field in ["system", "release", "version", "machine", "processor"] {
            assert!(v[field].is_string(), "missing field {field}");
        }
    }

    // ── Shell execution ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn echo_captures_stdout() {
        let out = CommandExecutor::default()
            .execute(&Command::ExecuteCommand {
                command: "echo hello".to_string(),
            })
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "ok");
        assert!(v["result"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn stderr_is_captured_too() {
        let out = CommandExecutor::default()
            .execute(&Command::ExecuteCommand {
                command: "echo oops >&2".to_string(),
            })
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "ok");
        assert!(v["result"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_fatal() {
        let out = CommandExecutor::default()
            .execute(&Command::ExecuteCommand {
                command: "echo broken && exit 3".to_string(),
            })
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "error");
        assert!(v["message"].as_str().unwrap().contains("broken"));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let out = CommandExecutor::default()
            .execute(&Command::ExecuteCommand {
                command: "   ".to_string(),
            })
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "error");
        assert_eq!(v["message"], "command not specified");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let executor = CommandExecutor { timeout_secs: 1 };
        let start = std::time::Instant::now();
        let out = executor
            .execute(&Command::ExecuteCommand {
                command: "sleep 60".to_string(),
            })
            .await;
        let v = as_json(&out);
        assert_eq!(v["status"], "error");
        assert_eq!(v["message"], "command timed out");
        assert!(
            start.elapsed() < std::time::Duration::from_secs(5),
            "timeout must fire near the configured limit"
        );
    }

    #[tokio::test]
    async fn timed_out_child_has_no_side_effects() {
        // The child would write the marker at t=2s; the timeout fires at
        // t=1s and must kill it first. Checking at t=4s proves the shell
        // did not keep running past the timeout.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let executor = CommandExecutor { timeout_secs: 1 };
        let out = executor
            .execute(&Command::ExecuteCommand {
                command: format!("sleep 2 && touch {}", marker.display()),
            })
            .await;
        assert_eq!(as_json(&out)["message"], "command timed out");

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(
            !marker.exists(),
            "child survived the timeout and wrote its marker"
        );
    }

    // ── Serialization shape ───────────────────────────────────────────────────

    #[test]
    fn ok_result_flattens_payload() {
        let v = as_json(&CommandResult::ok(json!({ "version": "1.0.2" })));
        assert_eq!(v, json!({ "status": "ok", "version": "1.0.2" }));
    }

    #[test]
    fn error_result_has_message() {
        let v = as_json(&CommandResult::error("boom"));
        assert_eq!(v, json!({ "status": "error", "message": "boom" }));
    }
}
