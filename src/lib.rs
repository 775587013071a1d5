// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Local device agent for the Nuvio web console.
//!
//! The agent derives a device-bound encryption key, maintains an encrypted
//! authorization token on disk, and serves a small authenticated HTTP API
//! that the web console uses to verify the device is present and to run
//! commands on it.
//!
//! # Architecture
//!
//! ```text
//! DeviceIdentity (hostname + MAC)
//!     │
//!     ▼
//! DeviceKey ── PBKDF2-SHA256, 100k iterations ── key.secret
//!     │
//!     ▼
//! TokenStore ── AES-256-GCM ── token.secret
//!     │
//!     ▼  authoritative token, read-only for the process lifetime
//! HTTP gateway (axum)
//!     ├── GET  /             status page with the token
//!     ├── GET  /ping         liveness probe (no auth)
//!     └── POST /api/command  bearer-token auth → CommandExecutor
//! ```
//!
//! # Security model
//!
//! The token never touches disk in plaintext — only its AES-256-GCM
//! ciphertext does, wrapped under a key derived from hardware identifiers.
//! A corrupted or undecryptable token file is deleted and regenerated; the
//! console simply re-pairs with the new token.
//!
//! The `execute_command` path runs operator-supplied text through the host
//! shell with **no allow-list, sandboxing, or privilege reduction**. Anyone
//! holding the bearer token has full shell access as the agent's user. This
//! is the system's core attack surface; see [`command`] for details.

pub mod command;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod node;
