// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no free port in range {start}-{end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("HTTP server error: {0}")]
    Http(#[from] std::io::Error),
}
