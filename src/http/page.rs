// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Status page served at `GET /`.
//!
//! The page shows the device token for the operator to copy into the
//! console, and polls `/ping` every 5 seconds to display connection state.
//!
//! Content source order, first found wins:
//! 1. `index.html` in the working directory (operator-customized)
//! 2. `index.html` next to the executable (installer-provided)
//! 3. the embedded fallback below
//!
//! The file is re-read on every request so an operator can edit it without
//! restarting the agent.

use tracing::{debug, warn};

/// Placeholder replaced with the live token when the page is rendered.
pub const TOKEN_PLACEHOLDER: &str = "{{TOKEN}}";

/// Render the status page with the token substituted in.
pub fn render(token: &str) -> String {
    content().replace(TOKEN_PLACEHOLDER, token)
}

fn content() -> String {
    if let Ok(text) = std::fs::read_to_string("index.html") {
        debug!("serving index.html from working directory");
        return text;
    }

    if let Some(dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.to_path_buf())) {
        let path = dir.join("index.html");
        if let Ok(text) = std::fs::read_to_string(&path) {
            debug!(path = %path.display(), "serving index.html from install directory");
            return text;
        }
    }

    warn!("index.html not found, using embedded status page");
    EMBEDDED_PAGE.to_string()
}

/// Built-in fallback document, used when no `index.html` is installed.
const EMBEDDED_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Nuvio Agent</title>
    <style>
        body {
            font-family: 'Segoe UI', sans-serif;
            background-color: #0d1117;
            color: #c9d1d9;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
        }
        .container {
            text-align: center;
            background-color: #161b22;
            padding: 40px;
            border-radius: 12px;
            box-shadow: 0 0 15px rgba(0, 0, 0, 0.5);
            max-width: 600px;
        }
        h1 { font-size: 28px; margin-bottom: 20px; color: #58a6ff; }
        .token-box {
            background-color: #0e4429;
            color: #39d353;
            font-family: monospace;
            padding: 10px;
            border-radius: 6px;
            margin: 20px 0;
            word-break: break-all;
            font-size: 16px;
        }
        .status { padding: 10px; border-radius: 6px; margin-top: 20px; font-size: 14px; }
        .status.connected { background-color: #0e4429; color: #39d353; }
        .status.disconnected { background-color: #3b1113; color: #f85149; }
        small { color: #8b949e; display: block; margin-top: 10px; }
        .version { position: absolute; bottom: 10px; right: 10px; font-size: 12px; color: #8b949e; }
    </style>
</head>
<body>
    <div class="container">
        <h1>Welcome to <strong>Nuvio</strong></h1>
        <p>Your local agent is up and running.</p>
        <p>Copy the token below and paste it into your console account.</p>
        <div class="token-box">{{TOKEN}}</div>
        <div id="status" class="status">Checking connection...</div>
        <small>This token is unique to this device.</small>
        <small>Please keep this window open while you work with the system.</small>
    </div>
    <div class="version">v1.0.2</div>

    <script>
        function checkConnection() {
            const statusEl = document.getElementById('status');
            statusEl.textContent = 'Checking connection...';
            statusEl.className = 'status';

            fetch('/ping', {
                method: 'GET',
                headers: { 'Cache-Control': 'no-cache', 'Pragma': 'no-cache' }
            })
            .then(response => response.json())
            .then(data => {
                if (data.status === 'ok') {
                    statusEl.textContent = `Connected (${data.system})`;
                    statusEl.className = 'status connected';
                } else {
                    throw new Error('unexpected status');
                }
            })
            .catch(error => {
                statusEl.textContent = 'Connection lost';
                statusEl.className = 'status disconnected';
                console.error('connection check failed:', error);
            });
        }

        checkConnection();
        setInterval(checkConnection, 5000);
    </script>
</body>
</html>"#;

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_page_has_placeholder() {
        assert!(EMBEDDED_PAGE.contains(TOKEN_PLACEHOLDER));
    }

    #[test]
    fn render_substitutes_token() {
        let page = render("abc123-token");
        assert!(page.contains("abc123-token"));
        assert!(!page.contains(TOKEN_PLACEHOLDER));
    }

    #[test]
    fn embedded_page_polls_ping() {
        assert!(EMBEDDED_PAGE.contains("/ping"));
        assert!(EMBEDDED_PAGE.contains("5000"));
    }
}
