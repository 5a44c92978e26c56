//! Local OAuth callback listener.
//!
//! An ephemeral HTTP server that captures exactly one provider redirect on
//! the fixed, pre-registered port and resolves a one-shot channel with the
//! authorization code (or the provider's error). The redirect URI is baked
//! into the OAuth client registration, so a busy port is a fatal error —
//! there is no port hunting.
//!
//! Lifecycle: [`CallbackListener::bind`] → one [`CallbackListener::recv`] →
//! [`CallbackListener::shutdown`]. The caller owns the overall timeout and
//! must close the listener on every exit path; `shutdown` is idempotent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::constants::CALLBACK_PATH;
use crate::error::{Error, Result};

/// What the redirect resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// The provider redirected back with an authorization code.
    Code {
        /// The authorization code.
        code: String,
        /// The opaque state parameter, echoed back by the provider.
        state: String,
    },
    /// The provider redirected back with an error (e.g. `access_denied`).
    Denied {
        /// The provider's error code.
        error: String,
    },
}

/// Shared handler state: the one-shot resolution channel.
struct Resolver {
    tx: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
}

impl Resolver {
    /// Resolve the pending future, if it has not resolved yet.
    async fn resolve(&self, outcome: CallbackOutcome) {
        if let Some(tx) = self.tx.lock().await.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// One-shot local HTTP listener for the OAuth redirect.
pub struct CallbackListener {
    addr: SocketAddr,
    rx: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl CallbackListener {
    /// Bind the listener on `127.0.0.1:{port}` and start serving.
    ///
    /// Fails with [`Error::CallbackBind`] if the port is taken — typically a
    /// concurrent login attempt or a sibling tool holding the port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| Error::CallbackBind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| Error::CallbackBind { port, source })?;

        let (tx, rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let resolver = Arc::new(Resolver {
            tx: Mutex::new(Some(tx)),
        });
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .fallback(handle_other)
            .with_state(resolver);

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "Callback listener terminated with error");
            }
        });

        debug!(%addr, "Callback listener started");

        Ok(Self {
            addr,
            rx: Some(rx),
            shutdown: Some(shutdown_tx),
        })
    }

    /// The bound local address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the single redirect.
    ///
    /// This does not time out on its own; race it against a deadline. The
    /// listener stays up after resolution until [`shutdown`](Self::shutdown)
    /// is called, so the browser can still load the result page.
    pub async fn recv(&mut self) -> Result<CallbackOutcome> {
        let rx = self.rx.take().ok_or(Error::CallbackClosed)?;
        rx.await.map_err(|_| Error::CallbackClosed)
    }

    /// Stop the listener. Safe to call any number of times.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
            debug!(addr = %self.addr, "Callback listener shut down");
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_callback(
    State(resolver): State<Arc<Resolver>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    if let Some(error) = params.get("error") {
        warn!(%error, "OAuth provider returned an error");
        resolver
            .resolve(CallbackOutcome::Denied {
                error: error.clone(),
            })
            .await;
        return (StatusCode::OK, Html(denied_page(error)));
    }

    match (params.get("code"), params.get("state")) {
        (Some(code), Some(state)) if !code.is_empty() => {
            resolver
                .resolve(CallbackOutcome::Code {
                    code: code.clone(),
                    state: state.clone(),
                })
                .await;
            (StatusCode::OK, Html(success_page()))
        }
        // Missing code or state: a stale or malformed request. Keep waiting.
        _ => (StatusCode::BAD_REQUEST, Html(bad_request_page())),
    }
}

/// Anything off the callback route (favicon probes, revisited pages) gets a
/// 400 and does not resolve the pending future.
async fn handle_other() -> (StatusCode, Html<String>) {
    (StatusCode::BAD_REQUEST, Html(bad_request_page()))
}

// =============================================================================
// Response pages
// =============================================================================

fn page(title: &str, heading: &str, detail: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: system-ui, sans-serif; text-align: center; padding-top: 80px; color: #333; }}
        p {{ color: #666; }}
    </style>
</head>
<body>
    <h1>{heading}</h1>
    <p>{detail}</p>
</body>
</html>"#
    )
}

fn success_page() -> String {
    page(
        "Authentication Complete",
        "&#x2713; Authentication Complete",
        "You can close this window and return to the editor.",
    )
}

fn denied_page(error: &str) -> String {
    page(
        "Authentication Failed",
        "Authentication Failed",
        &format!(
            "Error: {}. You can close this window and try again.",
            html_escape(error)
        ),
    )
}

fn bad_request_page() -> String {
    page(
        "Bad Request",
        "Bad Request",
        "Missing code or state parameter.",
    )
}

fn html_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
