//! Callback endpoints: `GET /` answers the URL-verification handshake,
//! `POST /` receives messages.
//!
//! Status codes: 403 signature mismatch, 400 malformed or undecryptable body,
//! 503 adapter not started, 200 `success` otherwise (including ignored events).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::{Inner, Keys};
use crate::crypto::verify_signature;
use crate::payload::{extract_encrypt, parse_inner};

/// Query string the platform attaches to every callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub msg_signature: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub echostr: Option<String>,
}

pub(crate) fn router(inner: Arc<Inner>) -> Router {
    Router::new()
        .route("/", get(verify_url).post(receive))
        .with_state(inner)
}

async fn verify_url(
    State(inner): State<Arc<Inner>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(keys) = inner.lifecycle.transport() else {
        return not_running(&inner);
    };
    let Some(echostr) = query.echostr.as_deref() else {
        return reject(&inner, StatusCode::BAD_REQUEST, "missing echostr");
    };
    if !signed(&keys, &query, echostr) {
        return reject(&inner, StatusCode::FORBIDDEN, "signature mismatch");
    }

    match keys.crypto.decrypt(echostr) {
        Ok(envelope) => {
            debug!(adapter = %inner.base.id(), "callback URL verified");
            (
                StatusCode::OK,
                String::from_utf8_lossy(&envelope.payload).into_owned(),
            )
                .into_response()
        }
        Err(e) => reject(&inner, StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn receive(
    State(inner): State<Arc<Inner>>,
    Query(query): Query<CallbackQuery>,
    body: Bytes,
) -> Response {
    let Some(keys) = inner.lifecycle.transport() else {
        return not_running(&inner);
    };

    let encrypt = match extract_encrypt(&body) {
        Ok(encrypt) => encrypt,
        Err(e) => return reject(&inner, StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if !signed(&keys, &query, &encrypt) {
        return reject(&inner, StatusCode::FORBIDDEN, "signature mismatch");
    }
    let envelope = match keys.crypto.decrypt(&encrypt) {
        Ok(envelope) => envelope,
        Err(e) => return reject(&inner, StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let inbound = match parse_inner(inner.base.channel_type(), &envelope.payload) {
        Ok(inbound) => inbound,
        Err(e) => return reject(&inner, StatusCode::BAD_REQUEST, &e.to_string()),
    };

    debug!(
        adapter = %inner.base.id(),
        receive_id = %envelope.receive_id,
        has_message = inbound.message.is_some(),
        "callback accepted"
    );

    if let (Some(sender), Some(url)) = (inbound.sender_id.as_deref(), inbound.response_url) {
        inner.replies.insert(sender, url);
    }

    // The platform wants its ack within a few seconds; the handler runs on
    // its own task and only the adapter's stop can cut it short.
    if let Some(msg) = inbound.message {
        let inner = Arc::clone(&inner);
        let cancel = keys.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(adapter = %inner.base.id(), msg_id = %msg.id, "dispatch cancelled by stop");
                }
                _ = inner.base.dispatch(&msg) => {}
            }
        });
    }

    (StatusCode::OK, "success").into_response()
}

fn signed(keys: &Keys, query: &CallbackQuery, encrypt: &str) -> bool {
    verify_signature(
        &keys.token,
        &query.timestamp,
        &query.nonce,
        encrypt,
        &query.msg_signature,
    )
}

fn not_running(inner: &Inner) -> Response {
    warn!(adapter = %inner.base.id(), "callback received while adapter is stopped");
    (StatusCode::SERVICE_UNAVAILABLE, "adapter not running").into_response()
}

fn reject(inner: &Inner, status: StatusCode, reason: &str) -> Response {
    warn!(adapter = %inner.base.id(), status = status.as_u16(), reason, "callback rejected");
    (status, reason.to_string()).into_response()
}
