//! Inbound SMS webhook.
//!
//! One form-encoded POST per inbound message. The handler validates the
//! provider signature before touching any state, feeds the message through
//! the conversation engine, and maps outcomes to statuses: 200 for chat
//! replies, 403 for bad signatures, 404 when no questions are configured,
//! 500 for malformed bodies. Store and queue failures degrade to a generic
//! 200 reply so the rider sees copy, not internals.

use crate::error::RidepoolError;
use crate::session::{ConversationEngine, ConversationReply};
use crate::sms::signature::{self, SIGNATURE_HEADER};
use crate::sms::InboundSms;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Webhook route path.
pub const SMS_PATH: &str = "/webhook/sms";

/// Degraded reply when the store or queue is misbehaving.
pub const ERROR_REPLY: &str =
    "Yikes, I forgot what I wanted to ask you about. Please give me a few minutes to collect my thoughts and ask me again.";

/// Shared webhook state.
pub struct AppState {
    pub engine: ConversationEngine,
    /// Shared secret validating inbound signatures
    pub auth_token: String,
    /// Public URL the provider signs against; reconstructed from the Host
    /// header when unset
    pub public_url: Option<String>,
}

/// Builds the webhook router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(SMS_PATH, post(handle_sms))
        .with_state(state)
}

/// Binds and serves the webhook until the listener fails.
pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind_addr, "webhook listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn parse_form(body: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

fn field<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

async fn handle_sms(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    if body.is_empty() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing Form Encoded Body".to_string(),
        );
    }

    let params = parse_form(&body);
    let inbound = match (
        field(&params, "MessageSid"),
        field(&params, "From"),
        field(&params, "To"),
        field(&params, "Body"),
    ) {
        (Some(message_sid), Some(from), Some(to), Some(message_body)) => InboundSms {
            message_sid: message_sid.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            body: message_body.to_string(),
        },
        _ => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing Form Encoded Body".to_string(),
            )
        }
    };

    let url = match &state.public_url {
        Some(url) => url.clone(),
        None => {
            let host = headers
                .get("Host")
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            format!("https://{}{}", host, SMS_PATH)
        }
    };

    let valid = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|sig| signature::validate(&state.auth_token, sig, &url, &params))
        .unwrap_or(false);
    if !valid {
        warn!(from = %inbound.from, "rejected unsigned or mis-signed webhook");
        return (StatusCode::FORBIDDEN, "Unauthorized Request".to_string());
    }

    match state.engine.handle_message(&inbound).await {
        Ok(ConversationReply::Question(question)) => (StatusCode::OK, question),
        Ok(ConversationReply::Completed(ack)) => (StatusCode::OK, ack),
        Ok(ConversationReply::NoQuestions) => {
            (StatusCode::NOT_FOUND, "No Questions Found".to_string())
        }
        Err(e @ RidepoolError::Queue(_)) => {
            // Session state is already committed; only the event was lost.
            error!(from = %inbound.from, error = %e, "completion event not enqueued");
            (StatusCode::OK, ERROR_REPLY.to_string())
        }
        Err(e) => {
            error!(from = %inbound.from, error = %e, "conversation processing failed");
            (StatusCode::OK, ERROR_REPLY.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{ColumnMetadata, GridStore};
    use crate::queue::CompletionQueue;
    use crate::session::{COMPLETE_COLUMN, PHONE_COLUMN};
    use crate::test_utils::{MemoryGrid, MemoryQueue};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SESSIONS: &str = "sessions-grid";
    const SECRET: &str = "webhook-secret";
    const PUBLIC_URL: &str = "https://ridepool.example.com/webhook/sms";

    fn state() -> (Arc<MemoryGrid>, Arc<MemoryQueue>, Arc<AppState>) {
        let grid = Arc::new(MemoryGrid::new());
        grid.define_grid(
            SESSIONS,
            vec![
                ColumnMetadata {
                    column_name: PHONE_COLUMN.to_string(),
                    column_desc: String::new(),
                },
                ColumnMetadata {
                    column_name: COMPLETE_COLUMN.to_string(),
                    column_desc: String::new(),
                },
                ColumnMetadata {
                    column_name: "Name".to_string(),
                    column_desc: String::new(),
                },
                ColumnMetadata {
                    column_name: "Pickup".to_string(),
                    column_desc: String::new(),
                },
            ],
        );
        let queue = Arc::new(MemoryQueue::new());
        let engine = ConversationEngine::new(
            Arc::clone(&grid) as Arc<dyn GridStore>,
            Arc::clone(&queue) as Arc<dyn CompletionQueue>,
            SESSIONS,
        );
        let state = Arc::new(AppState {
            engine,
            auth_token: SECRET.to_string(),
            public_url: Some(PUBLIC_URL.to_string()),
        });
        (grid, queue, state)
    }

    fn form_params(body: &str) -> Vec<(String, String)> {
        vec![
            ("MessageSid".to_string(), "SM1".to_string()),
            ("From".to_string(), "+15551234567".to_string()),
            ("To".to_string(), "+15550000000".to_string()),
            ("Body".to_string(), body.to_string()),
        ]
    }

    fn encode_form(params: &[(String, String)]) -> String {
        params
            .iter()
            .fold(
                url::form_urlencoded::Serializer::new(String::new()),
                |mut serializer, (key, value)| {
                    serializer.append_pair(key, value);
                    serializer
                },
            )
            .finish()
    }

    async fn post_signed(state: Arc<AppState>, body_text: &str) -> (StatusCode, String) {
        let params = form_params(body_text);
        let sig = signature::compute(SECRET, PUBLIC_URL, &params);
        post_raw(state, encode_form(&params), Some(sig)).await
    }

    async fn post_raw(
        state: Arc<AppState>,
        form_body: String,
        sig: Option<String>,
    ) -> (StatusCode, String) {
        let mut request = Request::builder()
            .method("POST")
            .uri(SMS_PATH)
            .header("Content-Type", "application/x-www-form-urlencoded");
        if let Some(sig) = sig {
            request = request.header(SIGNATURE_HEADER, sig);
        }
        let response = router(state)
            .oneshot(request.body(Body::from(form_body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_signed_message_starts_conversation() {
        let (grid, _, state) = state();
        let (status, reply) = post_signed(state, "hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, "Name");
        assert_eq!(grid.row_count(SESSIONS), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_without_store_access() {
        let (grid, _, state) = state();
        let params = form_params("hello");
        let (status, reply) =
            post_raw(state, encode_form(&params), Some("bogus".to_string())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(reply, "Unauthorized Request");
        assert_eq!(grid.row_count(SESSIONS), 0);
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let (_, _, state) = state();
        let params = form_params("hello");
        let (status, _) = post_raw(state, encode_form(&params), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_empty_body_is_500() {
        let (_, _, state) = state();
        let (status, reply) = post_raw(state, String::new(), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply, "Missing Form Encoded Body");
    }

    #[tokio::test]
    async fn test_missing_fields_is_500() {
        let (_, _, state) = state();
        let (status, _) = post_raw(state, "From=%2B15551234567".to_string(), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_full_conversation_over_http() {
        let (_, queue, state) = state();
        post_signed(Arc::clone(&state), "hi").await;
        let (_, reply) = post_signed(Arc::clone(&state), "Ada").await;
        assert_eq!(reply, "Pickup");
        let (status, reply) = post_signed(Arc::clone(&state), "123 Main St").await;
        assert_eq!(status, StatusCode::OK);
        assert!(reply.contains("Thank you"));
        assert_eq!(queue.published().len(), 1);
    }

    #[tokio::test]
    async fn test_no_questions_configured_is_404() {
        let grid = Arc::new(MemoryGrid::new());
        grid.define_grid(
            SESSIONS,
            vec![
                ColumnMetadata {
                    column_name: PHONE_COLUMN.to_string(),
                    column_desc: String::new(),
                },
                ColumnMetadata {
                    column_name: COMPLETE_COLUMN.to_string(),
                    column_desc: String::new(),
                },
            ],
        );
        let queue = Arc::new(MemoryQueue::new());
        let engine = ConversationEngine::new(
            grid as Arc<dyn GridStore>,
            queue as Arc<dyn CompletionQueue>,
            SESSIONS,
        );
        let state = Arc::new(AppState {
            engine,
            auth_token: SECRET.to_string(),
            public_url: Some(PUBLIC_URL.to_string()),
        });
        let (status, reply) = post_signed(state, "hello").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(reply, "No Questions Found");
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_generic_reply() {
        let grid = Arc::new(MemoryGrid::new());
        // No grid defined: every store call errors.
        let queue = Arc::new(MemoryQueue::new());
        let engine = ConversationEngine::new(
            grid as Arc<dyn GridStore>,
            queue as Arc<dyn CompletionQueue>,
            SESSIONS,
        );
        let state = Arc::new(AppState {
            engine,
            auth_token: SECRET.to_string(),
            public_url: Some(PUBLIC_URL.to_string()),
        });
        let (status, reply) = post_signed(state, "hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, ERROR_REPLY);
    }

    #[tokio::test]
    async fn test_enqueue_failure_reports_error_but_session_completes() {
        let (grid, queue, state) = state();
        post_signed(Arc::clone(&state), "hi").await;
        post_signed(Arc::clone(&state), "Ada").await;
        queue.fail_next();
        let (status, reply) = post_signed(Arc::clone(&state), "123 Main St").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, ERROR_REPLY);
        let row = grid.rows(SESSIONS).remove(0);
        assert_eq!(
            row.cells.get(COMPLETE_COLUMN).map(String::as_str),
            Some("true")
        );
    }
}
