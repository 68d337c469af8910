//! Internal control endpoint: rule reload push and operator sends.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tgm_core::{
    messaging::{port::MessagingPort, types::Recipient},
    rules::RuleStore,
};

#[derive(Clone)]
pub struct ControlState {
    pub rules: Arc<RuleStore>,
    pub messenger: Arc<dyn MessagingPort>,
}

#[derive(Debug, Default, Deserialize)]
struct SendRequest {
    #[serde(default)]
    target: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn error(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "error": msg.into() }))).into_response()
}

/// POST /api/internal/config/reload
///
/// Re-reads the rule source now. The new snapshot (or the fallback on a
/// malformed source) is already published when this returns.
async fn reload_config(State(state): State<ControlState>) -> impl IntoResponse {
    let rules = state.rules.clone();
    match tokio::task::spawn_blocking(move || rules.force_reload()).await {
        Ok(Ok(())) => {
            info!("rules reloaded on request");
            Json(json!({ "status": "ok" })).into_response()
        }
        Ok(Err(e)) => {
            warn!(error = %e, "requested rule reload failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, format!("reload task failed: {e}")),
    }
}

/// POST /api/internal/telegram/send  `{target, message}`
async fn send_message(
    State(state): State<ControlState>,
    Json(req): Json<SendRequest>,
) -> impl IntoResponse {
    let target = match req.target {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => return error(StatusCode::BAD_REQUEST, "missing target"),
    };
    let Some(message) = req.message.filter(|m| !m.trim().is_empty()) else {
        return error(StatusCode::BAD_REQUEST, "missing message");
    };
    let recipient = match Recipient::parse(&target) {
        Ok(r) => r,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.messenger.send_text(&recipient, &message).await {
        Ok(sent) => {
            info!(to = %recipient, "operator message sent");
            Json(json!({
                "status": "ok",
                "chat_id": sent.chat_id.0,
                "message_id": sent.message_id.0,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(to = %recipient, error = %e, "operator send failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn control_routes(state: ControlState) -> Router {
    Router::new()
        .route("/api/internal/config/reload", post(reload_config))
        .route("/api/internal/telegram/send", post(send_message))
        .with_state(state)
}

/// Bind the control endpoint; a taken or forbidden address fails startup.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control endpoint on {addr}"))?;
    info!(addr = %listener.local_addr()?, "control endpoint listening");
    Ok(listener)
}

/// Serve the control routes until `cancel` fires.
pub async fn serve(listener: TcpListener, state: ControlState, cancel: CancellationToken) -> anyhow::Result<()> {
    axum::serve(listener, control_routes(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Mutex;
    use tgm_core::{
        domain::{ChatId, MessageId, MessageRef, SenderHint},
        errors::Error,
        messaging::types::MessagingCapabilities,
        rules::{FileRuleSource, SourceVersion},
        Result,
    };
    use tower::ServiceExt;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(Recipient, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl MessagingPort for Outbox {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities::default()
        }

        async fn send_text(&self, to: &Recipient, text: &str) -> Result<MessageRef> {
            if self.fail {
                return Err(Error::External("chat not found".into()));
            }
            self.sent.lock().unwrap().push((to.clone(), text.to_string()));
            Ok(MessageRef {
                chat_id: ChatId(5),
                message_id: MessageId(9),
            })
        }

        async fn lookup_sender(&self, _sender_id: &str) -> Result<Option<SenderHint>> {
            Ok(None)
        }
    }

    fn tmp_file(prefix: &str) -> std::path::PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::path::PathBuf::from(format!("/tmp/{prefix}-{}-{ts}.json", std::process::id()))
    }

    fn state(rules_path: &std::path::Path, outbox: Arc<Outbox>) -> ControlState {
        ControlState {
            rules: Arc::new(RuleStore::open(Box::new(FileRuleSource::new(rules_path)), None)),
            messenger: outbox,
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reload_publishes_new_rules() {
        let path = tmp_file("tgm-control-rules");
        std::fs::write(&path, r#"{"keywords": ["old"]}"#).unwrap();
        let st = state(&path, Arc::new(Outbox::default()));
        let rules = st.rules.clone();

        std::fs::write(&path, r#"{"keywords": ["new"]}"#).unwrap();
        let resp = control_routes(st)
            .oneshot(post_json("/api/internal/config/reload", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"status": "ok"}));
        assert_eq!(rules.current().monitor_keywords[0].text, "new");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn reload_of_malformed_rules_is_500_with_fallback_published() {
        let path = tmp_file("tgm-control-bad");
        std::fs::write(&path, "{broken").unwrap();
        let st = state(&path, Arc::new(Outbox::default()));
        let rules = st.rules.clone();

        let resp = control_routes(st)
            .oneshot(post_json("/api/internal/config/reload", json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(resp).await.get("error").is_some());
        assert!(rules.current().log_all_messages);
        assert_eq!(rules.current().source_version, SourceVersion::MISSING);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn send_validates_and_delivers() {
        let outbox = Arc::new(Outbox::default());
        let st = state(&tmp_file("tgm-control-none"), outbox.clone());

        let resp = control_routes(st.clone())
            .oneshot(post_json("/api/internal/telegram/send", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = control_routes(st.clone())
            .oneshot(post_json("/api/internal/telegram/send", json!({"target": "@alerts"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = control_routes(st)
            .oneshot(post_json(
                "/api/internal/telegram/send",
                json!({"target": -1001, "message": "hello"}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["message_id"], 9);
        assert_eq!(
            outbox.sent.lock().unwrap()[0],
            (Recipient::Chat(ChatId(-1001)), "hello".to_string())
        );
    }

    #[tokio::test]
    async fn send_failure_is_500() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Outbox::default()
        });
        let st = state(&tmp_file("tgm-control-none"), outbox);
        let resp = control_routes(st)
            .oneshot(post_json("/api/internal/telegram/send", json!({"target": "me", "message": "x"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn bind_fails_when_address_is_taken() {
        let held = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = held.local_addr().unwrap();

        let err = bind(addr).await.unwrap_err();
        assert!(err.to_string().contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn serve_stops_on_cancel() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let st = state(&tmp_file("tgm-control-none"), Arc::new(Outbox::default()));
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, st, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
