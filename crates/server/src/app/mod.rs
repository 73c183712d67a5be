mod error;
mod handlers;
mod types;

use axum::routing::{get, post};
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use whatsbridge_link::{Dispatcher, StatusStore};
use whatsbridge_whatsapp::MessagingClient;

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn MessagingClient>,
    pub status: StatusStore,
    pub dispatcher: Dispatcher,
    pub shutdown: CancellationToken,
    restart: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        status: StatusStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(client.clone(), status.clone()),
            client,
            status,
            shutdown,
            restart: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn restart_requested(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/kaithhealthcheck", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/connected", get(handlers::connected))
        .route("/send", post(handlers::send))
        .route("/send-image", post(handlers::send_image))
        .route("/send-audio", post(handlers::send_audio))
        .route("/send-document", post(handlers::send_document))
        .route("/send-bulk", post(handlers::send_bulk))
        .route("/disconnect", post(handlers::disconnect))
        .route("/restart", post(handlers::restart))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use whatsbridge_link::testing::FakeClient;
    use whatsbridge_link::StatusUpdate;

    fn state(client: Arc<FakeClient>) -> AppState {
        AppState::new(client, StatusStore::new(), CancellationToken::new())
    }

    fn connected_state(client: Arc<FakeClient>) -> AppState {
        let state = state(client);
        state.status.apply(StatusUpdate::Connected);
        state
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let state = state(Arc::new(FakeClient::new()));

        let (code, body) = call(&state, "GET", "/", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["connected"], false);

        let (code, body) = call(&state, "GET", "/kaithhealthcheck", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_starts_not_connected() {
        let state = state(Arc::new(FakeClient::new()));

        let (code, body) = call(&state, "GET", "/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["connected"], false);
        assert_eq!(body["message"], "Not connected yet");
        assert_eq!(body["pairing_code"], Value::Null);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_503() {
        let client = Arc::new(FakeClient::new());
        let state = state(client.clone());

        let (code, body) = call(
            &state,
            "POST",
            "/send",
            Some(json!({"phone_number": "923001234567", "message": "hi"})),
        )
        .await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body["detail"],
            "WhatsApp bot is not connected. Please wait for connection or scan QR code."
        );
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_success() {
        let client = Arc::new(FakeClient::new());
        let state = connected_state(client.clone());

        let (code, body) = call(
            &state,
            "POST",
            "/send",
            Some(json!({"phone_number": "923001234567", "message": "hi"})),
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Message sent successfully");
        assert_eq!(body["phone_number"], "923001234567");
        assert_eq!(client.sent(), vec!["send:923001234567:text"]);
    }

    #[tokio::test]
    async fn test_send_failure_is_500_with_forwarded_text() {
        let state = connected_state(Arc::new(FakeClient::new().failing_for("222")));

        let (code, body) = call(
            &state,
            "POST",
            "/send",
            Some(json!({"phone_number": "222", "message": "hi"})),
        )
        .await;

        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            "Failed to send message: Gateway error: 500 could not deliver to 222"
        );
    }

    #[tokio::test]
    async fn test_bad_input_is_400() {
        let state = connected_state(Arc::new(FakeClient::new()));

        let (code, _) = call(
            &state,
            "POST",
            "/send",
            Some(json!({"phone_number": "call me", "message": "hi"})),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (code, body) = call(&state, "POST", "/send", Some(json!({"message": "hi"}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("phone_number"));
    }

    #[tokio::test]
    async fn test_send_media_routes() {
        let client = Arc::new(FakeClient::new());
        let state = connected_state(client.clone());

        for (uri, kind) in [
            ("/send-image", "image"),
            ("/send-audio", "audio"),
            ("/send-document", "document"),
        ] {
            let (code, body) = call(
                &state,
                "POST",
                uri,
                Some(json!({
                    "phone_number": "923001234567",
                    "url": "https://cdn.example.com/file.bin",
                    "caption": "look"
                })),
            )
            .await;
            assert_eq!(code, StatusCode::OK, "{}", uri);
            assert_eq!(body["status"], "success");
            assert!(client
                .sent()
                .contains(&format!("send:923001234567:{}", kind)));
        }
    }

    #[tokio::test]
    async fn test_send_bulk_reports_each_target() {
        let state = connected_state(Arc::new(FakeClient::new().failing_for("222")));

        let (code, body) = call(
            &state,
            "POST",
            "/send-bulk",
            Some(json!({"phone_numbers": ["111", "222"], "message": "hi"})),
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["results"][0]["phone_number"], "111");
        assert_eq!(body["results"][0]["status"], "success");
        assert_eq!(body["results"][1]["phone_number"], "222");
        assert_eq!(body["results"][1]["status"], "error");
    }

    #[tokio::test]
    async fn test_send_bulk_while_disconnected_still_lists_every_target() {
        let state = state(Arc::new(FakeClient::new()));

        let (code, body) = call(
            &state,
            "POST",
            "/send-bulk",
            Some(json!({"phone_numbers": ["111", "222", "333"], "message": "hi"})),
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["total"], 3);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r["status"] == "error"));
    }

    #[tokio::test]
    async fn test_disconnect_marks_status() {
        let state = connected_state(Arc::new(FakeClient::new()));

        let (code, body) = call(&state, "POST", "/disconnect", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["message"], "Disconnected successfully");

        let snapshot = state.status.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.message, "Disconnected by user");
    }

    #[tokio::test]
    async fn test_restart_requests_shutdown() {
        let state = state(Arc::new(FakeClient::new()));
        assert!(!state.restart_requested());

        let (code, _) = call(&state, "POST", "/restart", None).await;
        assert_eq!(code, StatusCode::OK);
        assert!(state.restart_requested());
        assert!(state.shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_connected_asks_the_client() {
        let client = Arc::new(FakeClient::new());
        let state = state(client.clone());

        let (_, body) = call(&state, "GET", "/connected", None).await;
        assert_eq!(body["connected"], false);
        assert!(body["checked_at"].is_string());

        client.set_live(true);
        let (_, body) = call(&state, "GET", "/connected", None).await;
        assert_eq!(body["connected"], true);
        assert!(body.get("error").is_none());
        assert!(client.calls().iter().filter(|c| *c == "is_connected").count() == 2);
    }
}
