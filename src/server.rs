//! HTTP route layer over the translation service.

use axum::extract::{Json as ExtractJson, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::backend::ChatMessage;
use crate::config::ServerConfig;
use crate::error::{ParleyError, Result};
use crate::health::HealthSnapshot;
use crate::service::{TranslationRequest, TranslationService};

const STREAM_DONE: &str = "[DONE]";

type SharedService = Arc<TranslationService>;
type EventStream = BoxStream<'static, std::result::Result<Event, Infallible>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub translation: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub items: Vec<TranslationRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub translations: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<ChatMessage>,
}

/// Service failure rendered as `{"error": ...}` with a matching status.
pub struct ApiError(ParleyError);

impl From<ParleyError> for ApiError {
    fn from(err: ParleyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            e if e.is_backend_failure() => StatusCode::BAD_GATEWAY,
            ParleyError::QueueClosed | ParleyError::JobAbandoned(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("Request failed with {}: {}", status, self.0);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Build the application router. Fails when an allowed origin is not a
/// valid header value.
pub fn router(service: SharedService, allowed_origins: &[String]) -> Result<Router> {
    Ok(Router::new()
        .route("/translate", post(translate))
        .route("/translate_batch", post(translate_batch))
        .route("/chat_stream", post(chat_stream))
        .route("/health", get(health))
        .route("/health/llama", get(health_llama))
        .route("/health/llm", get(health_llama))
        .layer(build_cors(allowed_origins)?)
        .with_state(service))
}

fn build_cors(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>()
                .map_err(|e| ParleyError::Config(format!("Invalid CORS origin {:?}: {}", o, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]))
}

/// Bind, serve until Ctrl-C, then drain the worker pool.
pub async fn serve(service: SharedService, config: &ServerConfig) -> Result<()> {
    let app = router(service.clone(), &config.allowed_origins)?;
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .map_err(|e| ParleyError::Server(format!("Failed to bind {}: {}", config.bind, e)))?;
    info!("Listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
        })
        .await
        .map_err(|e| ParleyError::Server(e.to_string()))?;

    service.shutdown().await;
    Ok(())
}

async fn translate(
    State(service): State<SharedService>,
    ExtractJson(request): ExtractJson<TranslationRequest>,
) -> std::result::Result<Json<TranslationResponse>, ApiError> {
    let translation = service
        .translate(&request.text, &request.src_lang, &request.tgt_lang, request.priority())
        .await?;
    Ok(Json(TranslationResponse { translation }))
}

async fn translate_batch(
    State(service): State<SharedService>,
    ExtractJson(request): ExtractJson<BatchRequest>,
) -> std::result::Result<Json<BatchResponse>, ApiError> {
    let translations = service
        .translate_batch(&request.items)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(BatchResponse { translations }))
}

async fn chat_stream(
    State(service): State<SharedService>,
    ExtractJson(request): ExtractJson<ChatStreamRequest>,
) -> std::result::Result<Sse<EventStream>, ApiError> {
    let deltas = service.stream_chat(request.messages).await?;

    // A mid-stream failure can no longer change the status code; log it and
    // close the stream normally.
    let events = deltas
        .filter_map(|delta| async move {
            match delta {
                Ok(text) => Some(Ok(Event::default().data(sse_safe(&text)))),
                Err(e) => {
                    warn!("Chat stream aborted: {}", e);
                    None
                }
            }
        })
        .chain(stream::once(async { Ok(Event::default().data(STREAM_DONE)) }))
        .boxed();

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// SSE data may not carry carriage returns; fold them into line feeds.
fn sse_safe(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "engine": "llm-only",
        "backend": "llama.cpp",
    }))
}

async fn health_llama(State(service): State<SharedService>) -> Json<HealthSnapshot> {
    Json(service.health().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockChatBackend;
    use crate::config::Config;

    async fn spawn_app(backend: MockChatBackend) -> String {
        let service = Arc::new(TranslationService::with_backend(&Config::default(), Arc::new(backend)));
        let app = router(service, &ServerConfig::default().allowed_origins).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_translate_route() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_complete()
            .times(1)
            .returning(|_| Ok("Bonjour".to_string()));
        let base = spawn_app(backend).await;

        let response = reqwest::Client::new()
            .post(format!("{}/translate", base))
            .json(&json!({"text": "Hello friend", "src_lang": "en", "tgt_lang": "fr"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["translation"], "Bonjour");
    }

    #[tokio::test]
    async fn test_backend_failure_maps_to_bad_gateway() {
        let mut backend = MockChatBackend::new();
        backend.expect_complete().returning(|_| {
            Err(ParleyError::Backend {
                status: Some(500),
                message: "out of memory".to_string(),
            })
        });
        let base = spawn_app(backend).await;

        let response = reqwest::Client::new()
            .post(format!("{}/translate", base))
            .json(&json!({"text": "Hello friend", "src_lang": "en", "tgt_lang": "fr", "priority": "critical"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 502);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_batch_route_keeps_order() {
        let mut backend = MockChatBackend::new();
        backend.expect_complete().never();
        let base = spawn_app(backend).await;

        let response = reqwest::Client::new()
            .post(format!("{}/translate_batch", base))
            .json(&json!({"items": [
                {"text": "Hello", "src_lang": "en", "tgt_lang": "en-GB"},
                {"text": "max_retries", "src_lang": "en", "tgt_lang": "it"},
            ]}))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["translations"], json!(["Hello", "max_retries"]));
    }

    #[tokio::test]
    async fn test_chat_stream_relays_deltas_and_appends_done() {
        let mut backend = MockChatBackend::new();
        backend.expect_stream().times(1).returning(|_| {
            Ok(stream::iter(vec![Ok("He".to_string()), Ok("llo".to_string())]).boxed())
        });
        let base = spawn_app(backend).await;

        let body = reqwest::Client::new()
            .post(format!("{}/chat_stream", base))
            .json(&json!({"messages": [{"role": "user", "content": "Hi"}]}))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        let data: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(data, vec!["He", "llo", "[DONE]"]);
    }

    #[tokio::test]
    async fn test_chat_stream_survives_carriage_returns() {
        let mut backend = MockChatBackend::new();
        backend.expect_stream().times(1).returning(|_| {
            Ok(stream::iter(vec![Ok("line one\r\n".to_string()), Ok("two\rthree".to_string())]).boxed())
        });
        let base = spawn_app(backend).await;

        let response = reqwest::Client::new()
            .post(format!("{}/chat_stream", base))
            .json(&json!({"messages": [{"role": "user", "content": "Hi"}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body = response.text().await.unwrap();
        let data: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert!(data.contains(&"line one"));
        assert!(data.contains(&"two"));
        assert!(data.contains(&"three"));
        assert_eq!(data.last(), Some(&"[DONE]"));
    }

    #[test]
    fn test_sse_safe_folds_carriage_returns() {
        assert_eq!(sse_safe("a\r\nb\rc\nd"), "a\nb\nc\nd");
        assert_eq!(sse_safe("plain"), "plain");
    }

    #[tokio::test]
    async fn test_health_routes() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_list_models()
            .times(1)
            .returning(|| Ok(vec!["llama".to_string()]));
        let base = spawn_app(backend).await;
        let client = reqwest::Client::new();

        let fixed: serde_json::Value = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fixed, json!({"status": "ok", "engine": "llm-only", "backend": "llama.cpp"}));

        for path in ["/health/llama", "/health/llm"] {
            let probe: serde_json::Value = client
                .get(format!("{}{}", base, path))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(probe["status"], "ok");
            assert_eq!(probe["llama"], "up");
            assert_eq!(probe["models"], json!(["llama"]));
        }
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        let err = build_cors(&["http://bad\norigin".to_string()]).unwrap_err();
        assert!(matches!(err, ParleyError::Config(_)));
    }
}
