//! HTTP surface: the chat page and the streaming chat API.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        Html, IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use chat_core::{
    ChatError, Config, ToolRegistry,
    chat::{ChatOrchestrator, ChatRequest, GeminiClient, StreamChunk, gemini},
    weather_tool_from_config,
};
use futures::{Stream, StreamExt, stream};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

const CHAT_PAGE: &str = include_str!("../static/chat.html");

/// Shared, read-only per-process state.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    model_http: reqwest::Client,
    tools: ToolRegistry,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let model_http = gemini::http_client(config.accept_invalid_certs())?;

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(weather_tool_from_config(&config, reqwest::Client::new())));

        Ok(Self {
            config: Arc::new(config),
            model_http,
            tools,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::temporary("/Chat") }))
        .route("/Chat", get(chat_page))
        .route("/api/chat", post(handle_chat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn handle_chat(State(state): State<AppState>, body: Bytes) -> Response {
    // Credential first: nothing else runs without it.
    let gemini_config = match state.config.gemini_config() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "rejecting chat request");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "malformed chat request body");
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid request body: {e}"));
        }
    };

    let client = GeminiClient::with_http(gemini_config, state.model_http.clone());
    let orchestrator = ChatOrchestrator::new(Arc::new(client), state.tools.clone());

    match orchestrator.run(request).await {
        Ok(chunks) => Sse::new(to_events(chunks))
            .keep_alive(KeepAlive::default())
            .into_response(),
        Err(e) => {
            error!(error = %e, "chat generation could not start");
            let status = match e {
                ChatError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, &e.to_string())
        }
    }
}

/// One `data:` event per chunk, then the `[DONE]` sentinel.
fn to_events(
    chunks: impl Stream<Item = StreamChunk> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    chunks
        .map(|chunk| {
            let data = serde_json::to_string(&chunk).unwrap_or_else(|e| {
                json!({ "type": "error", "error": { "message": e.to_string() } }).to_string()
            });
            Ok(Event::default().data(data))
        })
        .chain(stream::once(async { Ok(Event::default().data("[DONE]")) }))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn spawn(config: Config) -> String {
        let state = AppState::new(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_for(server: &MockServer, api_key: Option<&str>) -> Config {
        let mut config = Config::default();
        config.gemini.api_key = api_key.map(str::to_string);
        config.gemini.base_url = Some(server.uri());
        config.weather.geocoding_url = Some(server.uri());
        config.weather.forecast_url = Some(server.uri());
        config
    }

    fn sse_body(chunks: &[Value]) -> String {
        chunks.iter().map(|c| format!("data: {c}\n\n")).collect()
    }

    /// `data:` payloads of an SSE response body.
    fn data_lines(body: &str) -> Vec<String> {
        body.lines()
            .filter_map(|l| l.strip_prefix("data: ").or_else(|| l.strip_prefix("data:")))
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn missing_credential_returns_500_without_calling_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let base = spawn(config_for(&server, None)).await;
        let res = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&json!({ "messages": [{ "role": "user", "content": "hi" }], "conversationId": "c1" }))
            .send()
            .await
            .unwrap();

        assert_eq!(res.status(), 500);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body, json!({ "error": "GEMINI_API_KEY not configured" }));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let server = MockServer::start().await;
        let base = spawn(config_for(&server, Some("KEY"))).await;

        let res = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .body("{not json")
            .send()
            .await
            .unwrap();

        assert_eq!(res.status(), 400);
        let body: Value = res.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
    }

    #[tokio::test]
    async fn upstream_failure_returns_500_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let base = spawn(config_for(&server, Some("KEY"))).await;
        let res = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&json!({ "messages": [{ "role": "user", "content": "hi" }] }))
            .send()
            .await
            .unwrap();

        assert_eq!(res.status(), 500);
        let body: Value = res.json().await.unwrap();
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("403"));
        assert!(message.contains("permission denied"));
    }

    #[tokio::test]
    async fn streams_weather_answer_through_tool_call() {
        let server = MockServer::start().await;

        // Second round: the tool result has been sent back.
        Mock::given(method("POST"))
            .and(body_string_contains("functionResponse"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{ "text": "It's 18.2°C and partly cloudy." }] },
                    "finishReason": "STOP"
                }]
            })])))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        // First round: the model asks for the weather.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[json!({
                "candidates": [{
                    "content": { "role": "model", "parts": [{
                        "functionCall": { "name": "get_weather", "args": { "location": "San Francisco, CA" } }
                    }] },
                    "finishReason": "STOP"
                }]
            })])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "latitude": 37.77, "longitude": -122.42, "name": "San Francisco", "country_code": "US" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": { "temperature_2m": 18.2, "weather_code": 2 }
            })))
            .mount(&server)
            .await;

        let base = spawn(config_for(&server, Some("KEY"))).await;
        let res = reqwest::Client::new()
            .post(format!("{base}/api/chat"))
            .json(&json!({
                "messages": [{ "role": "user", "content": "What's the weather in San Francisco?" }],
                "conversationId": "conv-1"
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(res.status(), 200);
        assert!(
            res.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let body = res.text().await.unwrap();
        let data = data_lines(&body);
        assert_eq!(data.last().map(String::as_str), Some("[DONE]"));

        let chunks: Vec<Value> = data[..data.len() - 1]
            .iter()
            .map(|d| serde_json::from_str(d).unwrap())
            .collect();
        let types: Vec<&str> = chunks.iter().map(|c| c["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["tool_call", "tool_result", "content", "done"]);

        assert_eq!(chunks[0]["toolCall"]["function"]["name"], "get_weather");
        let result: Value = serde_json::from_str(chunks[1]["content"].as_str().unwrap()).unwrap();
        assert_eq!(
            result,
            json!({ "temperature": 18.2, "conditions": "Partly cloudy", "location": "San Francisco, US" })
        );
        assert_eq!(chunks[2]["content"], "It's 18.2°C and partly cloudy.");
        assert_eq!(chunks[3]["finishReason"], "stop");
    }

    #[tokio::test]
    async fn serves_chat_page_and_redirects_root() {
        let server = MockServer::start().await;
        let base = spawn(config_for(&server, None)).await;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        let res = http.get(format!("{base}/Chat")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.text().await.unwrap().contains("/api/chat"));

        let res = http.get(format!("{base}/")).send().await.unwrap();
        assert_eq!(res.status(), 307);
        assert_eq!(res.headers()["location"], "/Chat");
    }
}
