use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ChatError, truncate_body},
    tool::ToolDeclaration,
};

use super::{
    client::{ModelClient, ModelEvent, ModelRequest, ModelStream, Turn, TurnPart, TurnRole},
    sse::SseDecoder,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Transport settings for one Gemini client.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Skip TLS certificate validation for this client only. Development use.
    pub accept_invalid_certs: bool,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            accept_invalid_certs: false,
        }
    }

    /// HTTP client carrying this config's TLS settings.
    pub fn http_client(&self) -> Result<Client, ChatError> {
        http_client(self.accept_invalid_certs)
    }
}

/// HTTP client for model calls. `accept_invalid_certs` applies to this client
/// only and never to the weather lookups.
pub fn http_client(accept_invalid_certs: bool) -> Result<Client, ChatError> {
    if accept_invalid_certs {
        tracing::warn!("TLS certificate validation disabled for the Gemini client");
    }

    Ok(Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?)
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    http: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ChatError> {
        let http = config.http_client()?;
        Ok(Self::with_http(config, http))
    }

    pub fn with_http(config: GeminiConfig, http: Client) -> Self {
        Self { config, http }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ChatError> {
        let body = GenerateContentRequest::from(request);

        let res = self
            .http
            .post(self.endpoint())
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status,
                body: truncate_body(&body),
            });
        }

        let state = DecodeState {
            bytes: res.bytes_stream().boxed(),
            sse: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures::stream::unfold(state, next_event).boxed())
    }
}

struct DecodeState {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    sse: SseDecoder,
    pending: VecDeque<ModelEvent>,
    done: bool,
}

async fn next_event(
    mut st: DecodeState,
) -> Option<(Result<ModelEvent, ChatError>, DecodeState)> {
    loop {
        if let Some(event) = st.pending.pop_front() {
            return Some((Ok(event), st));
        }
        if st.done {
            return None;
        }

        let payloads = match st.bytes.next().await {
            Some(Ok(chunk)) => st.sse.push(&chunk),
            Some(Err(e)) => Err(ChatError::from(e)),
            None => {
                st.done = true;
                st.sse.finish().map(|rest| rest.into_iter().collect())
            }
        };

        let decoded = payloads.and_then(|payloads| {
            for payload in payloads {
                st.pending.extend(decode_payload(&payload)?);
            }
            Ok(())
        });

        if let Err(e) = decoded {
            st.done = true;
            st.pending.clear();
            return Some((Err(e), st));
        }
    }
}

fn decode_payload(payload: &str) -> Result<Vec<ModelEvent>, ChatError> {
    let parsed: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|e| ChatError::Stream(format!("invalid Gemini chunk: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(ChatError::Stream(err.message));
    }

    let mut events = Vec::new();
    for candidate in parsed.candidates {
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(call) = part.function_call {
                events.push(ModelEvent::FunctionCall {
                    name: call.name,
                    args: call.args.unwrap_or_else(|| Value::Object(Default::default())),
                });
            } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(ModelEvent::Text(text));
            }
        }
        if let Some(reason) = candidate.finish_reason {
            events.push(ModelEvent::Finished(Some(normalize_finish_reason(&reason))));
        }
    }

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        events.push(ModelEvent::Finished(Some(reason.to_lowercase())));
    }

    Ok(events)
}

fn normalize_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        other => other.to_lowercase(),
    }
}

// Wire types for generativelanguage.googleapis.com/v1beta

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GmContent>,
    contents: Vec<GmContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GmTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GmContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GmPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<GmFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<GmFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GmFunctionCall {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GmFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GmTool {
    function_declarations: Vec<ToolDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GmCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GmPromptFeedback>,
    #[serde(default)]
    error: Option<GmError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmCandidate {
    #[serde(default)]
    content: Option<GmContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmError {
    message: String,
}

impl From<ModelRequest> for GenerateContentRequest {
    fn from(request: ModelRequest) -> Self {
        let system_instruction = request.system.map(|text| GmContent {
            role: None,
            parts: vec![GmPart {
                text: Some(text),
                ..Default::default()
            }],
        });

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![GmTool {
                function_declarations: request.tools,
            }]
        };

        Self {
            system_instruction,
            contents: request.turns.into_iter().map(GmContent::from).collect(),
            tools,
        }
    }
}

impl From<Turn> for GmContent {
    fn from(turn: Turn) -> Self {
        let role = match turn.role {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        };

        let parts = turn
            .parts
            .into_iter()
            .map(|part| match part {
                TurnPart::Text(text) => GmPart {
                    text: Some(text),
                    ..Default::default()
                },
                TurnPart::FunctionCall { name, args } => GmPart {
                    function_call: Some(GmFunctionCall { name, args: Some(args) }),
                    ..Default::default()
                },
                TurnPart::FunctionResponse { name, response } => GmPart {
                    function_response: Some(GmFunctionResponse { name, response }),
                    ..Default::default()
                },
            })
            .collect();

        Self {
            role: Some(role.to_string()),
            parts,
        }
    }
}
