use std::{collections::HashMap, sync::Arc};

use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::{error::ChatError, tool::ToolRegistry};

use super::{
    chunk::{ChunkError, ChunkKind, StreamChunk},
    client::{ModelClient, ModelEvent, ModelRequest, ModelStream, Turn, TurnPart, TurnRole},
    message::{ChatMessage, ChatRequest, Role, ToolCall},
};

pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;
const CHANNEL_CAPACITY: usize = 64;
const SYSTEM_PROMPT: &str = "You are a friendly assistant. When the user asks about the weather \
     somewhere, call the get_weather tool and answer from its result. Keep answers short.";

/// Drives one chat request: model generation, tool calls, chunk stream.
#[derive(Clone)]
pub struct ChatOrchestrator {
    client: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    max_tool_rounds: usize,
}

impl ChatOrchestrator {
    pub fn new(client: Arc<dyn ModelClient>, tools: ToolRegistry) -> Self {
        Self {
            client,
            tools,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    /// Start generation. The first model call happens before this returns,
    /// so setup failures surface as `Err`; later failures arrive as a final
    /// `error` chunk.
    pub async fn run(&self, request: ChatRequest) -> Result<ReceiverStream<StreamChunk>, ChatError> {
        let turns = to_turns(&request.messages)?;
        let model_request = ModelRequest {
            system: Some(SYSTEM_PROMPT.to_string()),
            turns,
            tools: self.tools.declarations(),
        };

        tracing::info!(
            conversation_id = request.conversation_id.as_deref().unwrap_or("-"),
            messages = request.messages.len(),
            model = self.client.model(),
            "starting chat generation"
        );

        let first = self.client.stream(model_request.clone()).await?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let run = Run {
            client: self.client.clone(),
            tools: self.tools.clone(),
            max_tool_rounds: self.max_tool_rounds,
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            tx,
        };
        tokio::spawn(run.drive(model_request, first));

        Ok(ReceiverStream::new(rx))
    }
}

struct Run {
    client: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    max_tool_rounds: usize,
    message_id: String,
    tx: mpsc::Sender<StreamChunk>,
}

struct PendingCall {
    id: String,
    name: String,
    args: Value,
}

impl Run {
    async fn drive(self, mut request: ModelRequest, mut stream: ModelStream) {
        let mut content = String::new();
        let mut finish_reason = None;
        let mut round = 0;

        loop {
            let mut round_text = String::new();
            let mut calls = Vec::new();

            while let Some(event) = stream.next().await {
                match event {
                    Ok(ModelEvent::Text(delta)) => {
                        content.push_str(&delta);
                        round_text.push_str(&delta);
                        let kind = ChunkKind::Content {
                            delta,
                            content: content.clone(),
                            role: Role::Assistant,
                        };
                        if !self.emit(kind).await {
                            return;
                        }
                    }
                    Ok(ModelEvent::FunctionCall { name, args }) => calls.push(PendingCall {
                        id: format!("call_{}", Uuid::new_v4().simple()),
                        name,
                        args,
                    }),
                    Ok(ModelEvent::Finished(reason)) => finish_reason = reason,
                    Err(e) => {
                        self.fail(e).await;
                        return;
                    }
                }
            }

            if calls.is_empty() {
                break;
            }
            round += 1;

            let mut model_parts = Vec::new();
            if !round_text.is_empty() {
                model_parts.push(TurnPart::Text(round_text));
            }
            let mut responses = Vec::new();

            for (index, call) in calls.into_iter().enumerate() {
                let tool_call = ToolCall::function(&call.id, &call.name, call.args.to_string());
                if !self.emit(ChunkKind::ToolCall { tool_call, index }).await {
                    return;
                }

                let result = self.tools.call(&call.name, call.args.clone()).await;
                let kind = ChunkKind::ToolResult {
                    tool_call_id: call.id.clone(),
                    content: result.to_string(),
                };
                if !self.emit(kind).await {
                    return;
                }

                model_parts.push(TurnPart::FunctionCall {
                    name: call.name.clone(),
                    args: call.args,
                });
                responses.push(TurnPart::FunctionResponse {
                    name: call.name,
                    response: as_object(result),
                });
            }

            request.turns.push(Turn::model(model_parts));
            request.turns.push(Turn::user(responses));

            if round >= self.max_tool_rounds {
                tracing::warn!(rounds = round, "tool round limit reached");
                finish_reason = Some("tool_calls".to_string());
                break;
            }

            stream = match self.client.stream(request.clone()).await {
                Ok(s) => s,
                Err(e) => {
                    self.fail(e).await;
                    return;
                }
            };
        }

        let finish_reason = finish_reason.unwrap_or_else(|| "stop".to_string());
        tracing::debug!(%finish_reason, rounds = round, "chat generation finished");
        self.emit(ChunkKind::Done { finish_reason }).await;
    }

    /// `false` once the receiver is gone.
    async fn emit(&self, kind: ChunkKind) -> bool {
        let chunk = StreamChunk::new(&self.message_id, self.client.model(), kind);
        self.tx.send(chunk).await.is_ok()
    }

    async fn fail(&self, err: ChatError) {
        tracing::warn!(error = %err, "chat generation failed mid-stream");
        let kind = ChunkKind::Error {
            error: ChunkError { message: err.to_string() },
        };
        self.emit(kind).await;
    }
}

/// Gemini function responses must be JSON objects.
fn as_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "result": other }),
    }
}

/// Convert browser-side history into model turns. Consecutive messages that
/// map to the same role are merged into one turn.
pub(crate) fn to_turns(messages: &[ChatMessage]) -> Result<Vec<Turn>, ChatError> {
    let mut call_names: HashMap<&str, &str> = HashMap::new();
    let mut turns: Vec<Turn> = Vec::new();

    for message in messages {
        let text = message.content.as_deref().filter(|c| !c.trim().is_empty());

        let (role, parts) = match message.role {
            Role::User => (TurnRole::User, text.map(|t| vec![TurnPart::Text(t.to_string())])),
            Role::Assistant => {
                let mut parts = Vec::new();
                if let Some(t) = text {
                    parts.push(TurnPart::Text(t.to_string()));
                }
                for call in message.tool_calls.iter().flatten() {
                    let args = parse_arguments(&call.function.arguments).map_err(|e| {
                        ChatError::InvalidMessage(format!(
                            "tool call '{}' has malformed arguments: {e}",
                            call.id
                        ))
                    })?;
                    call_names.insert(&call.id, &call.function.name);
                    parts.push(TurnPart::FunctionCall {
                        name: call.function.name.clone(),
                        args,
                    });
                }
                (TurnRole::Model, Some(parts).filter(|p| !p.is_empty()))
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().ok_or_else(|| {
                    ChatError::InvalidMessage("tool message without toolCallId".into())
                })?;
                let name = call_names.get(id).ok_or_else(|| {
                    ChatError::InvalidMessage(format!("tool result for unknown call '{id}'"))
                })?;
                let raw = message.content.as_deref().unwrap_or_default();
                let response = serde_json::from_str(raw)
                    .map(as_object)
                    .unwrap_or_else(|_| json!({ "content": raw }));
                (
                    TurnRole::User,
                    Some(vec![TurnPart::FunctionResponse {
                        name: name.to_string(),
                        response,
                    }]),
                )
            }
        };

        let Some(parts) = parts else { continue };
        match turns.last_mut() {
            Some(last) if last.role == role => last.parts.extend(parts),
            _ => turns.push(Turn { role, parts }),
        }
    }

    if turns.is_empty() {
        return Err(ChatError::InvalidMessage("no messages to send".into()));
    }

    Ok(turns)
}

fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolDeclaration};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted rounds and records every request it receives.
    struct ScriptedModel {
        rounds: Mutex<Vec<Vec<Result<ModelEvent, ChatError>>>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(rounds: Vec<Vec<Result<ModelEvent, ChatError>>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ChatError> {
            self.requests.lock().unwrap().push(request);
            let events = self
                .rounds
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ChatError::Stream("script exhausted".into()))?;
            Ok(futures::stream::iter(events).boxed())
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "echo".into(),
                description: "echo".into(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn call(&self, args: Value) -> Value {
            json!({ "echoed": args })
        }
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        tools
    }

    async fn run_to_end(model: Arc<ScriptedModel>, messages: Vec<ChatMessage>) -> Vec<StreamChunk> {
        let orchestrator = ChatOrchestrator::new(model, registry());
        let stream = orchestrator
            .run(ChatRequest {
                messages,
                conversation_id: Some("conv".into()),
            })
            .await
            .unwrap();
        stream.collect().await
    }

    #[tokio::test]
    async fn streams_text_then_done() {
        let model = ScriptedModel::new(vec![vec![
            Ok(ModelEvent::Text("Hi".into())),
            Ok(ModelEvent::Text(" there".into())),
            Ok(ModelEvent::Finished(Some("stop".into()))),
        ]]);

        let chunks = run_to_end(model.clone(), vec![ChatMessage::user("hello")]).await;

        assert_eq!(chunks.len(), 3);
        match &chunks[1].kind {
            ChunkKind::Content { delta, content, .. } => {
                assert_eq!(delta, " there");
                assert_eq!(content, "Hi there");
            }
            other => panic!("unexpected chunk: {other:?}"),
        }
        assert_eq!(chunks[2].kind, ChunkKind::Done { finish_reason: "stop".into() });
        assert!(chunks.iter().all(|c| c.id == chunks[0].id && c.model == "scripted"));

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tools[0].name, "echo");
        assert!(requests[0].system.is_some());
    }

    #[tokio::test]
    async fn executes_tool_and_continues() {
        let model = ScriptedModel::new(vec![
            vec![Ok(ModelEvent::FunctionCall {
                name: "echo".into(),
                args: json!({"location": "Oslo"}),
            })],
            vec![Ok(ModelEvent::Text("Done.".into()))],
        ]);

        let chunks = run_to_end(model.clone(), vec![ChatMessage::user("weather?")]).await;

        let kinds: Vec<_> = chunks.iter().map(|c| &c.kind).collect();
        let ChunkKind::ToolCall { tool_call, index } = kinds[0] else {
            panic!("expected tool_call, got {:?}", kinds[0]);
        };
        assert_eq!(*index, 0);
        assert_eq!(tool_call.function.name, "echo");

        let ChunkKind::ToolResult { tool_call_id, content } = kinds[1] else {
            panic!("expected tool_result, got {:?}", kinds[1]);
        };
        assert_eq!(tool_call_id, &tool_call.id);
        assert_eq!(
            serde_json::from_str::<Value>(content).unwrap(),
            json!({"echoed": {"location": "Oslo"}})
        );

        assert!(matches!(kinds[2], ChunkKind::Content { .. }));
        assert_eq!(*kinds[3], ChunkKind::Done { finish_reason: "stop".into() });

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let turns = &requests[1].turns;
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, TurnRole::Model);
        assert_eq!(
            turns[2].parts[0],
            TurnPart::FunctionResponse {
                name: "echo".into(),
                response: json!({"echoed": {"location": "Oslo"}}),
            }
        );
    }

    #[tokio::test]
    async fn stops_after_tool_round_limit() {
        let call = || {
            vec![Ok(ModelEvent::FunctionCall {
                name: "echo".into(),
                args: json!({}),
            })]
        };
        let model = ScriptedModel::new(vec![call(), call(), call()]);

        let orchestrator = ChatOrchestrator::new(model.clone(), registry()).with_max_tool_rounds(2);
        let chunks: Vec<_> = orchestrator
            .run(ChatRequest {
                messages: vec![ChatMessage::user("loop")],
                conversation_id: None,
            })
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(model.requests.lock().unwrap().len(), 2);
        assert_eq!(
            chunks.last().unwrap().kind,
            ChunkKind::Done { finish_reason: "tool_calls".into() }
        );
    }

    #[tokio::test]
    async fn mid_stream_error_becomes_error_chunk() {
        let model = ScriptedModel::new(vec![vec![
            Ok(ModelEvent::Text("partial".into())),
            Err(ChatError::Stream("connection reset".into())),
            Ok(ModelEvent::Text("never sent".into())),
        ]]);

        let chunks = run_to_end(model, vec![ChatMessage::user("hi")]).await;

        assert_eq!(chunks.len(), 2);
        match &chunks[1].kind {
            ChunkKind::Error { error } => assert!(error.message.contains("connection reset")),
            other => panic!("unexpected chunk: {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_call_failure_is_returned() {
        let model = ScriptedModel::new(vec![]);
        let orchestrator = ChatOrchestrator::new(model, registry());

        let err = orchestrator
            .run(ChatRequest {
                messages: vec![ChatMessage::user("hi")],
                conversation_id: None,
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ChatError::Stream(_)));
    }

    #[test]
    fn history_maps_to_turns() {
        let mut assistant = ChatMessage::assistant("");
        assistant.tool_calls = Some(vec![ToolCall::function(
            "call_1",
            "get_weather",
            r#"{"location":"Paris"}"#.into(),
        )]);
        let tool = ChatMessage {
            role: Role::Tool,
            content: Some(r#"{"temperature":12.5}"#.into()),
            tool_calls: None,
            tool_call_id: Some("call_1".into()),
        };

        let turns = to_turns(&[
            ChatMessage::user("Weather in Paris?"),
            ChatMessage::user("Please."),
            assistant,
            tool,
            ChatMessage::assistant("It is 12.5 degrees."),
        ])
        .unwrap();

        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[0].parts.len(), 2);
        assert_eq!(
            turns[1].parts,
            vec![TurnPart::FunctionCall {
                name: "get_weather".into(),
                args: json!({"location": "Paris"}),
            }]
        );
        assert_eq!(
            turns[2].parts,
            vec![TurnPart::FunctionResponse {
                name: "get_weather".into(),
                response: json!({"temperature": 12.5}),
            }]
        );
        assert_eq!(turns[3].role, TurnRole::Model);
    }

    #[test]
    fn tool_result_for_unknown_call_is_rejected() {
        let tool = ChatMessage {
            role: Role::Tool,
            content: Some("{}".into()),
            tool_calls: None,
            tool_call_id: Some("call_404".into()),
        };
        let err = to_turns(&[ChatMessage::user("hi"), tool]).unwrap_err();
        assert!(matches!(err, ChatError::InvalidMessage(_)));
    }

    #[test]
    fn empty_history_is_rejected() {
        let err = to_turns(&[ChatMessage::user("   ")]).unwrap_err();
        assert_eq!(err.to_string(), "Invalid message: no messages to send");
    }

    #[test]
    fn plain_text_tool_result_is_wrapped() {
        let mut assistant = ChatMessage::assistant("");
        assistant.tool_calls = Some(vec![ToolCall::function("c", "echo", String::new())]);
        let tool = ChatMessage {
            role: Role::Tool,
            content: Some("sunny".into()),
            tool_calls: None,
            tool_call_id: Some("c".into()),
        };

        let turns = to_turns(&[ChatMessage::user("hi"), assistant, tool]).unwrap();
        assert_eq!(
            turns[2].parts[0],
            TurnPart::FunctionResponse {
                name: "echo".into(),
                response: json!({"content": "sunny"}),
            }
        );
    }
}
