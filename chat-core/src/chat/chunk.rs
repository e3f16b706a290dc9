use serde::Serialize;

use super::message::{Role, ToolCall};

/// One frame of the chat response stream, sent to the browser as an SSE
/// `data:` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamChunk {
    pub id: String,
    pub model: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: ChunkKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChunkKind {
    Content {
        delta: String,
        /// Full assistant text so far.
        content: String,
        role: Role,
    },
    ToolCall {
        tool_call: ToolCall,
        index: usize,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
    Done {
        finish_reason: String,
    },
    Error {
        error: ChunkError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkError {
    pub message: String,
}

impl StreamChunk {
    pub fn new(id: &str, model: &str, kind: ChunkKind) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ChunkKind::Done { .. } | ChunkKind::Error { .. })
    }
}
