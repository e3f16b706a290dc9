//! Streaming chat against a hosted model, with tool calls resolved locally.

pub mod chunk;
pub mod client;
pub mod gemini;
pub mod message;
pub mod orchestrator;
pub mod sse;

pub use chunk::{ChunkKind, StreamChunk};
pub use client::{ModelClient, ModelEvent, ModelRequest, ModelStream};
pub use gemini::{GeminiClient, GeminiConfig};
pub use message::{ChatMessage, ChatRequest, Role, ToolCall};
pub use orchestrator::ChatOrchestrator;
