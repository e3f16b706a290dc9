use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::{error::ChatError, tool::ToolDeclaration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnPart {
    Text(String),
    FunctionCall { name: String, args: Value },
    FunctionResponse { name: String, response: Value },
}

/// One entry of the conversation as sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
}

impl Turn {
    pub fn user(parts: Vec<TurnPart>) -> Self {
        Self { role: TurnRole::User, parts }
    }

    pub fn model(parts: Vec<TurnPart>) -> Self {
        Self { role: TurnRole::Model, parts }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    FunctionCall { name: String, args: Value },
    /// Provider finish reason, normalized to lowercase.
    Finished(Option<String>),
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, ChatError>>;

/// A streaming chat model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    fn model(&self) -> &str;

    /// Start one generation. Errors returned here happen before any output
    /// was produced; errors inside the stream happen mid-generation.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ChatError>;
}
