// Language model completion
// The orchestrator talks to the completion service only through CompletionClient

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use openai::OpenAiClient;

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental text chunks of a streamed completion
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// Black-box chat completion service
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model identifier sent with every request
    fn model(&self) -> &str;

    /// Full answer to a conversation
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Answer to a conversation as a stream of text chunks
    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream>;
}
