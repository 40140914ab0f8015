//! Chat request types handed to an engine.
//!

use serde::{Deserialize, Serialize};

/// Persona used for every relayed request.
pub const SYSTEM_PERSONA: &str = "You are a helpful assistant.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn as_jinja_value(&self) -> minijinja::Value {
        minijinja::context! {
            role => self.role.as_str(),
            content => self.content
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A non-streaming chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Builds the two-entry request sent for a single user message.
    pub fn for_user_message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(SYSTEM_PERSONA), ChatMessage::user(message)],
        }
    }

    pub fn as_jinja_input(&self) -> minijinja::Value {
        let messages: Vec<minijinja::Value> =
            self.messages.iter().map(|m| m.as_jinja_value()).collect();

        minijinja::context! {
            messages => messages
        }
    }
}
