//! Context items and server resource updates
//!
//! Context items are what an agent hands to its MCP servers; resource updates
//! are what servers may send back from `mcp/provideResources`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::errors::{MCPError, MCPResult};

/// Speaker of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One message of a conversation history item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Free text typed by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Prior turns of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub messages: Vec<ConversationMessage>,
}

/// Identity and persona of the agent producing the update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub agent_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A piece of context sent to MCP servers.
///
/// Serialized as `{"type": "<tag>", "content": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "camelCase")]
pub enum ContextItem {
    UserInput(UserInput),
    ConversationHistory(ConversationHistory),
    AgentContext(AgentContext),
}

/// Tag of a [`ContextItem`], as matched against `resources.supportedTypes`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextItemKind {
    UserInput,
    ConversationHistory,
    AgentContext,
}

impl ContextItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextItemKind::UserInput => "userInput",
            ContextItemKind::ConversationHistory => "conversationHistory",
            ContextItemKind::AgentContext => "agentContext",
        }
    }
}

impl ContextItem {
    /// User input stamped with the current time
    pub fn user_input(text: impl Into<String>) -> Self {
        ContextItem::UserInput(UserInput {
            text: text.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn conversation_history(messages: Vec<ConversationMessage>) -> Self {
        ContextItem::ConversationHistory(ConversationHistory { messages })
    }

    pub fn agent_context(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        personality: Option<String>,
        instructions: Option<String>,
    ) -> Self {
        ContextItem::AgentContext(AgentContext {
            agent_id: agent_id.into(),
            name: name.into(),
            personality,
            instructions,
        })
    }

    pub fn kind(&self) -> ContextItemKind {
        match self {
            ContextItem::UserInput(_) => ContextItemKind::UserInput,
            ContextItem::ConversationHistory(_) => ContextItemKind::ConversationHistory,
            ContextItem::AgentContext(_) => ContextItemKind::AgentContext,
        }
    }
}

/// A resource returned by a server in response to a context update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResourceUpdate {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub id: String,
    #[serde(default)]
    pub content: Value,
}

/// Parsed result of `mcp/provideResources`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvideResourcesResult {
    /// Well-formed resource updates, in server order
    pub resources: Vec<ServerResourceUpdate>,
    /// The result exactly as the server sent it
    pub raw: Value,
}

impl ProvideResourcesResult {
    /// Interpret a `mcp/provideResources` result.
    ///
    /// A plain acknowledgement (no `resources` field) yields no updates.
    /// Malformed entries inside `resources` are skipped with a warning; a
    /// `resources` field that is not an array is an error.
    pub fn from_value(raw: Value) -> MCPResult<Self> {
        let entries = match raw.get("resources") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => entries.clone(),
            Some(other) => {
                return Err(MCPError::serialization(format!(
                    "Expected resources array, got {}",
                    other
                )))
            }
        };

        let mut resources = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<ServerResourceUpdate>(entry) {
                Ok(update) => resources.push(update),
                Err(e) => warn!("Skipping malformed resource update: {}", e),
            }
        }

        Ok(Self { resources, raw })
    }
}
