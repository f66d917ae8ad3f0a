//! API request and response types

use crate::db::{Conversation, Message};
use crate::llm::ModelSummary;
use serde::{Deserialize, Serialize};

/// Request to send a user turn
#[derive(Debug, Deserialize)]
pub struct SendTurnRequest {
    #[serde(alias = "text")]
    pub utterance: String,
}

/// Request to change the active model
#[derive(Debug, Deserialize)]
pub struct SwitchModelRequest {
    pub model_id: String,
}

/// Request to toggle retrieval priority
#[derive(Debug, Deserialize)]
pub struct RetrievalPriorityRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct RetrievalPriorityResponse {
    pub retrieval_priority: bool,
}

/// Response for the model listing
#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelSummary>,
    pub active_model: String,
}

/// Response with a conversation's transcript
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub conversation_id: String,
    pub messages: Vec<Message>,
}

/// Response with a single conversation
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

/// Assistant messages flagged for knowledge base review
#[derive(Debug, Serialize)]
pub struct UnresolvedResponse {
    pub messages: Vec<Message>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
