//! Usage records
//!
//! One record per committed debit. Records are immutable facts; nothing in
//! the crate mutates a record after it was appended.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input modality of a billable request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Image,
    Video,
    Url,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Text => "text",
            InputType::Image => "image",
            InputType::Video => "video",
            InputType::Url => "url",
        }
    }
}

impl Default for InputType {
    fn default() -> Self {
        InputType::Text
    }
}

/// Usage record for one successful debit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record ID (time ordered)
    pub id: Uuid,
    /// Owner of the debited account
    pub user_id: String,
    /// Feature identifier as billed
    pub feature: String,
    /// Credits charged by the debit
    pub credits_charged: u64,
    /// Model or engine that served the request
    pub model: String,
    /// Input modality
    pub input_type: InputType,
    /// Record timestamp (Unix millis)
    pub timestamp: i64,
}

impl UsageRecord {
    /// Create a new usage record stamped with the current time
    pub fn new(user_id: impl Into<String>, feature: impl Into<String>, credits_charged: u64) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            feature: feature.into(),
            credits_charged,
            model: String::new(),
            input_type: InputType::default(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Set the serving model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the input modality
    pub fn with_input_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    /// Override the timestamp (backfills and tests)
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}
