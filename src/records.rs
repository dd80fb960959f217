//! Records persisted in the activity store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message stored after a successful upsert.
pub const SENT_MESSAGE: &str = "Successfully sent to Pinecone";

/// Tab details reported by the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    /// Browser tab id.
    pub id: u64,
    /// Owning window id.
    #[serde(default)]
    pub window_id: Option<u64>,
    /// Tab title.
    #[serde(default)]
    pub title: Option<String>,
    /// Current URL.
    #[serde(default)]
    pub url: Option<String>,
}

/// Fields reported by a tab update event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabChange {
    /// Loading status, `loading` or `complete`.
    #[serde(default)]
    pub status: Option<String>,
    /// New URL when the tab navigated without a full load.
    #[serde(default)]
    pub url: Option<String>,
}

impl TabChange {
    /// Change for a finished page load.
    pub fn complete() -> Self {
        Self {
            status: Some("complete".to_string()),
            url: None,
        }
    }

    /// True when the tab finished loading.
    pub fn is_complete(&self) -> bool {
        self.status.as_deref() == Some("complete")
    }
}

/// Outcome of the last upsert or delete of a vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStatus {
    /// Whether the remote call succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
    /// Epoch ms when the status was written.
    pub timestamp: u64,
    /// Short-lived confirmation shown after a delete.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_temp: bool,
}

impl VectorStatus {
    /// Successful upsert.
    pub fn sent(timestamp: u64) -> Self {
        Self {
            success: true,
            message: SENT_MESSAGE.to_string(),
            timestamp,
            is_temp: false,
        }
    }

    /// Failed call; `error` is rendered after an `Error: ` prefix.
    pub fn failed(error: impl std::fmt::Display, timestamp: u64) -> Self {
        Self {
            success: false,
            message: format!("Error: {error}"),
            timestamp,
            is_temp: false,
        }
    }

    /// Temporary confirmation that replaces a deleted vector's status.
    pub fn temporary(message: impl Into<String>, timestamp: u64) -> Self {
        Self {
            success: true,
            message: message.into(),
            timestamp,
            is_temp: true,
        }
    }

    /// True for a lasting success, i.e. the vector exists remotely and can be deleted.
    pub fn is_deletable(&self) -> bool {
        self.success && !self.is_temp
    }
}

/// Captured Reddit events request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequestRecord {
    /// Always true; distinguishes request records from other values.
    pub is_api_request: bool,
    /// Request URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Parsed JSON body, or the raw body as a string.
    pub payload: Value,
    /// Epoch ms when the request was captured.
    pub timestamp: u64,
    /// Vector-id timestamp of each relevant event, in event order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_timestamps: Vec<u64>,
}

impl ApiRequestRecord {
    /// Timestamp of the `index`-th relevant event; records without the list
    /// count up from the capture time.
    pub fn action_timestamp(&self, index: usize) -> u64 {
        self.action_timestamps
            .get(index)
            .copied()
            .unwrap_or(self.timestamp + index as u64)
    }
}
