use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event payloads (the `data` object of inbound messages)
// ---------------------------------------------------------------------------

/// Severity carried by system notifications.
///
/// Unknown or missing levels read as [`Severity::Info`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
    Warning,
    #[default]
    #[serde(other)]
    Info,
}

/// `job_status_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusData {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// `session_status_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusData {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionStatusData {
    /// Session finished authenticating.
    pub const AUTHENTICATED: &'static str = "authenticated";
    /// Session authentication failed.
    pub const FAILED: &'static str = "failed";
}

/// `system_notification` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemNotificationData {
    #[serde(default)]
    pub level: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

/// `error_notification` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotificationData {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}
