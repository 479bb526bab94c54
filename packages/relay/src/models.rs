use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Inbound provider-signed event, deserialized after signature verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub created_at: i64,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Derived metadata attached to an event for downstream forwarding
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyMetadata {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: i64,
    pub api_version: String,
    pub idempotency_key: String,
}

/// A configured fan-out target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDestination {
    pub id: String,
    pub name: String,
    pub url: String,
    pub active: bool,
    /// Empty means the destination receives every event type
    pub event_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub headers: HashMap<String, String>,
    /// Maximum retries after the initial delivery attempt
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl WebhookDestination {
    /// Whether this destination should receive an event of the given type
    pub fn accepts(&self, event_type: &str) -> bool {
        self.active
            && (self.event_types.is_empty() || self.event_types.iter().any(|t| t == event_type))
    }
}

/// Body of `POST /destinations`; name and url are validated by the registry
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestination {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub retry_count: Option<u32>,
}

/// Body of `PATCH /destinations/{id}`; only provided fields are merged.
/// A caller-supplied `id` is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDestination {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub retry_count: Option<u32>,
}

/// Compact destination snapshot embedded in forwarding results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRef {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl From<&WebhookDestination> for DestinationRef {
    fn from(destination: &WebhookDestination) -> Self {
        Self {
            id: destination.id.clone(),
            name: destination.name.clone(),
            url: destination.url.clone(),
        }
    }
}

/// Per-destination outcome of one delivery attempt sequence
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingResult {
    pub destination: DestinationRef,
    pub success: bool,
    pub message: String,
    pub attempts: u32,
}

/// Process-wide aggregate counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMetrics {
    pub total_events: u64,
    pub successful_events: u64,
    pub failed_events: u64,
    pub errors_count: u64,
    pub average_processing_time: f64,
    pub events_by_type: HashMap<String, u64>,
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// Outcome of a rate-limit check for one identifier
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
}

/// Response for an accepted inbound webhook
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    pub event_type: String,
    pub duplicate: bool,
    pub forwarding_results: Vec<ForwardingResult>,
}

/// Response for `GET /destinations`
#[derive(Debug, Serialize)]
pub struct DestinationListResponse {
    pub destinations: Vec<WebhookDestination>,
}

/// Response wrapping a single destination
#[derive(Debug, Serialize)]
pub struct DestinationResponse {
    pub destination: WebhookDestination,
}

/// Response for `DELETE /destinations/{id}`
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub healthy: bool,
    pub version: String,
    pub uptime_seconds: u64,
    pub destinations: usize,
}
