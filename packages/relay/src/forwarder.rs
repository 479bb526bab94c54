use chrono::Utc;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ForwardingSettings;
use crate::error::AppError;
use crate::models::{
    DestinationRef, ForwardingResult, IdempotencyMetadata, WebhookDestination, WebhookEvent,
};
use crate::signature;

/// Signature header attached to deliveries for destinations with a secret
pub const OUTBOUND_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Body serialized once per event and POSTed to every selected destination
#[derive(Serialize)]
struct OutboundBody<'a> {
    event: &'a WebhookEvent,
    metadata: &'a IdempotencyMetadata,
}

/// Fans a verified event out to the selected destinations.
///
/// Holds the shared HTTP client; per-destination retry and backoff state
/// lives on the stack of each delivery future.
pub struct Forwarder {
    client: Client,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl Forwarder {
    pub fn new(settings: &ForwardingSettings) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!("relay/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
        })
    }

    /// Deliver an event to every active destination subscribed to its type.
    ///
    /// Deliveries run concurrently and are all joined before returning;
    /// the result order matches the selection order, and one failing
    /// destination never affects the others.
    pub async fn forward_to_all(
        &self,
        destinations: &[WebhookDestination],
        event: &WebhookEvent,
        metadata: &IdempotencyMetadata,
    ) -> Vec<ForwardingResult> {
        let eligible: Vec<&WebhookDestination> = destinations
            .iter()
            .filter(|d| d.accepts(&event.event_type))
            .collect();

        if eligible.is_empty() {
            debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "No destinations subscribed to event type"
            );
            return Vec::new();
        }

        let body = match serde_json::to_vec(&OutboundBody { event, metadata }) {
            Ok(body) => body,
            Err(e) => {
                let message = format!("failed to serialize outbound payload: {e}");
                return eligible
                    .into_iter()
                    .map(|d| ForwardingResult {
                        destination: DestinationRef::from(d),
                        success: false,
                        message: message.clone(),
                        attempts: 0,
                    })
                    .collect();
            }
        };

        join_all(
            eligible
                .into_iter()
                .map(|destination| self.deliver(destination, &body, metadata)),
        )
        .await
    }

    /// Run the attempt loop for one destination.
    async fn deliver(
        &self,
        destination: &WebhookDestination,
        body: &[u8],
        metadata: &IdempotencyMetadata,
    ) -> ForwardingResult {
        let max_attempts = destination.retry_count + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(destination, body, metadata).await {
                Ok(status) => {
                    debug!(
                        destination_id = %destination.id,
                        event_id = %metadata.event_id,
                        status,
                        attempt,
                        "Delivery succeeded"
                    );
                    return ForwardingResult {
                        destination: DestinationRef::from(destination),
                        success: true,
                        message: format!("delivered with HTTP {status}"),
                        attempts: attempt,
                    };
                }
                Err(message) => {
                    warn!(
                        destination_id = %destination.id,
                        event_id = %metadata.event_id,
                        error = %message,
                        attempt,
                        max_attempts,
                        "Delivery attempt failed"
                    );
                    last_error = message;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        ForwardingResult {
            destination: DestinationRef::from(destination),
            success: false,
            message: last_error,
            attempts: max_attempts,
        }
    }

    /// Exponential backoff: base * 2^(attempt-1), capped at the maximum.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let millis = (self.backoff_base.as_millis() as u64).saturating_mul(1 << shift);
        Duration::from_millis(millis.min(self.backoff_max.as_millis() as u64))
    }

    /// One HTTP POST to a destination. Non-2xx statuses are failures.
    async fn attempt(
        &self,
        destination: &WebhookDestination,
        body: &[u8],
        metadata: &IdempotencyMetadata,
    ) -> Result<u16, String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = metadata.event_id.parse() {
            headers.insert("X-Event-Id", value);
        }
        if let Ok(value) = metadata.event_type.parse() {
            headers.insert("X-Event-Type", value);
        }
        if let Ok(value) = metadata.idempotency_key.parse() {
            headers.insert("X-Idempotency-Key", value);
        }

        // Custom headers override the defaults above
        for (name, value) in &destination.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            let Ok(value) = HeaderValue::from_str(value) else {
                continue;
            };
            headers.insert(name, value);
        }

        // The signature goes in last so custom headers can never mask it
        if let Some(secret) = &destination.secret {
            let signed = signature::sign(body, secret, Utc::now().timestamp());
            if let Ok(value) = signed.parse() {
                headers.insert(OUTBOUND_SIGNATURE_HEADER, value);
            }
        }

        let response = self
            .client
            .post(&destination.url)
            .headers(headers)
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    "request timed out".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    format!("request error: {e}")
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("HTTP {status}"))
        }
    }
}
