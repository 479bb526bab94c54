use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{NewDestination, UpdateDestination, WebhookDestination};

/// Default delivery retries for a new destination
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// In-memory store of forwarding destinations.
///
/// Insertion order is preserved for listing and fan-out. All mutations
/// go through the write lock, so concurrent add/update/remove calls are
/// linearizable with reads.
pub struct DestinationRegistry {
    destinations: RwLock<Vec<WebhookDestination>>,
}

impl DestinationRegistry {
    pub fn new() -> Self {
        Self {
            destinations: RwLock::new(Vec::new()),
        }
    }

    pub async fn list(&self) -> Vec<WebhookDestination> {
        self.destinations.read().await.clone()
    }

    /// Validate and store a new destination, assigning it a fresh id.
    pub async fn add(&self, spec: NewDestination) -> Result<WebhookDestination, AppError> {
        let name = spec.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Err(AppError::Validation(
                "destination name is required".to_string(),
            ));
        }
        let url = spec.url.as_deref().map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(AppError::Validation(
                "destination url is required".to_string(),
            ));
        }
        validate_url(url)?;

        let destination = WebhookDestination {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            active: spec.active.unwrap_or(true),
            event_types: spec.event_types.unwrap_or_default(),
            secret: spec.secret,
            headers: spec.headers.unwrap_or_default(),
            retry_count: spec.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            created_at: Utc::now(),
        };

        self.destinations.write().await.push(destination.clone());
        Ok(destination)
    }

    pub async fn get_by_id(&self, id: &str) -> Option<WebhookDestination> {
        self.destinations
            .read()
            .await
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Merge the provided fields into an existing destination.
    ///
    /// The id is immutable; a changed url is re-validated before the
    /// record is touched.
    pub async fn update(
        &self,
        id: &str,
        patch: UpdateDestination,
    ) -> Result<WebhookDestination, AppError> {
        if let Some(url) = patch.url.as_deref() {
            let url = url.trim();
            if url.is_empty() {
                return Err(AppError::Validation(
                    "destination url must not be empty".to_string(),
                ));
            }
            validate_url(url)?;
        }
        if let Some(name) = patch.name.as_deref() {
            if name.trim().is_empty() {
                return Err(AppError::Validation(
                    "destination name must not be empty".to_string(),
                ));
            }
        }

        let mut destinations = self.destinations.write().await;
        let destination = destinations
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        if let Some(name) = patch.name {
            destination.name = name.trim().to_string();
        }
        if let Some(url) = patch.url {
            destination.url = url.trim().to_string();
        }
        if let Some(active) = patch.active {
            destination.active = active;
        }
        if let Some(event_types) = patch.event_types {
            destination.event_types = event_types;
        }
        if let Some(secret) = patch.secret {
            destination.secret = Some(secret);
        }
        if let Some(headers) = patch.headers {
            destination.headers = headers;
        }
        if let Some(retry_count) = patch.retry_count {
            destination.retry_count = retry_count;
        }

        Ok(destination.clone())
    }

    /// Remove a destination. Returns true when a record existed.
    pub async fn remove(&self, id: &str) -> bool {
        let mut destinations = self.destinations.write().await;
        let before = destinations.len();
        destinations.retain(|d| d.id != id);
        destinations.len() != before
    }

    pub async fn count(&self) -> usize {
        self.destinations.read().await.len()
    }
}

/// Require an absolute http(s) URL with a host.
fn validate_url(raw: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| AppError::Validation(format!("invalid destination url: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "unsupported url scheme: {scheme}"
            )));
        }
    }

    if parsed.host_str().is_none() {
        return Err(AppError::Validation(
            "destination url must have a host".to_string(),
        ));
    }

    Ok(())
}
