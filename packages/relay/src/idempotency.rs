use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use tokio::sync::Mutex;

use crate::models::{IdempotencyMetadata, WebhookEvent};

/// Derive a stable deduplication key for an event.
///
/// Pure function of the event id and type; the payload does not
/// participate, so redeliveries with a mutated payload still collapse
/// onto the same key.
pub fn derive_key(event: &WebhookEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.id.as_bytes());
    hasher.update(b".");
    hasher.update(event.event_type.as_bytes());
    format!("idem_{}", hex::encode(hasher.finalize()))
}

impl IdempotencyMetadata {
    /// Build the forwarding metadata for an inbound event
    pub fn for_event(event: &WebhookEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.created_at,
            api_version: event.api_version.clone(),
            idempotency_key: derive_key(event),
        }
    }
}

/// Bounded in-process set of recently seen idempotency keys.
///
/// Entries expire after `ttl` and the oldest entry is evicted once
/// `capacity` is reached. Dedup is best-effort: keys do not survive a
/// process restart, so destinations must still tolerate rare replays.
pub struct SeenKeys {
    inner: Mutex<SeenKeysInner>,
    capacity: usize,
    ttl: Duration,
}

struct SeenKeysInner {
    keys: HashSet<String>,
    order: VecDeque<(String, DateTime<Utc>)>,
}

impl SeenKeys {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(SeenKeysInner {
                keys: HashSet::new(),
                order: VecDeque::new(),
            }),
            capacity,
            ttl,
        }
    }

    /// Record a key. Returns false when the key was already present and
    /// unexpired, i.e. the event is a duplicate delivery.
    pub async fn insert(&self, key: &str) -> bool {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        while inner
            .order
            .front()
            .is_some_and(|(_, seen_at)| now.signed_duration_since(*seen_at) > self.ttl)
        {
            if let Some((expired, _)) = inner.order.pop_front() {
                inner.keys.remove(&expired);
            }
        }

        if inner.keys.contains(key) {
            return false;
        }

        if inner.keys.len() >= self.capacity {
            if let Some((oldest, _)) = inner.order.pop_front() {
                inner.keys.remove(&oldest);
            }
        }

        inner.keys.insert(key.to_string());
        inner.order.push_back((key.to_string(), now));
        true
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.keys.len()
    }
}
