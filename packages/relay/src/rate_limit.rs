use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::models::RateLimitDecision;

/// Per-identifier sliding window state
#[derive(Debug, Clone)]
struct RateLimitRecord {
    count: u32,
    reset_time: DateTime<Utc>,
}

/// Sliding-window request limiter keyed by caller identifier.
///
/// Advisory protection only: `check` is infallible and the limiter
/// fails open, so a limiter problem can never block provider traffic.
pub struct RateLimiter {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Identifiers that look like emails get their own namespace so an
    /// address and an IP with the same text never share a window.
    fn namespaced(identifier: &str) -> String {
        if identifier.contains('@') {
            format!("email:{identifier}")
        } else {
            format!("ip:{identifier}")
        }
    }

    /// Count a request against the identifier's current window.
    ///
    /// The request is counted before the limit test: a fresh window
    /// starts at count 1 and allows while `count <= max_requests`.
    /// Denied requests do not grow the counter, so a flooded window
    /// stays bounded.
    pub async fn check(
        &self,
        identifier: &str,
        max_requests: u32,
        window: Duration,
    ) -> RateLimitDecision {
        let now = Utc::now();
        let mut records = self.records.lock().await;

        let record = records
            .entry(Self::namespaced(identifier))
            .or_insert_with(|| RateLimitRecord {
                count: 0,
                reset_time: now + window,
            });

        if record.reset_time <= now {
            record.count = 0;
            record.reset_time = now + window;
        }

        if record.count < max_requests {
            record.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: max_requests - record.count,
                reset_time: record.reset_time,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time: record.reset_time,
            }
        }
    }

    /// Evict records whose window has passed. Returns the number removed.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| record.reset_time > now);
        before - records.len()
    }

    pub async fn tracked_identifiers(&self) -> usize {
        self.records.lock().await.len()
    }
}
