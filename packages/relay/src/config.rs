use std::env;
use std::fmt;

use crate::error::AppError;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    pub forwarding: ForwardingSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_body_size: usize,
    pub cors_allowed_origins: String,
}

#[derive(Clone)]
pub struct ProviderSettings {
    /// Shared secret for verifying inbound provider signatures
    pub webhook_secret: String,
    /// Replay tolerance for signature timestamps, in seconds
    pub signature_tolerance_secs: i64,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("webhook_secret", &"<redacted>")
            .field("signature_tolerance_secs", &self.signature_tolerance_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ForwardingSettings {
    /// Per-attempt timeout for outbound deliveries, in seconds
    pub request_timeout_secs: u64,
    /// Base delay between retries; doubles per attempt
    pub backoff_base_ms: u64,
    /// Upper bound for the backoff delay
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Settings {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, AppError> {
        let webhook_secret = env::var("WEBHOOK_SECRET").unwrap_or_default();
        if webhook_secret.trim().is_empty() {
            return Err(AppError::Configuration(
                "WEBHOOK_SECRET must be set to the provider's signing secret".to_string(),
            ));
        }

        let settings = Settings {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .unwrap_or(8080),
                max_body_size: env::var("MAX_BODY_SIZE")
                    .unwrap_or_else(|_| "1048576".to_string())
                    .parse()
                    .unwrap_or(1_048_576), // 1 MB
                cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "*".to_string()),
            },
            provider: ProviderSettings {
                webhook_secret,
                signature_tolerance_secs: env::var("SIGNATURE_TOLERANCE")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300), // 5 minutes
            },
            forwarding: ForwardingSettings {
                request_timeout_secs: env::var("FORWARD_TIMEOUT")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                backoff_base_ms: env::var("FORWARD_BACKOFF_BASE_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
                backoff_max_ms: env::var("FORWARD_BACKOFF_MAX_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30_000), // 30 seconds
            },
            rate_limit: RateLimitSettings {
                max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
                window_secs: env::var("RATE_LIMIT_WINDOW")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            },
        };

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_settings_debug_redacts_secret() {
        let provider = ProviderSettings {
            webhook_secret: "whsec_test_secret".to_string(),
            signature_tolerance_secs: 300,
        };
        let printed = format!("{provider:?}");
        assert!(!printed.contains("whsec_test_secret"));
        assert!(printed.contains("<redacted>"));
    }
}
