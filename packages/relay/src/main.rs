mod config;
mod error;
mod forwarder;
mod handlers;
mod idempotency;
mod metrics;
mod models;
mod rate_limit;
mod registry;
mod signature;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_actix_web::TracingLogger;

use crate::config::Settings;
use crate::forwarder::Forwarder;
use crate::idempotency::SeenKeys;
use crate::metrics::MetricsTracker;
use crate::rate_limit::RateLimiter;
use crate::registry::DestinationRegistry;

/// Recently-seen idempotency keys kept for dedup
const SEEN_KEYS_CAPACITY: usize = 10_000;
/// How long a seen key suppresses duplicate deliveries
const SEEN_KEYS_TTL_HOURS: i64 = 24;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<DestinationRegistry>,
    pub forwarder: Arc<Forwarder>,
    pub metrics: Arc<MetricsTracker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub seen_keys: Arc<SeenKeys>,
    pub started_at: Instant,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if exists)
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    // Load configuration
    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load settings: {}", e);
        e
    })?;
    let settings = Arc::new(settings);

    info!(
        server_host = %settings.server.host,
        server_port = %settings.server.port,
        rate_limit_max = settings.rate_limit.max_requests,
        signature_tolerance_secs = settings.provider.signature_tolerance_secs,
        "Starting webhook relay server"
    );

    let registry = Arc::new(DestinationRegistry::new());
    let forwarder = Arc::new(Forwarder::new(&settings.forwarding)?);
    let metrics = Arc::new(MetricsTracker::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let seen_keys = Arc::new(SeenKeys::new(
        SEEN_KEYS_CAPACITY,
        chrono::Duration::hours(SEEN_KEYS_TTL_HOURS),
    ));

    // Create shared application state
    let app_state = web::Data::new(AppState {
        settings: settings.clone(),
        registry,
        forwarder,
        metrics: metrics.clone(),
        rate_limiter: rate_limiter.clone(),
        seen_keys,
        started_at: Instant::now(),
    });

    // Spawn background task for maintenance (rate-limit sweep + health log)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let removed = rate_limiter.sweep().await;
            let tracked = rate_limiter.tracked_identifiers().await;
            debug!(
                removed = removed,
                tracked_identifiers = tracked,
                "Maintenance: rate-limit window sweep completed"
            );

            if !metrics.is_healthy().await {
                let snapshot = metrics.snapshot().await;
                warn!(
                    total_events = snapshot.total_events,
                    failed_events = snapshot.failed_events,
                    "Maintenance: pipeline is unhealthy"
                );
            }
        }
    });

    // Start HTTP server
    let server_host = settings.server.host.clone();
    let server_port = settings.server.port;
    let cors_origins = settings.server.cors_allowed_origins.clone();

    info!("Binding to {}:{}", server_host, server_port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = build_cors(&cors_origins);

        App::new()
            .app_data(app_state.clone())
            .app_data(web::PayloadConfig::new(settings.server.max_body_size))
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(handlers::configure_routes)
    })
    .bind((server_host.as_str(), server_port))
    .map_err(|e| {
        eprintln!("Failed to bind to {}:{}: {}", server_host, server_port, e);
        anyhow::anyhow!("Failed to bind server: {}", e)
    })?
    .workers(num_cpus::get())
    .shutdown_timeout(30)
    .run()
    .await
    .map_err(|e| {
        eprintln!("Server error: {}", e);
        anyhow::anyhow!("Server error: {}", e)
    })?;

    info!("Server shutting down");
    Ok(())
}

/// Initialize tracing/logging subscriber
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Build CORS configuration
fn build_cors(allowed_origins: &str) -> Cors {
    if allowed_origins == "*" {
        Cors::permissive()
    } else {
        let origins: Vec<&str> = allowed_origins.split(',').map(|s| s.trim()).collect();
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
            .allowed_headers(vec![
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
            ])
            .max_age(3600);

        for origin in origins {
            cors = cors.allowed_origin(origin);
        }

        cors
    }
}
