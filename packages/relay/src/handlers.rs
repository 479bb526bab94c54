use crate::error::{AppError, AppResult};
use crate::models::{
    DeleteResponse, DestinationListResponse, DestinationResponse, HealthResponse,
    IdempotencyMetadata, NewDestination, UpdateDestination, WebhookAck,
};
use crate::signature;
use crate::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{Duration, Utc};
use std::time::Instant;
use tracing::{info, instrument};

/// Extract real client IP address from request headers
fn extract_ip_address(req: &HttpRequest) -> String {
    // Priority: X-Real-IP > X-Forwarded-For (first IP) > peer address
    if let Some(real_ip) = req.headers().get("X-Real-IP") {
        if let Ok(ip) = real_ip.to_str() {
            return ip.to_string();
        }
    }

    if let Some(forwarded) = req.headers().get("X-Forwarded-For") {
        if let Ok(ips) = forwarded.to_str() {
            if let Some(first_ip) = ips.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Health check endpoint
#[instrument(skip(state))]
pub async fn health_check_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let healthy = state.metrics.is_healthy().await;

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        destinations: state.registry.count().await,
    };

    Ok(HttpResponse::Ok().json(response))
}

/// Metrics snapshot endpoint
#[instrument(skip(state))]
pub async fn metrics_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.metrics.snapshot().await))
}

/// Inbound provider webhook endpoint.
///
/// The raw body is kept unparsed until the signature is verified.
/// Pipeline: rate limit, verify, dedup, fan out, record metrics.
#[instrument(skip(state, req, body))]
pub async fn receive_webhook_handler(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let started = Instant::now();
    let settings = &state.settings;

    let signature_header = req
        .headers()
        .get(signature::SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    // Rate limit by signature value when present, client IP otherwise
    let identifier = signature_header
        .map(str::to_string)
        .unwrap_or_else(|| extract_ip_address(&req));
    let decision = state
        .rate_limiter
        .check(
            &identifier,
            settings.rate_limit.max_requests,
            Duration::seconds(settings.rate_limit.window_secs as i64),
        )
        .await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            reset_time: decision.reset_time,
        });
    }

    let signature_header = signature_header.ok_or_else(|| {
        AppError::Signature(format!("missing {} header", signature::SIGNATURE_HEADER))
    })?;

    let event = signature::verify(
        &body,
        signature_header,
        &settings.provider.webhook_secret,
        settings.provider.signature_tolerance_secs,
        Utc::now().timestamp(),
    )?;

    let metadata = IdempotencyMetadata::for_event(&event);

    if !state.seen_keys.insert(&metadata.idempotency_key).await {
        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Duplicate delivery acknowledged without forwarding"
        );
        return Ok(HttpResponse::Ok().json(WebhookAck {
            received: true,
            event_id: event.id,
            event_type: event.event_type,
            duplicate: true,
            forwarding_results: Vec::new(),
        }));
    }

    let destinations = state.registry.list().await;
    let results = state
        .forwarder
        .forward_to_all(&destinations, &event, &metadata)
        .await;

    let success = results.iter().all(|r| r.success);
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    state
        .metrics
        .record(&event.event_type, success, elapsed_ms)
        .await;

    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        destinations = results.len(),
        success,
        "Processed webhook event"
    );

    Ok(HttpResponse::Ok().json(WebhookAck {
        received: true,
        event_id: event.id,
        event_type: event.event_type,
        duplicate: false,
        forwarding_results: results,
    }))
}

/// List all configured destinations
#[instrument(skip(state))]
pub async fn list_destinations_handler(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(DestinationListResponse {
        destinations: state.registry.list().await,
    }))
}

/// Create a destination
#[instrument(skip(state, payload))]
pub async fn create_destination_handler(
    payload: web::Json<NewDestination>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let destination = state.registry.add(payload.into_inner()).await?;

    info!(
        destination_id = %destination.id,
        name = %destination.name,
        url = %destination.url,
        "Created destination"
    );

    Ok(HttpResponse::Created().json(DestinationResponse { destination }))
}

/// Fetch one destination by id
#[instrument(skip(state))]
pub async fn get_destination_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let destination = state
        .registry
        .get_by_id(&id)
        .await
        .ok_or(AppError::NotFound(id))?;

    Ok(HttpResponse::Ok().json(DestinationResponse { destination }))
}

/// Partially update a destination
#[instrument(skip(state, payload))]
pub async fn update_destination_handler(
    path: web::Path<String>,
    payload: web::Json<UpdateDestination>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let destination = state.registry.update(&id, payload.into_inner()).await?;

    info!(destination_id = %destination.id, "Updated destination");

    Ok(HttpResponse::Ok().json(DestinationResponse { destination }))
}

/// Remove a destination
#[instrument(skip(state))]
pub async fn delete_destination_handler(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    if !state.registry.remove(&id).await {
        return Err(AppError::NotFound(id));
    }

    info!(destination_id = %id, "Deleted destination");

    Ok(HttpResponse::Ok().json(DeleteResponse { success: true }))
}

/// Route table, shared between the server and the endpoint tests
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/webhook", web::post().to(receive_webhook_handler))
        .service(
            web::resource("/destinations")
                .route(web::get().to(list_destinations_handler))
                .route(web::post().to(create_destination_handler)),
        )
        .service(
            web::resource("/destinations/{id}")
                .route(web::get().to(get_destination_handler))
                .route(web::patch().to(update_destination_handler))
                .route(web::delete().to(delete_destination_handler)),
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ForwardingSettings, ProviderSettings, RateLimitSettings, ServerSettings, Settings,
    };
    use crate::forwarder::Forwarder;
    use crate::idempotency::SeenKeys;
    use crate::metrics::MetricsTracker;
    use crate::rate_limit::RateLimiter;
    use crate::registry::DestinationRegistry;
    use actix_web::{test, App};
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "whsec_test_secret";

    fn test_settings(max_requests: u32) -> Settings {
        Settings {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 0,
                max_body_size: 1_048_576,
                cors_allowed_origins: "*".to_string(),
            },
            provider: ProviderSettings {
                webhook_secret: SECRET.to_string(),
                signature_tolerance_secs: 300,
            },
            forwarding: ForwardingSettings {
                request_timeout_secs: 5,
                backoff_base_ms: 1,
                backoff_max_ms: 5,
            },
            rate_limit: RateLimitSettings {
                max_requests,
                window_secs: 60,
            },
        }
    }

    fn test_state(max_requests: u32) -> web::Data<AppState> {
        let settings = Arc::new(test_settings(max_requests));
        web::Data::new(AppState {
            forwarder: Arc::new(
                Forwarder::new(&settings.forwarding).expect("client build failed"),
            ),
            registry: Arc::new(DestinationRegistry::new()),
            metrics: Arc::new(MetricsTracker::new()),
            rate_limiter: Arc::new(RateLimiter::new()),
            seen_keys: Arc::new(SeenKeys::new(1024, Duration::hours(24))),
            settings,
            started_at: Instant::now(),
        })
    }

    macro_rules! test_app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state).configure(configure_routes)).await
        };
    }

    fn signed_event_body() -> (Vec<u8>, String) {
        let body = serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "createdAt": Utc::now().timestamp(),
            "apiVersion": "2024-06-20",
            "payload": { "amount": 4200 }
        })
        .to_string()
        .into_bytes();
        let header = signature::sign(&body, SECRET, Utc::now().timestamp());
        (body, header)
    }

    fn new_destination(name: &str, url: &str, event_types: Vec<&str>) -> NewDestination {
        NewDestination {
            name: Some(name.to_string()),
            url: Some(url.to_string()),
            active: None,
            event_types: Some(event_types.into_iter().map(str::to_string).collect()),
            secret: None,
            headers: None,
            retry_count: Some(0),
        }
    }

    #[actix_web::test]
    async fn signed_event_fans_out_to_subscribed_destination() {
        let subscribed = MockServer::start().await;
        let unsubscribed = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&subscribed)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&unsubscribed)
            .await;

        let state = test_state(100);
        state
            .registry
            .add(new_destination(
                "payments",
                &subscribed.uri(),
                vec!["payment_intent.succeeded"],
            ))
            .await
            .expect("add failed");
        state
            .registry
            .add(new_destination(
                "subscriptions",
                &unsubscribed.uri(),
                vec!["customer.subscription.created"],
            ))
            .await
            .expect("add failed");

        let app = test_app!(state.clone());
        let (body, header) = signed_event_body();
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/webhook")
                .insert_header((signature::SIGNATURE_HEADER, header))
                .set_payload(body)
                .to_request(),
        )
        .await;

        assert_eq!(response.status(), 200);
        let ack: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(ack["received"], true);
        assert_eq!(ack["eventId"], "evt_1");
        assert_eq!(ack["eventType"], "payment_intent.succeeded");
        let results = ack["forwardingResults"].as_array().expect("not an array");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["destination"]["name"], "payments");
        assert_eq!(results[0]["success"], true);

        let metrics = state.metrics.snapshot().await;
        assert_eq!(metrics.total_events, 1);
        assert_eq!(metrics.successful_events, 1);
    }

    #[actix_web::test]
    async fn bad_digest_is_rejected_without_forwarding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let state = test_state(100);
        state
            .registry
            .add(new_destination("payments", &server.uri(), vec![]))
            .await
            .expect("add failed");

        let app = test_app!(state.clone());
        let (body, _) = signed_event_body();
        let forged = format!("t={},v1={}", Utc::now().timestamp(), "00".repeat(32));
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/webhook")
                .insert_header((signature::SIGNATURE_HEADER, forged))
                .set_payload(body)
                .to_request(),
        )
        .await;

        assert_eq!(response.status(), 400);
        let error: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(error["error"], "invalid_signature");

        let metrics = state.metrics.snapshot().await;
        assert_eq!(metrics.total_events, 0);
    }

    #[actix_web::test]
    async fn missing_signature_header_is_rejected() {
        let state = test_state(100);
        let app = test_app!(state);

        let (body, _) = signed_event_body();
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/webhook")
                .set_payload(body)
                .to_request(),
        )
        .await;

        assert_eq!(response.status(), 400);
    }

    #[actix_web::test]
    async fn duplicate_delivery_is_acknowledged_without_forwarding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let state = test_state(100);
        state
            .registry
            .add(new_destination("payments", &server.uri(), vec![]))
            .await
            .expect("add failed");

        let app = test_app!(state.clone());
        let (body, header) = signed_event_body();

        for expected_duplicate in [false, true] {
            let response = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri("/webhook")
                    .insert_header((signature::SIGNATURE_HEADER, header.clone()))
                    .set_payload(body.clone())
                    .to_request(),
            )
            .await;

            assert_eq!(response.status(), 200);
            let ack: serde_json::Value = test::read_body_json(response).await;
            assert_eq!(ack["duplicate"], expected_duplicate);
        }

        // Only the first delivery reached metrics
        assert_eq!(state.metrics.snapshot().await.total_events, 1);
    }

    #[actix_web::test]
    async fn rate_limited_caller_receives_429() {
        let state = test_state(1);
        let app = test_app!(state);

        let (body, header) = signed_event_body();
        let first = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/webhook")
                .insert_header((signature::SIGNATURE_HEADER, header.clone()))
                .set_payload(body.clone())
                .to_request(),
        )
        .await;
        assert_eq!(first.status(), 200);

        let second = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/webhook")
                .insert_header((signature::SIGNATURE_HEADER, header))
                .set_payload(body)
                .to_request(),
        )
        .await;
        assert_eq!(second.status(), 429);
        let error: serde_json::Value = test::read_body_json(second).await;
        assert_eq!(error["error"], "rate_limit_exceeded");
        assert!(error["resetTime"].is_string());
    }

    #[actix_web::test]
    async fn destination_crud_round_trip() {
        let state = test_state(100);
        let app = test_app!(state);

        // Create
        let created = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/destinations")
                .set_json(serde_json::json!({
                    "name": "billing",
                    "url": "https://example.com/hooks",
                    "eventTypes": ["payment_intent.succeeded"]
                }))
                .to_request(),
        )
        .await;
        assert_eq!(created.status(), 201);
        let created: serde_json::Value = test::read_body_json(created).await;
        let id = created["destination"]["id"].as_str().expect("no id").to_string();
        assert!(!id.is_empty());
        assert_eq!(created["destination"]["retryCount"], 3);

        // List
        let listed = test::call_service(
            &app,
            test::TestRequest::get().uri("/destinations").to_request(),
        )
        .await;
        assert_eq!(listed.status(), 200);
        let listed: serde_json::Value = test::read_body_json(listed).await;
        assert_eq!(listed["destinations"].as_array().expect("no list").len(), 1);

        // Patch; a caller-supplied id is ignored
        let patched = test::call_service(
            &app,
            test::TestRequest::patch()
                .uri(&format!("/destinations/{id}"))
                .set_json(serde_json::json!({ "id": "dst_forged", "name": "billing-v2" }))
                .to_request(),
        )
        .await;
        assert_eq!(patched.status(), 200);
        let patched: serde_json::Value = test::read_body_json(patched).await;
        assert_eq!(patched["destination"]["id"], id.as_str());
        assert_eq!(patched["destination"]["name"], "billing-v2");

        // Delete, then fetch is a 404
        let deleted = test::call_service(
            &app,
            test::TestRequest::delete()
                .uri(&format!("/destinations/{id}"))
                .to_request(),
        )
        .await;
        assert_eq!(deleted.status(), 200);
        let deleted: serde_json::Value = test::read_body_json(deleted).await;
        assert_eq!(deleted["success"], true);

        let missing = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/destinations/{id}"))
                .to_request(),
        )
        .await;
        assert_eq!(missing.status(), 404);
    }

    #[actix_web::test]
    async fn create_destination_without_url_is_rejected() {
        let state = test_state(100);
        let app = test_app!(state);

        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/destinations")
                .set_json(serde_json::json!({ "name": "billing" }))
                .to_request(),
        )
        .await;

        assert_eq!(response.status(), 400);
        let error: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(error["error"], "validation_error");
    }

    #[actix_web::test]
    async fn health_reports_destination_count() {
        let state = test_state(100);
        state
            .registry
            .add(new_destination("billing", "https://example.com", vec![]))
            .await
            .expect("add failed");

        let app = test_app!(state);
        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/health").to_request(),
        )
        .await;

        assert_eq!(response.status(), 200);
        let health: serde_json::Value = test::read_body_json(response).await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["destinations"], 1);
    }
}
