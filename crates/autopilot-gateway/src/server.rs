//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use autopilot_core::config::AutopilotConfig;
use autopilot_db::Store;
use autopilot_scheduler::{HttpWorkflowDispatcher, WorkflowDispatcher, spawn_scheduler};
use autopilot_security::SharedSecret;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::deliverability::DeliverabilityMonitor;
use crate::ledger::ResendLimiter;
use crate::routes;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: AutopilotConfig,
    pub store: Arc<Store>,
    /// Hands due actions to the workflow engine.
    pub dispatcher: Arc<dyn WorkflowDispatcher>,
    pub cron_secret: SharedSecret,
    pub dispatch_secret: SharedSecret,
    pub monitor: DeliverabilityMonitor,
    pub resend_limiter: ResendLimiter,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AutopilotConfig, store: Arc<Store>, dispatcher: Arc<dyn WorkflowDispatcher>) -> Self {
        Self {
            cron_secret: SharedSecret::new(config.secrets.cron_secret.clone()),
            dispatch_secret: SharedSecret::new(config.secrets.dispatch_secret.clone()),
            monitor: DeliverabilityMonitor::new(&config.deliverability),
            resend_limiter: ResendLimiter::new(&config.ledger),
            start_time: Instant::now(),
            config,
            store,
            dispatcher,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(shared: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(shared.config.gateway.request_timeout_secs.max(1));

    // Shared-secret and signed callers
    let system = Router::new()
        .route("/api/v1/autopilot/tick", post(routes::autopilot_tick))
        .route("/api/v1/autopilot/dispatch", post(routes::autopilot_dispatch))
        .route("/api/v1/autopilot/report", post(routes::autopilot_report))
        .route("/api/v1/webhooks/email-events", post(routes::email_events));

    // Session callers
    let user = Router::new()
        .route(
            "/api/v1/activity",
            get(routes::list_activity).post(routes::create_activity),
        )
        .route("/api/v1/campaigns/{id}/pause", post(routes::pause_campaign))
        .route("/api/v1/campaigns/{id}/resume", post(routes::resume_campaign))
        .route(
            "/api/v1/campaigns/{id}/deliverability",
            get(routes::campaign_deliverability),
        )
        .route(
            "/api/v1/campaigns/{id}/verification/resend",
            post(routes::verification_resend),
        );

    Router::new()
        .route("/health", get(routes::health_check))
        .merge(system)
        .merge(user)
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::OPTIONS])
                .allow_headers(Any)
                .max_age(Duration::from_secs(3600));

            // Example: AUTOPILOT_CORS_ORIGINS=https://app.example.com,https://admin.example.com
            if let Ok(origins_str) = std::env::var("AUTOPILOT_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server, and the in-process scheduler when enabled.
pub async fn start(config: AutopilotConfig) -> anyhow::Result<()> {
    let db_path = config.database_path();
    let store = Arc::new(Store::open(&db_path)?);
    tracing::info!("💾 Database opened at {}", db_path.display());

    let dispatcher: Arc<dyn WorkflowDispatcher> = Arc::new(HttpWorkflowDispatcher::new(&config.workflow)?);

    for (name, value) in [
        ("cron_secret", &config.secrets.cron_secret),
        ("dispatch_secret", &config.secrets.dispatch_secret),
        ("email_webhook_secret", &config.secrets.email_webhook_secret),
    ] {
        if value.trim().is_empty() {
            tracing::warn!("⚠️ secrets.{name} is not set; its endpoint will refuse every call");
        }
    }

    if config.scheduler.enabled {
        tokio::spawn(spawn_scheduler(
            store.clone(),
            dispatcher.clone(),
            config.scheduler.interval_secs,
        ));
    } else {
        tracing::info!("⏸️ In-process scheduler disabled; waiting for external ticks");
    }

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(AppState::new(config, store, dispatcher));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use autopilot_core::action::{UsageCounter, UsageCounters};
    use autopilot_db::{CampaignDraft, NewUser};
    use autopilot_security::WebhookVerifier;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use tower::ServiceExt;

    fn seed(state: &AppState) -> String {
        state
            .store
            .create_user(&NewUser {
                id: Some("u1".into()),
                email: "owner@example.com".into(),
                usage: UsageCounters {
                    posts: UsageCounter::new(0, 10),
                    emails: UsageCounter::new(0, 100),
                    ..Default::default()
                },
                ..Default::default()
            })
            .unwrap();
        let mut draft = CampaignDraft::new("u1", "launch");
        draft.id = Some("c1".into());
        draft.content_platforms.insert("twitter".into(), true);
        state.store.create_campaign(&draft).unwrap();
        state.store.upsert_connected_platform("u1", "twitter", true).unwrap();
        state
            .store
            .create_session("u1", chrono::Duration::hours(1))
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn signed_event(body: &str, secret: &str) -> Request<Body> {
        let verifier = WebhookVerifier::new(secret, 300).unwrap();
        let ts = Utc::now().timestamp();
        let signature = verifier.sign("msg_1", ts, body.as_bytes());
        Request::builder()
            .method("POST")
            .uri("/api/v1/webhooks/email-events")
            .header("svix-id", "msg_1")
            .header("svix-timestamp", ts.to_string())
            .header("svix-signature", signature)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = build_router(test_state());
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, json) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_tick_requires_cron_secret() {
        let state = test_state();
        seed(&state);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/autopilot/tick")
            .header(header::AUTHORIZATION, format!("Bearer {DISPATCH_SECRET}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(build_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/autopilot/tick")
            .header(header::AUTHORIZATION, format!("Bearer {CRON_SECRET}"))
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(build_router(state), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["evaluated"], 1);
        // Posts and outreach have headroom and no clock yet; videos do not.
        assert_eq!(json["dispatched"], 2);
    }

    #[tokio::test]
    async fn test_unconfigured_secret_is_server_error() {
        let mut config = test_config();
        config.secrets.cron_secret = "  ".into();
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/autopilot/tick")
            .header(header::AUTHORIZATION, "Bearer anything")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(build_router(state_with(config)), req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["ok"], false);
    }

    #[tokio::test]
    async fn test_signed_bounce_updates_lead() {
        let state = test_state();
        seed(&state);
        let lead = state
            .store
            .record_outreach_send("u1", "c1", "Lead@Example.com", Utc::now())
            .unwrap();

        let body = r#"{"type":"email.bounced","data":{"to":["lead@example.com"]}}"#;
        let (status, json) = send(build_router(state.clone()), signed_event(body, WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["matched"], 1);
        assert_eq!(json["transitioned"], 1);

        let stored = state.store.get_lead(&lead.id).unwrap().unwrap();
        assert_eq!(stored.status.as_str(), "bounced");
        // A single send that bounced is a 100% bounce rate.
        let campaign = state.store.get_campaign("c1").unwrap().unwrap();
        assert!(campaign.is_paused);
    }

    #[tokio::test]
    async fn test_outreach_report_feeds_bounce_pause() {
        let state = test_state();
        seed(&state);

        let report = r#"{"userId":"u1","campaignId":"c1","action":"outreach","result":"success","recipients":["Lead@Example.com"]}"#;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/autopilot/report")
            .header(header::AUTHORIZATION, format!("Bearer {DISPATCH_SECRET}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(report))
            .unwrap();
        let (status, json) = send(build_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["leadsRecorded"], 1);

        let body = r#"{"type":"email.bounced","data":{"to":["lead@example.com"]}}"#;
        let (status, json) = send(build_router(state.clone()), signed_event(body, WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["matched"], 1);
        assert_eq!(json["transitioned"], 1);
        assert_eq!(json["paused"][0], "c1");

        let campaign = state.store.get_campaign("c1").unwrap().unwrap();
        assert!(campaign.is_paused);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let state = test_state();
        let body = r#"{"type":"email.bounced","data":{"to":["x@example.com"]}}"#;
        let other = "whsec_b3RoZXItc2lnbmluZy1rZXktOTg3NjU0MzIxMA==";
        let (status, _) = send(build_router(state), signed_event(body, other)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhook_without_secret_is_server_error() {
        let mut config = test_config();
        config.secrets.email_webhook_secret = String::new();
        let body = r#"{"type":"email.delivered","data":{"to":["x@example.com"]}}"#;
        let (status, _) = send(
            build_router(state_with(config)),
            signed_event(body, WEBHOOK_SECRET),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_session_routes() {
        let state = test_state();
        let token = seed(&state);

        let req = Request::builder()
            .uri("/api/v1/activity")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(build_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/campaigns/c1/pause")
            .header(header::COOKIE, format!("autopilot_session={token}"))
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(build_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["changed"], true);

        let req = Request::builder()
            .uri("/api/v1/activity?campaignId=c1")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(build_router(state.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["activity"][0]["actionType"], "pause");

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/campaigns/nope/resume")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(build_router(state), req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resend_rate_limit() {
        let state = test_state();
        let token = seed(&state);
        let resend = || {
            Request::builder()
                .method("POST")
                .uri("/api/v1/campaigns/c1/verification/resend")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };
        for _ in 0..3 {
            let (status, _) = send(build_router(state.clone()), resend()).await;
            assert_eq!(status, StatusCode::OK);
        }
        let resp = build_router(state).oneshot(resend()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));
    }
}
