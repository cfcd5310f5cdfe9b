//! API route handlers for the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use autopilot_core::error::AutopilotError;
use autopilot_db::{Campaign, NewActivity};
use autopilot_scheduler::run_pass;
use autopilot_security::signature::{HEADER_ID, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use autopilot_security::{SecretCheck, SharedSecret, SignedHeaders, WebhookVerifier, presented_secret};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::authorize::{AuthorizeRequest, DispatchDecision, authorize};
use crate::deliverability::parse_notice;
use crate::ledger::{DispatchReport, ResendDecision, apply_report, record_best_effort};
use crate::server::AppState;
use crate::session::SessionUser;

pub const SECRET_HEADER: &str = "x-autopilot-secret";

/// JSON error response: `{ok: false, error}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AutopilotError> for ApiError {
    fn from(e: AutopilotError) -> Self {
        if !e.is_client_error() {
            tracing::error!("❌ Request failed: {e}");
            return Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
        match &e {
            AutopilotError::NotFound(_) => Self::not_found(e.to_string()),
            AutopilotError::Security(_) => Self::unauthorized(),
            _ => Self::bad_request(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"ok": false, "error": self.message}))).into_response()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn presented(headers: &HeaderMap) -> Option<&str> {
    presented_secret(
        header_str(headers, header::AUTHORIZATION.as_str()),
        header_str(headers, SECRET_HEADER),
    )
}

fn require_secret(secret: &SharedSecret, headers: &HeaderMap) -> Result<(), ApiError> {
    match secret.check(presented(headers)) {
        SecretCheck::Ok => Ok(()),
        SecretCheck::NotConfigured => {
            tracing::error!("❌ Endpoint called but its shared secret is not configured");
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "secret not configured"))
        }
        SecretCheck::Unauthorized => Err(ApiError::unauthorized()),
    }
}

fn owned_campaign(state: &AppState, user_id: &str, campaign_id: &str) -> Result<Campaign, ApiError> {
    state
        .store
        .campaign_for_user(user_id, Some(campaign_id))?
        .ok_or_else(|| ApiError::not_found("campaign not found"))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "autopilot",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

// ── System-to-system ─────────────────────────────────

/// Run one scheduler pass (external timer).
pub async fn autopilot_tick(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_secret(&state.cron_secret, &headers)?;
    let summary = run_pass(&state.store, state.dispatcher.as_ref(), Utc::now()).await?;
    Ok(Json(json!({
        "ok": true,
        "evaluated": summary.evaluated,
        "dispatched": summary.dispatched,
        "failed": summary.failed,
        "skipped": summary.skipped,
        "results": summary.results,
    })))
}

/// Dispatch gateway, called by the workflow engine before it acts.
pub async fn autopilot_dispatch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // A malformed body carries no action and is refused at the action gate,
    // after the secret gate has had its say.
    let request: AuthorizeRequest = serde_json::from_slice(&body).unwrap_or_default();
    let decision = authorize(&state.store, &state.dispatch_secret, presented(&headers), &request)?;
    let outcome = decision.outcome();
    let response = match decision {
        DispatchDecision::Authorized(ctx) => (
            StatusCode::OK,
            Json(json!({"ok": true, "outcome": outcome, "skipAction": false, "context": ctx})),
        ),
        DispatchDecision::Skipped(reason) => {
            tracing::info!("⏭️ Skipped {} for user {}: {}", request.action, request.user_id, reason.as_str());
            (
                StatusCode::OK,
                Json(json!({
                    "ok": false,
                    "outcome": outcome,
                    "skipAction": true,
                    "reason": reason.as_str(),
                    "error": reason.message(),
                })),
            )
        }
        DispatchDecision::Denied(reason) => (
            StatusCode::from_u16(reason.status_code()).unwrap_or(StatusCode::FORBIDDEN),
            Json(json!({
                "ok": false,
                "outcome": outcome,
                "reason": reason.as_str(),
                "error": reason.message(),
            })),
        ),
    };
    Ok(response.into_response())
}

/// The workflow engine reports how a dispatched action went.
pub async fn autopilot_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_secret(&state.dispatch_secret, &headers)?;
    let report: DispatchReport = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid report: {e}")))?;
    let outcome = apply_report(&state.store, &report, Utc::now())?;
    Ok(Json(json!({
        "ok": true,
        "activityId": outcome.activity_id,
        "clockAdvanced": outcome.clock_advanced,
        "leadsRecorded": outcome.leads_recorded,
    })))
}

/// Signed delivery events from the email provider.
pub async fn email_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let verifier = WebhookVerifier::new(
        &state.config.secrets.email_webhook_secret,
        state.config.deliverability.signature_tolerance_secs,
    )
    .map_err(AutopilotError::from)?;
    let signed = SignedHeaders {
        id: header_str(&headers, HEADER_ID),
        timestamp: header_str(&headers, HEADER_TIMESTAMP),
        signature: header_str(&headers, HEADER_SIGNATURE),
    };
    verifier.verify(signed, &body, Utc::now()).map_err(|e| {
        tracing::warn!("🔏 Email webhook signature rejected: {e}");
        AutopilotError::from(e)
    })?;

    let notice = parse_notice(&body).map_err(|e| ApiError::bad_request(e.message()))?;
    let report = state.monitor.handle(&state.store, &notice, Utc::now())?;
    Ok(Json(json!({
        "ok": true,
        "received": true,
        "matched": report.matched,
        "transitioned": report.transitioned,
        "paused": report.paused,
    })))
}

// ── Session-authenticated ────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub campaign_id: Option<String>,
    pub limit: Option<usize>,
}

/// Recent activity for the session user, newest first.
pub async fn list_activity(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let page = state.config.ledger.page_size.max(1);
    let limit = query.limit.unwrap_or(page).clamp(1, page);
    let records = state
        .store
        .recent_activity(&session.user_id, query.campaign_id.as_deref(), limit)?;
    Ok(Json(json!({"ok": true, "activity": records})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBody {
    pub campaign_id: Option<String>,
    pub action_type: String,
    pub result: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// Append an activity record on behalf of the session user.
pub async fn create_activity(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
    Json(body): Json<ActivityBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let action_type = body.action_type.trim();
    if action_type.is_empty() {
        return Err(ApiError::bad_request("actionType is required"));
    }
    let mut record = NewActivity::new(&session.user_id, action_type, body.result.trim())
        .platforms(body.platforms)
        .details(body.details.unwrap_or_else(|| json!({})));
    if let Some(cid) = body.campaign_id.as_deref() {
        let campaign = owned_campaign(&state, &session.user_id, cid)?;
        record = record.campaign(campaign.id);
    }
    let id = state.store.append_activity(&record, Utc::now())?;
    Ok(Json(json!({"ok": true, "id": id})))
}

pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = owned_campaign(&state, &session.user_id, &id)?;
    let now = Utc::now();
    let changed = state.store.pause_campaign(&campaign.id, "paused by user", now)?;
    if changed {
        record_best_effort(
            &state.store,
            &NewActivity::new(&session.user_id, "pause", "paused").campaign(&campaign.id),
            now,
        );
    }
    Ok(Json(json!({"ok": true, "paused": true, "changed": changed})))
}

pub async fn resume_campaign(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = owned_campaign(&state, &session.user_id, &id)?;
    let now = Utc::now();
    let changed = state.store.resume_campaign(&campaign.id)?;
    if changed {
        record_best_effort(
            &state.store,
            &NewActivity::new(&session.user_id, "resume", "resumed").campaign(&campaign.id),
            now,
        );
    }
    Ok(Json(json!({"ok": true, "paused": false, "changed": changed})))
}

/// Rolling deliverability stats for the UI.
pub async fn campaign_deliverability(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let campaign = owned_campaign(&state, &session.user_id, &id)?;
    let health = state
        .monitor
        .health(&state.store, &session.user_id, &campaign.id, Utc::now())?;
    Ok(Json(json!({
        "ok": true,
        "campaignId": campaign.id,
        "isPaused": campaign.is_paused,
        "pauseReason": campaign.pause_reason,
        "stats": health,
    })))
}

/// Rate-limited verification email resend.
pub async fn verification_resend(
    State(state): State<Arc<AppState>>,
    session: SessionUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let campaign = owned_campaign(&state, &session.user_id, &id)?;
    let decision = state
        .resend_limiter
        .check_and_record(&state.store, &session.user_id, &campaign.id, Utc::now())?;
    let response = match decision {
        ResendDecision::Allowed { remaining } => {
            Json(json!({"ok": true, "remaining": remaining})).into_response()
        }
        ResendDecision::Limited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(json!({
                "ok": false,
                "error": "too many verification emails, try again later",
                "retryAfterSecs": retry_after_secs,
            })),
        )
            .into_response(),
    };
    Ok(response)
}
