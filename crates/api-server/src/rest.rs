//! REST handlers for user event / attribute notifications, campaign
//! lifecycle calls and operational endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use campaign_core::config::RoutingMode;
use campaign_core::types::{Campaign, CampaignStatus, UserAttribute, UserEvent};
use campaign_core::CampaignError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

use crate::ingress::{validate_user_attribute, validate_user_event, EventIngress};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub ingress: Arc<EventIngress>,
    pub node_id: String,
    pub start_time: Instant,
}

/// Body of every notification response. Failures carry the error text in
/// `reason`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct NotifyResponse {
    pub success: bool,
    pub reason: String,
}

impl NotifyResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            reason: "OK".to_string(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }
}

type NotifyReply = (StatusCode, Json<NotifyResponse>);

/// POST /v1/events: a user performed an action.
pub async fn notify_user_event(
    State(state): State<AppState>,
    Json(event): Json<UserEvent>,
) -> NotifyReply {
    if let Err(msg) = validate_user_event(&event) {
        warn!(event_name = %event.event_name, error = msg, "User event validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return (StatusCode::BAD_REQUEST, Json(NotifyResponse::failed(msg)));
    }

    metrics::counter!("api.events_received").increment(1);
    match state.ingress.notify_user_event(event) {
        Ok(()) => (StatusCode::OK, Json(NotifyResponse::ok())),
        Err(e) => failure("user event", e),
    }
}

/// POST /v1/attributes: a user attribute changed.
pub async fn notify_user_attribute(
    State(state): State<AppState>,
    Json(attribute): Json<UserAttribute>,
) -> NotifyReply {
    if let Err(msg) = validate_user_attribute(&attribute) {
        warn!(attribute_name = %attribute.attribute_name, error = msg, "User attribute validation failed");
        metrics::counter!("api.validation_errors").increment(1);
        return (StatusCode::BAD_REQUEST, Json(NotifyResponse::failed(msg)));
    }

    metrics::counter!("api.attributes_received").increment(1);
    match state.ingress.notify_user_attribute(attribute) {
        Ok(()) => (StatusCode::OK, Json(NotifyResponse::ok())),
        Err(e) => failure("user attribute", e),
    }
}

/// POST /v1/campaigns/:id/activate
pub async fn activate_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<Campaign>, (StatusCode, Json<ErrorResponse>)> {
    state
        .ingress
        .activate(&campaign_id)
        .map(Json)
        .map_err(lifecycle_error)
}

#[derive(Debug, Deserialize)]
pub struct DeactivateRequest {
    pub status: CampaignStatus,
}

/// POST /v1/campaigns/:id/deactivate
pub async fn deactivate_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Json(request): Json<DeactivateRequest>,
) -> Result<Json<Campaign>, (StatusCode, Json<ErrorResponse>)> {
    state
        .ingress
        .deactivate(&campaign_id, request.status)
        .map(Json)
        .map_err(lifecycle_error)
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        routing_mode: state.ingress.mode(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub routing_mode: RoutingMode,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

// ─── Internal helpers ──────────────────────────────────────────────────

fn failure(what: &str, e: CampaignError) -> NotifyReply {
    let status = match e {
        CampaignError::MissingSubject(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!(error = %e, "Failed to process {}", what);
    metrics::counter!("api.errors").increment(1);
    (status, Json(NotifyResponse::failed(e.to_string())))
}

fn lifecycle_error(e: CampaignError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match e {
        CampaignError::CampaignNotFound(_) => (StatusCode::NOT_FOUND, "campaign_not_found"),
        CampaignError::InvalidDelaySpec(_) | CampaignError::InvalidRecurrence(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_campaign")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "lifecycle_failed"),
    };
    warn!(error = %e, "Campaign lifecycle call failed");
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: e.to_string(),
        }),
    )
}
