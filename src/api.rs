//! HTTP surface: admin order actions, order reads and the courier webhook.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::Validate;

use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::records::{CourierStatus, EmailLogEntry, StatusHistoryEntry, TrackingEvent};
use crate::domain::value_objects::Reason;
use crate::store::{EmailLogStore, HistoryStore, OrderFilter, OrderStore, TrackingStore};
use crate::tracking::{CourierUpdate, TrackingIngestor};
use crate::workflow::{ActionOutcome, OrderAction, OrderWorkflow};
use crate::OrderError;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<OrderWorkflow>,
    pub tracking: Arc<TrackingIngestor>,
    pub orders: Arc<dyn OrderStore>,
    pub history: Arc<dyn HistoryStore>,
    pub email_log: Arc<dyn EmailLogStore>,
    pub tracking_events: Arc<dyn TrackingStore>,
    pub webhook_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "animart-orders"})) }))
        .route("/api/admin/orders", get(list_orders))
        .route("/api/admin/orders/:id", get(get_order))
        .route("/api/admin/orders/:id/actions", post(order_action))
        .route("/api/webhooks/shipping", post(shipping_webhook))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error("invalid webhook token")]
    Unauthorized,
}

impl ApiError {
    fn input(message: impl Into<String>) -> Self { Self::Order(OrderError::InvalidInput(message.into())) }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Order(e) => match e {
                OrderError::InvalidInput(_) | OrderError::InvalidTransition { .. } | OrderError::PaymentNotSettled(_) => StatusCode::BAD_REQUEST,
                OrderError::NotFound(_) | OrderError::UnknownAwb(_) => StatusCode::NOT_FOUND,
                OrderError::ConcurrentModification { .. } => StatusCode::CONFLICT,
                OrderError::Shipping(_) => StatusCode::BAD_GATEWAY,
                OrderError::ShippingTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                OrderError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self { Self::input(r.body_text()) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody { pub error: String }

fn parse_order_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>().ok().filter(|id| *id > 0).ok_or_else(|| ApiError::input(format!("Invalid order id '{raw}'")))
}

// =============================================================================
// Admin actions
// =============================================================================

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName { Accept, Reject, ReadyToDispatch, UpdateStatus }

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: ActionName,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub new_status: Option<String>,
}

impl TryFrom<ActionRequest> for OrderAction {
    type Error = OrderError;

    fn try_from(r: ActionRequest) -> Result<Self, Self::Error> {
        let notes = non_blank(r.notes);
        let reason = non_blank(r.reason);
        Ok(match r.action {
            ActionName::Accept => Self::Accept { notes },
            ActionName::ReadyToDispatch => Self::ReadyToDispatch { notes },
            ActionName::Reject => {
                let reason = reason.ok_or_else(|| OrderError::InvalidInput("A rejection reason is required".into()))?;
                let reason = Reason::new(reason).map_err(|e| OrderError::InvalidInput(e.to_string()))?;
                Self::Reject { reason, notes }
            }
            ActionName::UpdateStatus => {
                let raw = non_blank(r.new_status).ok_or_else(|| OrderError::InvalidInput("newStatus is required".into()))?;
                let new_status = raw.parse::<OrderStatus>().map_err(|_| {
                    OrderError::InvalidInput(format!("Invalid status '{raw}'. Valid statuses are: {}", OrderStatus::all_names()))
                })?;
                Self::UpdateStatus { new_status, reason, notes }
            }
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    pub new_status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<ShippingSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingSummary {
    pub shipment_id: String,
    pub awb_code: String,
    pub courier_name: String,
    pub label_url: Option<String>,
    pub tracking_url: Option<String>,
    pub expected_delivery: Option<String>,
}

impl From<ActionOutcome> for ActionResponse {
    fn from(outcome: ActionOutcome) -> Self {
        let shipping = outcome.shipment().map(|s| ShippingSummary {
            shipment_id: s.shipment_id.clone(),
            awb_code: s.awb_code.clone(),
            courier_name: s.courier_name.clone(),
            label_url: s.label_url.clone(),
            tracking_url: s.tracking_url.clone(),
            expected_delivery: s.expected_delivery.clone(),
        });
        Self { success: true, new_status: outcome.new_status(), message: outcome.message, shipping }
    }
}

async fn order_action(
    State(s): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionResponse>, ApiError> {
    let id = parse_order_id(&id)?;
    let Json(request) = body?;
    request.validate().map_err(|e| ApiError::input(e.to_string()))?;
    let action = OrderAction::try_from(request)?;
    let outcome = s.workflow.execute(id, action).await?;
    Ok(Json(outcome.into()))
}

// =============================================================================
// Reads
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ListParams {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    pub per_page: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)] pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32 }

async fn list_orders(State(s): State<AppState>, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<Order>>, ApiError> {
    p.validate().map_err(|e| ApiError::input(e.to_string()))?;
    let status = non_blank(p.status)
        .map(|raw| raw.parse::<OrderStatus>().map_err(|_| ApiError::input(format!("Invalid status filter '{raw}'"))))
        .transpose()?;
    let page = p.page.unwrap_or(1); let per_page = p.per_page.unwrap_or(20);
    let filter = OrderFilter { status, limit: i64::from(per_page), offset: (i64::from(page) - 1) * i64::from(per_page) };
    let (data, total) = s.orders.list(&filter).await.map_err(OrderError::from)?;
    Ok(Json(PaginatedResponse { data, total, page }))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub status_history: Vec<StatusHistoryEntry>,
    pub tracking_events: Vec<TrackingEvent>,
    pub email_logs: Vec<EmailLogEntry>,
}

async fn get_order(State(s): State<AppState>, Path(id): Path<String>) -> Result<Json<OrderDetail>, ApiError> {
    let id = parse_order_id(&id)?;
    let order = s.orders.get(id).await.map_err(OrderError::from)?.ok_or(OrderError::NotFound(id))?;
    let (status_history, tracking_events, email_logs) = tokio::try_join!(
        s.history.list_for_order(id),
        s.tracking_events.list_for_order(id),
        s.email_log.list_for_order(id),
    ).map_err(OrderError::from)?;
    Ok(Json(OrderDetail { order, status_history, tracking_events, email_logs }))
}

// =============================================================================
// Courier webhook
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CourierWebhook {
    #[validate(length(min = 1, max = 64))]
    pub awb_code: String,
    pub status: CourierStatus,
    pub location: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub order_id: i64,
    pub transitioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<OrderStatus>,
}

async fn shipping_webhook(
    State(s): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CourierWebhook>, JsonRejection>,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(expected) = &s.webhook_token {
        let given = headers.get(WEBHOOK_TOKEN_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) { return Err(ApiError::Unauthorized); }
    }
    let Json(hook) = body?;
    hook.validate().map_err(|e| ApiError::input(e.to_string()))?;
    let outcome = s.tracking.ingest(CourierUpdate {
        awb_code: hook.awb_code.trim().to_string(),
        status: hook.status,
        location: non_blank(hook.location),
        description: non_blank(hook.description),
        occurred_at: hook.occurred_at,
    }).await?;
    Ok(Json(WebhookResponse {
        success: true,
        order_id: outcome.event.order_id,
        transitioned: outcome.transition.is_some(),
        new_status: outcome.transition.map(|t| t.to),
    }))
}
