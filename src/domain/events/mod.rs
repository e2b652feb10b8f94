//! Domain events published after an order transition commits
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::records::Actor;

#[derive(Clone, Debug, Serialize)]
pub struct OrderEvent {
    pub event_id: Uuid,
    pub kind: OrderEventKind,
    pub order_id: i64,
    pub order_number: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub actor: Actor,
    pub awb_code: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind { Accepted, Rejected, ReadyToDispatch, StatusUpdated, TrackingAdvanced }

impl OrderEventKind {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Accepted => "storefront.orders.accepted",
            Self::Rejected => "storefront.orders.rejected",
            Self::ReadyToDispatch => "storefront.orders.ready_to_dispatch",
            Self::StatusUpdated => "storefront.orders.status_updated",
            Self::TrackingAdvanced => "storefront.orders.tracking_advanced",
        }
    }
}

impl OrderEvent {
    pub fn new(kind: OrderEventKind, order: &Order, old_status: OrderStatus, actor: Actor) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            kind,
            order_id: order.id,
            order_number: order.order_number.clone(),
            old_status,
            new_status: order.status,
            actor,
            awb_code: order.shipment.as_ref().map(|s| s.awb_code.clone()),
            occurred_at: order.updated_at,
        }
    }
}

/// Fire-and-forget publish; events never affect the outcome of a transition.
pub async fn publish(nats: Option<&async_nats::Client>, event: &OrderEvent) {
    let Some(client) = nats else { return };
    let payload = match serde_json::to_vec(event) {
        Ok(p) => p,
        Err(e) => { tracing::warn!(order_id = event.order_id, error = %e, "failed to encode order event"); return; }
    };
    if let Err(e) = client.publish(event.kind.subject().to_string(), payload.into()).await {
        tracing::warn!(order_id = event.order_id, subject = event.kind.subject(), error = %e, "failed to publish order event");
    }
}
