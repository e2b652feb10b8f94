//! Courier tracking ingestion.
//!
//! Shipping-aggregator webhooks drive the post-dispatch edges of the order
//! lifecycle. They never go through the admin workflow and only ever move an
//! order forward.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{Order, OrderStatus, Transition};
use crate::domain::events::{self, OrderEvent, OrderEventKind};
use crate::domain::records::{Actor, CourierStatus, NewStatusHistory, NewTrackingEvent, TrackingEvent};
use crate::store::{self, HistoryStore, OrderStore, TrackingStore};
use crate::{OrderError, Result};

const COMMIT_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct CourierUpdate {
    pub awb_code: String,
    pub status: CourierStatus,
    pub location: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TrackingOutcome {
    pub event: TrackingEvent,
    pub transition: Option<Transition>,
}

/// Forward edge implied by a courier scan, if any.
pub fn next_status(current: OrderStatus, scan: CourierStatus) -> Option<OrderStatus> {
    use OrderStatus::*;
    match (current, scan) {
        (ReadyToDispatch, CourierStatus::PickedUp | CourierStatus::InTransit) => Some(Shipped),
        (ReadyToDispatch | Shipped, CourierStatus::OutForDelivery) => Some(OutForDelivery),
        (ReadyToDispatch | Shipped | OutForDelivery, CourierStatus::Delivered) => Some(Delivered),
        (ReadyToDispatch | Shipped | OutForDelivery, CourierStatus::RtoInitiated) => Some(RtoInitiated),
        (RtoInitiated, CourierStatus::RtoDelivered) => Some(RtoDelivered),
        _ => None,
    }
}

pub struct TrackingIngestor {
    orders: Arc<dyn OrderStore>,
    history: Arc<dyn HistoryStore>,
    tracking: Arc<dyn TrackingStore>,
    nats: Option<async_nats::Client>,
}

impl TrackingIngestor {
    pub fn new(orders: Arc<dyn OrderStore>, history: Arc<dyn HistoryStore>, tracking: Arc<dyn TrackingStore>) -> Self {
        Self { orders, history, tracking, nats: None }
    }

    pub fn with_events(mut self, nats: Option<async_nats::Client>) -> Self {
        self.nats = nats;
        self
    }

    #[instrument(skip(self, update), fields(awb = %update.awb_code, scan = %update.status))]
    pub async fn ingest(&self, update: CourierUpdate) -> Result<TrackingOutcome> {
        let order = self.orders.find_by_awb(&update.awb_code).await?
            .ok_or_else(|| OrderError::UnknownAwb(update.awb_code.clone()))?;
        let order_id = order.id;

        let transition = self.advance(order, &update).await?;
        let event = self.tracking.append(NewTrackingEvent {
            order_id,
            awb_code: update.awb_code,
            status: update.status,
            location: update.location,
            description: update.description,
            occurred_at: update.occurred_at.unwrap_or_else(Utc::now),
        }).await?;
        Ok(TrackingOutcome { event, transition })
    }

    /// Applies the scan with a conditional write, re-reading once if another
    /// writer got there first.
    async fn advance(&self, mut order: Order, update: &CourierUpdate) -> Result<Option<Transition>> {
        for attempt in 1..=COMMIT_ATTEMPTS {
            let Some(target) = next_status(order.status, update.status) else {
                return Ok(None);
            };
            let now = Utc::now();
            let transition = order.apply_courier_status(target, update.occurred_at.unwrap_or(now), now);
            if self.orders.update_if_status(&order, transition.from).await? {
                info!(order_id = order.id, from = %transition.from, to = %transition.to, "courier scan advanced order");
                self.record(&order, transition, update).await;
                return Ok(Some(transition));
            }
            warn!(order_id = order.id, attempt, "order changed while applying courier scan");
            order = match self.orders.get(order.id).await? {
                Some(fresh) => fresh,
                None => return Ok(None),
            };
        }
        Ok(None)
    }

    async fn record(&self, order: &Order, transition: Transition, update: &CourierUpdate) {
        let entry = NewStatusHistory {
            order_id: order.id,
            old_status: Some(transition.from),
            new_status: transition.to,
            changed_by: Actor::System,
            reason: Some(format!("Courier reported {}", update.status)),
            metadata: json!({ "awb_code": update.awb_code, "courier_status": update.status, "location": update.location }),
        };
        store::append_history(self.history.as_ref(), entry).await;
        events::publish(self.nats.as_ref(), &OrderEvent::new(OrderEventKind::TrackingAdvanced, order, transition.from, Actor::System)).await;
    }
}
