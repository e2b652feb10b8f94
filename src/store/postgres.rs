//! Postgres backend (sqlx)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgPool};

use super::{parse_enum, EmailLogStore, HistoryStore, OrderFilter, OrderStore, StoreError, TrackingStore};
use crate::domain::aggregates::{Customer, LineItem, Order, OrderStatus, Shipment, ShippingAddress};
use crate::domain::records::{
    EmailLogEntry, NewEmailLog, NewStatusHistory, NewTrackingEvent, StatusHistoryEntry, TrackingEvent,
};
use crate::domain::value_objects::Money;

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64, order_number: String, status: String, payment_status: String,
    customer_name: String, customer_email: Option<String>, customer_phone: Option<String>,
    shipping_address: Json<ShippingAddress>, items: Json<Vec<LineItem>>,
    currency: String, subtotal: Decimal, shipping_cost: Decimal, total: Decimal,
    courier_name: Option<String>, shipment_id: Option<String>, awb_code: Option<String>,
    label_url: Option<String>, tracking_url: Option<String>, expected_delivery: Option<String>,
    accepted_at: Option<DateTime<Utc>>, rejected_at: Option<DateTime<Utc>>,
    dispatched_at: Option<DateTime<Utc>>, delivered_at: Option<DateTime<Utc>>,
    admin_notes: Option<String>, rejection_reason: Option<String>, cancellation_reason: Option<String>,
    refund_status: Option<String>, refund_amount: Option<Decimal>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let shipment = r.awb_code.map(|awb_code| Shipment {
            shipment_id: r.shipment_id.unwrap_or_default(),
            awb_code,
            courier_name: r.courier_name.unwrap_or_default(),
            label_url: r.label_url,
            tracking_url: r.tracking_url,
            expected_delivery: r.expected_delivery,
        });
        Ok(Order {
            id: r.id,
            status: parse_enum(&r.status, "order status")?,
            payment_status: parse_enum(&r.payment_status, "payment status")?,
            refund_status: r.refund_status.as_deref().map(|s| parse_enum(s, "refund status")).transpose()?,
            order_number: r.order_number,
            customer: Customer { name: r.customer_name, email: r.customer_email, phone: r.customer_phone, address: r.shipping_address.0 },
            items: r.items.0,
            subtotal: Money::new(r.subtotal, &r.currency),
            shipping_cost: Money::new(r.shipping_cost, &r.currency),
            total: Money::new(r.total, &r.currency),
            refund_amount: r.refund_amount.map(|a| Money::new(a, &r.currency)),
            shipment,
            accepted_at: r.accepted_at, rejected_at: r.rejected_at, dispatched_at: r.dispatched_at, delivered_at: r.delivered_at,
            admin_notes: r.admin_notes, rejection_reason: r.rejection_reason, cancellation_reason: r.cancellation_reason,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn get(&self, id: i64) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .map(Order::try_from).transpose()
    }

    async fn find_by_awb(&self, awb_code: &str) -> Result<Option<Order>, StoreError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE awb_code = $1")
            .bind(awb_code).fetch_optional(&self.pool).await?
            .map(Order::try_from).transpose()
    }

    async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, i64), StoreError> {
        let status = filter.status.map(|s| s.to_string());
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE ($1::text IS NULL OR status = $1) ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3")
            .bind(&status).bind(filter.limit).bind(filter.offset).fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE ($1::text IS NULL OR status = $1)")
            .bind(&status).fetch_one(&self.pool).await?;
        let orders = rows.into_iter().map(Order::try_from).collect::<Result<Vec<_>, _>>()?;
        Ok((orders, total.0))
    }

    async fn update_if_status(&self, o: &Order, expected: OrderStatus) -> Result<bool, StoreError> {
        let shipment = o.shipment.as_ref();
        let result = sqlx::query(
            "UPDATE orders SET status = $3, admin_notes = $4, rejection_reason = $5, cancellation_reason = $6, \
             refund_status = $7, refund_amount = $8, courier_name = $9, shipment_id = $10, awb_code = $11, \
             label_url = $12, tracking_url = $13, expected_delivery = $14, accepted_at = $15, rejected_at = $16, \
             dispatched_at = $17, delivered_at = $18, updated_at = $19 \
             WHERE id = $1 AND status = $2",
        )
        .bind(o.id).bind(expected.to_string()).bind(o.status.to_string())
        .bind(&o.admin_notes).bind(&o.rejection_reason).bind(&o.cancellation_reason)
        .bind(o.refund_status.map(|s| s.to_string())).bind(o.refund_amount.as_ref().map(Money::amount))
        .bind(shipment.map(|s| s.courier_name.clone())).bind(shipment.map(|s| s.shipment_id.clone()))
        .bind(shipment.map(|s| s.awb_code.clone())).bind(shipment.and_then(|s| s.label_url.clone()))
        .bind(shipment.and_then(|s| s.tracking_url.clone())).bind(shipment.and_then(|s| s.expected_delivery.clone()))
        .bind(o.accepted_at).bind(o.rejected_at).bind(o.dispatched_at).bind(o.delivered_at).bind(o.updated_at)
        .execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64, order_id: i64, old_status: Option<String>, new_status: String, changed_by: String,
    reason: Option<String>, metadata: serde_json::Value, created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for StatusHistoryEntry {
    type Error = StoreError;
    fn try_from(r: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, order_id: r.order_id,
            old_status: r.old_status.as_deref().map(|s| parse_enum(s, "order status")).transpose()?,
            new_status: parse_enum(&r.new_status, "order status")?,
            changed_by: parse_enum(&r.changed_by, "actor")?,
            reason: r.reason, metadata: r.metadata, created_at: r.created_at,
        })
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn append(&self, e: NewStatusHistory) -> Result<StatusHistoryEntry, StoreError> {
        sqlx::query_as::<_, HistoryRow>("INSERT INTO order_status_history (order_id, old_status, new_status, changed_by, reason, metadata, created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING *")
            .bind(e.order_id).bind(e.old_status.map(|s| s.to_string())).bind(e.new_status.to_string())
            .bind(e.changed_by.to_string()).bind(&e.reason).bind(&e.metadata)
            .fetch_one(&self.pool).await?
            .try_into()
    }

    async fn list_for_order(&self, order_id: i64) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        sqlx::query_as::<_, HistoryRow>("SELECT * FROM order_status_history WHERE order_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(order_id).fetch_all(&self.pool).await?
            .into_iter().map(StatusHistoryEntry::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EmailLogRow {
    id: i64, order_id: i64, email_type: String, recipient: String, subject: String, status: String,
    error_message: Option<String>, created_at: DateTime<Utc>,
}

impl TryFrom<EmailLogRow> for EmailLogEntry {
    type Error = StoreError;
    fn try_from(r: EmailLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, order_id: r.order_id,
            email_type: parse_enum(&r.email_type, "email type")?,
            status: parse_enum(&r.status, "email status")?,
            recipient: r.recipient, subject: r.subject, error_message: r.error_message, created_at: r.created_at,
        })
    }
}

#[async_trait]
impl EmailLogStore for PgStore {
    async fn append(&self, e: NewEmailLog) -> Result<EmailLogEntry, StoreError> {
        sqlx::query_as::<_, EmailLogRow>("INSERT INTO email_logs (order_id, email_type, recipient, subject, status, error_message, created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING *")
            .bind(e.order_id).bind(e.email_type.to_string()).bind(&e.recipient).bind(&e.subject)
            .bind(e.status.to_string()).bind(&e.error_message)
            .fetch_one(&self.pool).await?
            .try_into()
    }

    async fn list_for_order(&self, order_id: i64) -> Result<Vec<EmailLogEntry>, StoreError> {
        sqlx::query_as::<_, EmailLogRow>("SELECT * FROM email_logs WHERE order_id = $1 ORDER BY created_at DESC, id DESC")
            .bind(order_id).fetch_all(&self.pool).await?
            .into_iter().map(EmailLogEntry::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrackingRow {
    id: i64, order_id: i64, awb_code: String, status: String, location: Option<String>,
    description: Option<String>, occurred_at: DateTime<Utc>, created_at: DateTime<Utc>,
}

impl TryFrom<TrackingRow> for TrackingEvent {
    type Error = StoreError;
    fn try_from(r: TrackingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id, order_id: r.order_id, awb_code: r.awb_code,
            status: parse_enum(&r.status, "courier status")?,
            location: r.location, description: r.description, occurred_at: r.occurred_at, created_at: r.created_at,
        })
    }
}

#[async_trait]
impl TrackingStore for PgStore {
    async fn append(&self, e: NewTrackingEvent) -> Result<TrackingEvent, StoreError> {
        sqlx::query_as::<_, TrackingRow>("INSERT INTO tracking_events (order_id, awb_code, status, location, description, occurred_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, NOW()) RETURNING *")
            .bind(e.order_id).bind(&e.awb_code).bind(e.status.to_string()).bind(&e.location).bind(&e.description).bind(e.occurred_at)
            .fetch_one(&self.pool).await?
            .try_into()
    }

    async fn list_for_order(&self, order_id: i64) -> Result<Vec<TrackingEvent>, StoreError> {
        sqlx::query_as::<_, TrackingRow>("SELECT * FROM tracking_events WHERE order_id = $1 ORDER BY occurred_at DESC, id DESC")
            .bind(order_id).fetch_all(&self.pool).await?
            .into_iter().map(TrackingEvent::try_from).collect()
    }
}
