//! Persistence seams for orders and their append-only records.
//!
//! `postgres` is the production backend; `memory` keeps the same semantics
//! (including the conditional status write) in process.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, warn};

use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::records::{
    EmailLogEntry, NewEmailLog, NewStatusHistory, NewTrackingEvent, StatusHistoryEntry, TrackingEvent,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const HISTORY_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub limit: i64,
    pub offset: i64,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Order>, StoreError>;
    async fn find_by_awb(&self, awb_code: &str) -> Result<Option<Order>, StoreError>;
    /// Newest first, together with the total number of matching orders.
    async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, i64), StoreError>;
    /// Writes `order` only while the stored status still equals `expected`.
    /// Returns `false` when nothing was written.
    async fn update_if_status(&self, order: &Order, expected: OrderStatus) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: NewStatusHistory) -> Result<StatusHistoryEntry, StoreError>;
    async fn list_for_order(&self, order_id: i64) -> Result<Vec<StatusHistoryEntry>, StoreError>;
}

/// Audit rows never fail the change they describe: the append is retried up
/// to [`HISTORY_ATTEMPTS`] times and then dropped with an error log.
pub async fn append_history(history: &dyn HistoryStore, entry: NewStatusHistory) {
    for attempt in 1..=HISTORY_ATTEMPTS {
        match history.append(entry.clone()).await {
            Ok(_) => return,
            Err(e) if attempt < HISTORY_ATTEMPTS => warn!(order_id = entry.order_id, attempt, error = %e, "retrying status history write"),
            Err(e) => error!(order_id = entry.order_id, new_status = %entry.new_status, error = %e, "status history row lost"),
        }
    }
}

#[async_trait]
pub trait EmailLogStore: Send + Sync {
    async fn append(&self, entry: NewEmailLog) -> Result<EmailLogEntry, StoreError>;
    async fn list_for_order(&self, order_id: i64) -> Result<Vec<EmailLogEntry>, StoreError>;
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn append(&self, event: NewTrackingEvent) -> Result<TrackingEvent, StoreError>;
    async fn list_for_order(&self, order_id: i64) -> Result<Vec<TrackingEvent>, StoreError>;
}

pub(crate) fn parse_enum<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, StoreError> {
    value.parse().map_err(|_| StoreError::Corrupt(format!("unknown {what} '{value}'")))
}
