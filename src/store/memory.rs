//! In-process backend with the same write semantics as Postgres.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{EmailLogStore, HistoryStore, OrderFilter, OrderStore, StoreError, TrackingStore};
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::records::{
    EmailLogEntry, NewEmailLog, NewStatusHistory, NewTrackingEvent, StatusHistoryEntry, TrackingEvent,
};

#[derive(Default)]
pub struct MemoryStore { inner: Mutex<Inner> }

#[derive(Default)]
struct Inner {
    orders: BTreeMap<i64, Order>,
    history: Vec<StatusHistoryEntry>,
    emails: Vec<EmailLogEntry>,
    tracking: Vec<TrackingEvent>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 { self.next_id += 1; self.next_id }
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let store = Self::new();
        for order in orders { store.insert_order(order); }
        store
    }

    pub fn insert_order(&self, order: Order) {
        self.inner.lock().orders.insert(order.id, order);
    }

    /// Current stored copy, bypassing the async trait.
    pub fn order(&self, id: i64) -> Option<Order> {
        self.inner.lock().orders.get(&id).cloned()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get(&self, id: i64) -> Result<Option<Order>, StoreError> {
        Ok(self.order(id))
    }

    async fn find_by_awb(&self, awb_code: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.lock().orders.values()
            .find(|o| o.shipment.as_ref().is_some_and(|s| s.awb_code == awb_code))
            .cloned())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<(Vec<Order>, i64), StoreError> {
        let inner = self.inner.lock();
        let mut matching: Vec<&Order> = inner.orders.values()
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matching.len() as i64;
        let page = matching.into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn update_if_status(&self, order: &Order, expected: OrderStatus) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.orders.get_mut(&order.id) {
            Some(stored) if stored.status == expected => { *stored = order.clone(); Ok(true) }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, e: NewStatusHistory) -> Result<StatusHistoryEntry, StoreError> {
        let mut inner = self.inner.lock();
        let entry = StatusHistoryEntry {
            id: inner.next_id(), order_id: e.order_id, old_status: e.old_status, new_status: e.new_status,
            changed_by: e.changed_by, reason: e.reason, metadata: e.metadata, created_at: Utc::now(),
        };
        inner.history.push(entry.clone());
        Ok(entry)
    }

    async fn list_for_order(&self, order_id: i64) -> Result<Vec<StatusHistoryEntry>, StoreError> {
        Ok(self.inner.lock().history.iter().rev().filter(|h| h.order_id == order_id).cloned().collect())
    }
}

#[async_trait]
impl EmailLogStore for MemoryStore {
    async fn append(&self, e: NewEmailLog) -> Result<EmailLogEntry, StoreError> {
        let mut inner = self.inner.lock();
        let entry = EmailLogEntry {
            id: inner.next_id(), order_id: e.order_id, email_type: e.email_type, recipient: e.recipient,
            subject: e.subject, status: e.status, error_message: e.error_message, created_at: Utc::now(),
        };
        inner.emails.push(entry.clone());
        Ok(entry)
    }

    async fn list_for_order(&self, order_id: i64) -> Result<Vec<EmailLogEntry>, StoreError> {
        Ok(self.inner.lock().emails.iter().rev().filter(|e| e.order_id == order_id).cloned().collect())
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn append(&self, e: NewTrackingEvent) -> Result<TrackingEvent, StoreError> {
        let mut inner = self.inner.lock();
        let event = TrackingEvent {
            id: inner.next_id(), order_id: e.order_id, awb_code: e.awb_code, status: e.status,
            location: e.location, description: e.description, occurred_at: e.occurred_at, created_at: Utc::now(),
        };
        inner.tracking.push(event.clone());
        Ok(event)
    }

    async fn list_for_order(&self, order_id: i64) -> Result<Vec<TrackingEvent>, StoreError> {
        let mut events: Vec<TrackingEvent> = self.inner.lock().tracking.iter().filter(|t| t.order_id == order_id).cloned().collect();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(b.id.cmp(&a.id)));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::sample_order;
    use crate::domain::aggregates::PaymentStatus;

    #[tokio::test]
    async fn test_update_only_when_status_matches() {
        let store = MemoryStore::with_orders([sample_order(1, OrderStatus::Pending, PaymentStatus::Paid)]);
        let mut changed = store.order(1).unwrap();
        changed.status = OrderStatus::Confirmed;

        assert!(!store.update_if_status(&changed, OrderStatus::PendingReview).await.unwrap());
        assert_eq!(store.order(1).unwrap().status, OrderStatus::Pending);

        assert!(store.update_if_status(&changed, OrderStatus::Pending).await.unwrap());
        assert_eq!(store.order(1).unwrap().status, OrderStatus::Confirmed);

        // second writer still expecting `pending` loses
        assert!(!store.update_if_status(&changed, OrderStatus::Pending).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_order_writes_nothing() {
        let store = MemoryStore::new();
        let order = sample_order(5, OrderStatus::Pending, PaymentStatus::Paid);
        assert!(!store.update_if_status(&order, OrderStatus::Pending).await.unwrap());
        assert!(store.order(5).is_none());
    }

    #[tokio::test]
    async fn test_lists_are_newest_first() {
        let store = MemoryStore::new();
        for (old, new) in [(OrderStatus::Pending, OrderStatus::Confirmed), (OrderStatus::Confirmed, OrderStatus::ReadyToDispatch)] {
            HistoryStore::append(&store, NewStatusHistory {
                order_id: 1, old_status: Some(old), new_status: new, changed_by: crate::domain::records::Actor::Admin,
                reason: None, metadata: serde_json::json!({}),
            }).await.unwrap();
        }
        let history = HistoryStore::list_for_order(&store, 1).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].new_status, OrderStatus::ReadyToDispatch);
        assert!(HistoryStore::list_for_order(&store, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = MemoryStore::with_orders([
            sample_order(1, OrderStatus::Pending, PaymentStatus::Paid),
            sample_order(2, OrderStatus::Confirmed, PaymentStatus::Cod),
            sample_order(3, OrderStatus::Pending, PaymentStatus::Cod),
        ]);
        let (page, total) = store.list(&OrderFilter { status: Some(OrderStatus::Pending), limit: 1, offset: 0 }).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        let (all, total) = store.list(&OrderFilter { status: None, limit: 20, offset: 0 }).await.unwrap();
        assert_eq!((all.len(), total), (3, 3));
    }
}
