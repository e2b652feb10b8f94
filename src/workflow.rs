//! Admin order workflow.
//!
//! Each action runs in two phases. The commit phase validates the action
//! against the status that was read, performs any required external booking,
//! and writes the order with a conditional update on that status. Only a
//! committed transition reaches the notify phase: history row, domain event,
//! customer email and its log row. Nothing in the notify phase can fail the
//! action.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::domain::aggregates::{Order, OrderStatus, Shipment, Transition};
use crate::domain::events::{self, OrderEvent, OrderEventKind};
use crate::domain::records::{Actor, EmailStatus, NewEmailLog, NewStatusHistory};
use crate::domain::value_objects::Reason;
use crate::integrations::{EmailError, EmailMessage, EmailSender, ShipmentRequest, ShippingProvider};
use crate::store::{self, EmailLogStore, HistoryStore, OrderStore};
use crate::{OrderError, Result};

/// An admin request, one variant per action with exactly the inputs it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderAction {
    Accept { notes: Option<String> },
    Reject { reason: Reason, notes: Option<String> },
    ReadyToDispatch { notes: Option<String> },
    UpdateStatus { new_status: OrderStatus, reason: Option<String>, notes: Option<String> },
}

impl OrderAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Reject { .. } => "reject",
            Self::ReadyToDispatch { .. } => "ready_to_dispatch",
            Self::UpdateStatus { .. } => "update_status",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub message: String,
    pub transition: Transition,
    pub order: Order,
}

impl ActionOutcome {
    pub fn new_status(&self) -> OrderStatus { self.transition.to }
    pub fn shipment(&self) -> Option<&Shipment> {
        (self.transition.to == OrderStatus::ReadyToDispatch).then_some(self.order.shipment.as_ref()).flatten()
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub history: Arc<dyn HistoryStore>,
    pub email_log: Arc<dyn EmailLogStore>,
    pub shipping: Arc<dyn ShippingProvider>,
    pub mailer: Arc<dyn EmailSender>,
}

/// What the commit phase hands over to the notify phase.
struct Committed {
    transition: Transition,
    reason: Option<String>,
    metadata: serde_json::Value,
    event: OrderEventKind,
    email: Option<fn(&Order, &str) -> EmailMessage>,
    message: String,
}

pub struct OrderWorkflow {
    deps: Collaborators,
    store_name: String,
    booking_timeout: Duration,
    nats: Option<async_nats::Client>,
}

impl OrderWorkflow {
    pub fn new(deps: Collaborators, store_name: impl Into<String>, booking_timeout: Duration) -> Self {
        Self { deps, store_name: store_name.into(), booking_timeout, nats: None }
    }

    pub fn with_events(mut self, nats: Option<async_nats::Client>) -> Self {
        self.nats = nats;
        self
    }

    #[instrument(skip(self, action), fields(action = action.name()))]
    pub async fn execute(&self, order_id: i64, action: OrderAction) -> Result<ActionOutcome> {
        let mut order = self.deps.orders.get(order_id).await?.ok_or(OrderError::NotFound(order_id))?;
        let committed = self.apply(&mut order, action).await?;

        let expected = committed.transition.from;
        if !self.deps.orders.update_if_status(&order, expected).await? {
            warn!(order_id, expected = %expected, "order status changed between read and write");
            return Err(OrderError::ConcurrentModification { order_id, expected });
        }
        info!(order_id, from = %committed.transition.from, to = %committed.transition.to, "order transition committed");

        self.record_history(NewStatusHistory {
            order_id,
            old_status: Some(committed.transition.from),
            new_status: committed.transition.to,
            changed_by: Actor::Admin,
            reason: committed.reason,
            metadata: committed.metadata,
        }).await;
        events::publish(self.nats.as_ref(), &OrderEvent::new(committed.event, &order, committed.transition.from, Actor::Admin)).await;
        if let Some(render) = committed.email {
            self.notify(&order, render(&order, &self.store_name)).await;
        }

        Ok(ActionOutcome { message: committed.message, transition: committed.transition, order })
    }

    /// Validates and mutates the in-memory order. Nothing is persisted here.
    async fn apply(&self, order: &mut Order, action: OrderAction) -> Result<Committed> {
        let number = order.order_number.clone();
        let committed = match action {
            OrderAction::Accept { notes } => {
                let transition = order.accept(notes, Utc::now())?;
                Committed {
                    transition,
                    reason: Some("Order accepted".to_string()),
                    metadata: json!({ "payment_status": order.payment_status }),
                    event: OrderEventKind::Accepted,
                    email: Some(EmailMessage::accepted),
                    message: format!("Order {number} accepted"),
                }
            }
            OrderAction::Reject { reason, notes } => {
                let transition = order.reject(&reason, notes, Utc::now())?;
                let message = match &order.refund_amount {
                    Some(amount) if order.refund_pending() => format!("Order {number} rejected; refund of {amount} marked pending"),
                    _ => format!("Order {number} rejected"),
                };
                Committed {
                    transition,
                    reason: Some(reason.to_string()),
                    metadata: json!({
                        "payment_status": order.payment_status,
                        "refund_status": order.refund_status,
                        "refund_amount": order.refund_amount.as_ref().map(|m| m.amount()),
                    }),
                    event: OrderEventKind::Rejected,
                    email: Some(EmailMessage::rejected),
                    message,
                }
            }
            OrderAction::ReadyToDispatch { notes } => {
                order.ensure_dispatchable()?;
                let shipment = self.book(order).await?;
                let transition = order.mark_ready_to_dispatch(shipment.clone(), notes, Utc::now())?;
                Committed {
                    transition,
                    reason: Some(format!("Shipment booked with {}", shipment.courier_name)),
                    metadata: json!({
                        "shipment_id": shipment.shipment_id,
                        "awb_code": shipment.awb_code,
                        "courier_name": shipment.courier_name,
                        "label_url": shipment.label_url,
                        "tracking_url": shipment.tracking_url,
                        "expected_delivery": shipment.expected_delivery,
                    }),
                    event: OrderEventKind::ReadyToDispatch,
                    email: Some(EmailMessage::ready_to_dispatch),
                    message: format!("Order {number} is ready to dispatch via {} (AWB {})", shipment.courier_name, shipment.awb_code),
                }
            }
            OrderAction::UpdateStatus { new_status, reason, notes } => {
                let audit_reason = reason.or_else(|| notes.clone()).unwrap_or_else(|| format!("Status set to {new_status}"));
                let transition = order.set_status(new_status, notes, Utc::now());
                Committed {
                    transition,
                    reason: Some(audit_reason),
                    metadata: json!({ "manual": true }),
                    event: OrderEventKind::StatusUpdated,
                    email: None,
                    message: format!("Order {number} status updated to {new_status}"),
                }
            }
        };
        Ok(committed)
    }

    async fn book(&self, order: &Order) -> Result<Shipment> {
        let request = ShipmentRequest::from_order(order);
        match tokio::time::timeout(self.booking_timeout, self.deps.shipping.book_shipment(&request)).await {
            Ok(Ok(shipment)) => Ok(shipment),
            Ok(Err(e)) => Err(OrderError::Shipping(e.to_string())),
            Err(_) => {
                warn!(order_id = order.id, timeout_secs = self.booking_timeout.as_secs(), "shipment booking timed out");
                Err(OrderError::ShippingTimeout(self.booking_timeout.as_secs()))
            }
        }
    }

    async fn record_history(&self, entry: NewStatusHistory) {
        store::append_history(self.deps.history.as_ref(), entry).await;
    }

    async fn notify(&self, order: &Order, message: EmailMessage) {
        let result = match message.to {
            Some(_) => self.deps.mailer.send(&message).await,
            None => Err(EmailError::NoRecipient),
        };
        let (status, error_message) = match result {
            Ok(()) => (EmailStatus::Sent, None),
            Err(e) => {
                warn!(order_id = order.id, kind = %message.kind, error = %e, "customer email failed");
                (EmailStatus::Failed, Some(e.to_string()))
            }
        };
        let log = NewEmailLog {
            order_id: order.id,
            email_type: message.kind,
            recipient: message.to.unwrap_or_default(),
            subject: message.subject,
            status,
            error_message,
        };
        if let Err(e) = self.deps.email_log.append(log).await {
            error!(order_id = order.id, error = %e, "failed to write email log");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::domain::aggregates::order::tests::sample_order;
    use crate::domain::aggregates::{PaymentStatus, RefundStatus};
    use crate::domain::records::EmailKind;
    use crate::integrations::ShippingError;
    use crate::store::{MemoryStore, OrderFilter, StoreError};

    pub(crate) enum Courier { Books(&'static str), Declines(&'static str), Hangs }

    pub(crate) struct FakeShipping { pub behaviour: Courier, pub calls: AtomicUsize }

    #[async_trait]
    impl ShippingProvider for FakeShipping {
        async fn book_shipment(&self, request: &ShipmentRequest) -> std::result::Result<Shipment, ShippingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Courier::Books(awb) => Ok(Shipment {
                    shipment_id: format!("SR-{}", request.order_id),
                    awb_code: awb.to_string(),
                    courier_name: "Delhivery".into(),
                    label_url: Some("https://labels.example/1.pdf".into()),
                    tracking_url: Some(format!("https://track.example/{awb}")),
                    expected_delivery: Some("2026-10-24".into()),
                }),
                Courier::Declines(msg) => Err(ShippingError::Rejected(msg.to_string())),
                Courier::Hangs => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(ShippingError::Transport("unreachable".into()))
                }
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingMailer { pub fail: bool, pub sent: Mutex<Vec<EmailMessage>> }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send(&self, message: &EmailMessage) -> std::result::Result<(), EmailError> {
            if self.fail { return Err(EmailError::Transport("connection reset".into())); }
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    pub(crate) struct Harness {
        pub store: Arc<MemoryStore>,
        pub shipping: Arc<FakeShipping>,
        pub mailer: Arc<RecordingMailer>,
        pub workflow: OrderWorkflow,
    }

    pub(crate) fn harness(orders: Vec<Order>, courier: Courier, mail_fails: bool) -> Harness {
        let store = Arc::new(MemoryStore::with_orders(orders));
        let shipping = Arc::new(FakeShipping { behaviour: courier, calls: AtomicUsize::new(0) });
        let mailer = Arc::new(RecordingMailer { fail: mail_fails, ..Default::default() });
        let deps = Collaborators {
            orders: store.clone(), history: store.clone(), email_log: store.clone(),
            shipping: shipping.clone(), mailer: mailer.clone(),
        };
        let workflow = OrderWorkflow::new(deps, "Animart", Duration::from_millis(100));
        Harness { store, shipping, mailer, workflow }
    }

    impl Harness {
        async fn history(&self, id: i64) -> Vec<crate::domain::records::StatusHistoryEntry> {
            HistoryStore::list_for_order(&*self.store, id).await.unwrap()
        }
        async fn emails(&self, id: i64) -> Vec<crate::domain::records::EmailLogEntry> {
            EmailLogStore::list_for_order(&*self.store, id).await.unwrap()
        }
    }

    fn reject(reason: &str) -> OrderAction {
        OrderAction::Reject { reason: Reason::new(reason).unwrap(), notes: None }
    }

    #[tokio::test]
    async fn test_accept_pending_paid_order() {
        let h = harness(vec![sample_order(42, OrderStatus::Pending, PaymentStatus::Paid)], Courier::Books("AWB1"), false);
        let outcome = h.workflow.execute(42, OrderAction::Accept { notes: None }).await.unwrap();

        assert_eq!(outcome.new_status(), OrderStatus::Confirmed);
        assert!(outcome.shipment().is_none());
        let stored = h.store.order(42).unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert!(stored.accepted_at.is_some());

        let history = h.history(42).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, Some(OrderStatus::Pending));
        assert_eq!(history[0].new_status, OrderStatus::Confirmed);
        assert_eq!(history[0].changed_by, Actor::Admin);

        let emails = h.emails(42).await;
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].email_type, EmailKind::OrderAccepted);
        assert_eq!(emails[0].status, EmailStatus::Sent);
        assert_eq!(h.mailer.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_succeeds_for_every_settled_pending_order() {
        let mut orders = Vec::new();
        let mut id = 0;
        for status in [OrderStatus::Pending, OrderStatus::PendingReview] {
            for payment in [PaymentStatus::Paid, PaymentStatus::Cod] {
                id += 1;
                orders.push(sample_order(id, status, payment));
            }
        }
        let h = harness(orders, Courier::Books("AWB1"), false);
        for id in 1..=4 {
            h.workflow.execute(id, OrderAction::Accept { notes: None }).await.unwrap();
            let stored = h.store.order(id).unwrap();
            assert_eq!(stored.status, OrderStatus::Confirmed);
            assert!(stored.accepted_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_accept_unpaid_order_is_refused() {
        let h = harness(vec![sample_order(7, OrderStatus::Pending, PaymentStatus::Pending)], Courier::Books("AWB1"), false);
        let err = h.workflow.execute(7, OrderAction::Accept { notes: None }).await.unwrap_err();
        assert!(matches!(err, OrderError::PaymentNotSettled(PaymentStatus::Pending)));
        assert_eq!(h.store.order(7).unwrap().status, OrderStatus::Pending);
        assert!(h.history(7).await.is_empty());
    }

    #[tokio::test]
    async fn test_reject_terminal_orders_changes_nothing() {
        let orders = vec![
            sample_order(43, OrderStatus::Shipped, PaymentStatus::Paid),
            sample_order(46, OrderStatus::Delivered, PaymentStatus::Cod),
            sample_order(47, OrderStatus::Cancelled, PaymentStatus::Paid),
        ];
        let h = harness(orders.clone(), Courier::Books("AWB1"), false);
        for before in orders {
            let err = h.workflow.execute(before.id, reject("Customer request")).await.unwrap_err();
            assert!(err.to_string().contains(&before.status.to_string()), "{err}");
            assert_eq!(h.store.order(before.id).unwrap(), before);
            assert!(h.history(before.id).await.is_empty());
            assert!(h.emails(before.id).await.is_empty());
        }
        assert!(h.mailer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reject_paid_order_marks_refund_pending() {
        let orders = vec![
            sample_order(1, OrderStatus::Confirmed, PaymentStatus::Paid),
            sample_order(2, OrderStatus::Pending, PaymentStatus::Cod),
        ];
        let h = harness(orders, Courier::Books("AWB1"), false);

        let outcome = h.workflow.execute(1, reject("Item damaged in warehouse")).await.unwrap();
        assert_eq!(outcome.new_status(), OrderStatus::Cancelled);
        let paid = h.store.order(1).unwrap();
        assert_eq!(paid.refund_status, Some(RefundStatus::Pending));
        assert_eq!(paid.refund_amount.as_ref(), Some(&paid.total));
        assert_eq!(paid.rejection_reason.as_deref(), Some("Item damaged in warehouse"));
        assert!(paid.rejected_at.is_some());
        assert!(h.mailer.sent.lock()[0].html.contains("refund"));

        h.workflow.execute(2, reject("Address incomplete")).await.unwrap();
        let cod = h.store.order(2).unwrap();
        assert_eq!(cod.status, OrderStatus::Cancelled);
        assert_eq!(cod.refund_status, None);
        assert_eq!(cod.refund_amount, None);
        assert_eq!(h.history(2).await[0].reason.as_deref(), Some("Address incomplete"));
    }

    #[tokio::test]
    async fn test_ready_to_dispatch_booking_failure_leaves_order_untouched() {
        let before = sample_order(44, OrderStatus::Confirmed, PaymentStatus::Paid);
        let h = harness(vec![before.clone()], Courier::Declines("Pincode not serviceable"), false);

        let err = h.workflow.execute(44, OrderAction::ReadyToDispatch { notes: None }).await.unwrap_err();
        assert!(matches!(err, OrderError::Shipping(_)));
        assert!(err.to_string().contains("Pincode not serviceable"));
        assert_eq!(h.store.order(44).unwrap(), before);
        assert!(h.history(44).await.is_empty());
        assert!(h.emails(44).await.is_empty());
    }

    #[tokio::test]
    async fn test_ready_to_dispatch_books_and_records_shipment() {
        let h = harness(vec![sample_order(45, OrderStatus::Confirmed, PaymentStatus::Paid)], Courier::Books("AWB123"), false);

        let outcome = h.workflow.execute(45, OrderAction::ReadyToDispatch { notes: None }).await.unwrap();
        assert_eq!(outcome.new_status(), OrderStatus::ReadyToDispatch);
        assert_eq!(outcome.shipment().map(|s| s.awb_code.as_str()), Some("AWB123"));

        let stored = h.store.order(45).unwrap();
        assert_eq!(stored.status, OrderStatus::ReadyToDispatch);
        assert_eq!(stored.shipment.as_ref().unwrap().awb_code, "AWB123");
        assert!(stored.dispatched_at.is_some());

        let history = h.history(45).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_status, Some(OrderStatus::Confirmed));
        assert_eq!(history[0].metadata["awb_code"], "AWB123");
        assert_eq!(history[0].metadata["courier_name"], "Delhivery");
        assert_eq!(h.emails(45).await[0].email_type, EmailKind::OrderReadyToDispatch);
    }

    #[tokio::test]
    async fn test_ready_to_dispatch_from_wrong_state_never_calls_courier() {
        let h = harness(vec![sample_order(9, OrderStatus::Pending, PaymentStatus::Paid)], Courier::Books("AWB9"), false);
        let err = h.workflow.execute(9, OrderAction::ReadyToDispatch { notes: None }).await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { action: "ready_to_dispatch", status: OrderStatus::Pending }));
        assert_eq!(h.shipping.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ready_to_dispatch_timeout_is_a_failure() {
        let before = sample_order(10, OrderStatus::Processing, PaymentStatus::Cod);
        let h = harness(vec![before.clone()], Courier::Hangs, false);
        let err = h.workflow.execute(10, OrderAction::ReadyToDispatch { notes: None }).await.unwrap_err();
        assert!(matches!(err, OrderError::ShippingTimeout(_)));
        assert_eq!(h.store.order(10).unwrap(), before);
    }

    #[tokio::test]
    async fn test_email_failure_does_not_fail_accept() {
        let h = harness(vec![sample_order(11, OrderStatus::Pending, PaymentStatus::Paid)], Courier::Books("AWB1"), true);
        let outcome = h.workflow.execute(11, OrderAction::Accept { notes: None }).await.unwrap();
        assert_eq!(outcome.new_status(), OrderStatus::Confirmed);
        assert_eq!(h.store.order(11).unwrap().status, OrderStatus::Confirmed);

        let emails = h.emails(11).await;
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].status, EmailStatus::Failed);
        assert!(emails[0].error_message.as_deref().unwrap().contains("connection reset"));
        assert_eq!(h.history(11).await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_customer_email_is_logged_as_failed() {
        let mut order = sample_order(12, OrderStatus::Pending, PaymentStatus::Cod);
        order.customer.email = None;
        let h = harness(vec![order], Courier::Books("AWB1"), false);
        h.workflow.execute(12, OrderAction::Accept { notes: None }).await.unwrap();
        let emails = h.emails(12).await;
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].status, EmailStatus::Failed);
        assert_eq!(emails[0].recipient, "");
        assert!(h.mailer.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_update_status_is_verbatim_and_silent() {
        let h = harness(vec![sample_order(13, OrderStatus::Shipped, PaymentStatus::Paid)], Courier::Books("AWB1"), false);
        let action = OrderAction::UpdateStatus {
            new_status: OrderStatus::RtoInitiated,
            reason: Some("Customer refused delivery".into()),
            notes: Some("call customer".into()),
        };
        let outcome = h.workflow.execute(13, action).await.unwrap();
        assert_eq!(outcome.transition, Transition { from: OrderStatus::Shipped, to: OrderStatus::RtoInitiated });
        let stored = h.store.order(13).unwrap();
        assert_eq!(stored.admin_notes.as_deref(), Some("call customer"));
        let history = h.history(13).await;
        assert_eq!(history[0].reason.as_deref(), Some("Customer refused delivery"));
        assert!(h.emails(13).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = harness(vec![], Courier::Books("AWB1"), false);
        let err = h.workflow.execute(404, OrderAction::Accept { notes: None }).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(404)));
    }

    /// Lets another writer move the order right after it is read.
    struct RacingStore { inner: Arc<MemoryStore>, moves_to: OrderStatus }

    #[async_trait]
    impl OrderStore for RacingStore {
        async fn get(&self, id: i64) -> std::result::Result<Option<Order>, StoreError> {
            let snapshot = self.inner.get(id).await?;
            if let Some(mut other) = snapshot.clone() {
                other.status = self.moves_to;
                self.inner.insert_order(other);
            }
            Ok(snapshot)
        }
        async fn find_by_awb(&self, awb: &str) -> std::result::Result<Option<Order>, StoreError> { self.inner.find_by_awb(awb).await }
        async fn list(&self, f: &OrderFilter) -> std::result::Result<(Vec<Order>, i64), StoreError> { self.inner.list(f).await }
        async fn update_if_status(&self, o: &Order, expected: OrderStatus) -> std::result::Result<bool, StoreError> {
            self.inner.update_if_status(o, expected).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_change_is_reported_and_nothing_recorded() {
        let h = harness(vec![sample_order(14, OrderStatus::Pending, PaymentStatus::Paid)], Courier::Books("AWB1"), false);
        let deps = Collaborators {
            orders: Arc::new(RacingStore { inner: h.store.clone(), moves_to: OrderStatus::Cancelled }),
            history: h.store.clone(), email_log: h.store.clone(), shipping: h.shipping.clone(), mailer: h.mailer.clone(),
        };
        let workflow = OrderWorkflow::new(deps, "Animart", Duration::from_millis(100));

        let err = workflow.execute(14, OrderAction::Accept { notes: None }).await.unwrap_err();
        assert!(matches!(err, OrderError::ConcurrentModification { order_id: 14, expected: OrderStatus::Pending }));
        assert_eq!(h.store.order(14).unwrap().status, OrderStatus::Cancelled);
        assert!(h.history(14).await.is_empty());
        assert!(h.emails(14).await.is_empty());
    }
}
