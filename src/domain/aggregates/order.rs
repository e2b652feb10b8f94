//! Order Aggregate
//!
//! An order is created at checkout in `pending` and afterwards only changes
//! through the transition methods below. Every method validates first and
//! mutates second, so a returned error leaves the order untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::domain::value_objects::{Money, Reason};
use crate::OrderError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub subtotal: Money,
    pub shipping_cost: Money,
    pub total: Money,
    pub shipment: Option<Shipment>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub refund_status: Option<RefundStatus>,
    pub refund_amount: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PendingReview,
    Confirmed,
    Processing,
    ReadyToDispatch,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    RtoInitiated,
    RtoDelivered,
}

impl OrderStatus {
    /// Comma separated list of every status, for error messages.
    pub fn all_names() -> String {
        Self::iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus { Paid, Cod, Pending }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefundStatus { Pending, Processed, Failed }

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer { pub name: String, pub email: Option<String>, pub phone: Option<String>, pub address: ShippingAddress }

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddress { pub line1: String, pub line2: Option<String>, pub city: String, pub state: String, pub pincode: String, pub country: String }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem { pub product_id: i64, pub name: String, pub quantity: u32, pub unit_price: Money }

impl LineItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

/// Courier booking details, present once the order is ready to dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: String,
    pub awb_code: String,
    pub courier_name: String,
    pub label_url: Option<String>,
    pub tracking_url: Option<String>,
    pub expected_delivery: Option<String>,
}

/// A committed status change: `from` is what the order held when it was read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition { pub from: OrderStatus, pub to: OrderStatus }

impl Order {
    pub fn accept(&mut self, notes: Option<String>, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::PendingReview) {
            return Err(self.illegal("accept"));
        }
        if !matches!(self.payment_status, PaymentStatus::Paid | PaymentStatus::Cod) {
            return Err(OrderError::PaymentNotSettled(self.payment_status));
        }
        let from = self.status;
        self.status = OrderStatus::Confirmed;
        self.accepted_at = Some(now);
        if notes.is_some() { self.admin_notes = notes; }
        self.touch(now);
        Ok(Transition { from, to: self.status })
    }

    pub fn reject(&mut self, reason: &Reason, notes: Option<String>, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        if matches!(self.status, OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Cancelled) {
            return Err(self.illegal("reject"));
        }
        let from = self.status;
        self.status = OrderStatus::Cancelled;
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason.to_string());
        self.cancellation_reason = Some(reason.to_string());
        if self.payment_status == PaymentStatus::Paid {
            self.refund_status = Some(RefundStatus::Pending);
            self.refund_amount = Some(self.total.clone());
        }
        if notes.is_some() { self.admin_notes = notes; }
        self.touch(now);
        Ok(Transition { from, to: self.status })
    }

    /// Checked before any courier booking is attempted.
    pub fn ensure_dispatchable(&self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Confirmed | OrderStatus::Processing => Ok(()),
            _ => Err(self.illegal("ready_to_dispatch")),
        }
    }

    pub fn mark_ready_to_dispatch(&mut self, shipment: Shipment, notes: Option<String>, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        self.ensure_dispatchable()?;
        let from = self.status;
        self.status = OrderStatus::ReadyToDispatch;
        self.shipment = Some(shipment);
        self.dispatched_at = Some(now);
        if notes.is_some() { self.admin_notes = notes; }
        self.touch(now);
        Ok(Transition { from, to: self.status })
    }

    /// Unchecked status override used by admins and by courier tracking.
    pub fn set_status(&mut self, status: OrderStatus, notes: Option<String>, now: DateTime<Utc>) -> Transition {
        let from = self.status;
        self.status = status;
        if status == OrderStatus::Delivered && self.delivered_at.is_none() { self.delivered_at = Some(now); }
        if notes.is_some() { self.admin_notes = notes; }
        self.touch(now);
        Transition { from, to: status }
    }

    /// Forward move reported by the courier. `occurred_at` is the courier's
    /// own clock and only dates the delivery; `updated_at` stays ours.
    pub fn apply_courier_status(&mut self, status: OrderStatus, occurred_at: DateTime<Utc>, now: DateTime<Utc>) -> Transition {
        let from = self.status;
        self.status = status;
        if status == OrderStatus::Delivered && self.delivered_at.is_none() { self.delivered_at = Some(occurred_at); }
        self.touch(now);
        Transition { from, to: status }
    }

    pub fn refund_pending(&self) -> bool { self.refund_status == Some(RefundStatus::Pending) }

    fn illegal(&self, action: &'static str) -> OrderError {
        OrderError::InvalidTransition { action, status: self.status }
    }

    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}
