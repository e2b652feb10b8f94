//! Append-only records kept beside an order: status history, email attempts
//! and courier tracking events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::domain::aggregates::OrderStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Actor { Admin, System }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub order_id: i64,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_by: Actor,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewStatusHistory {
    pub order_id: i64,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_by: Actor,
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailKind { OrderAccepted, OrderRejected, OrderReadyToDispatch }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailStatus { Sent, Failed }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailLogEntry {
    pub id: i64,
    pub order_id: i64,
    pub email_type: EmailKind,
    pub recipient: String,
    pub subject: String,
    pub status: EmailStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewEmailLog {
    pub order_id: i64,
    pub email_type: EmailKind,
    pub recipient: String,
    pub subject: String,
    pub status: EmailStatus,
    pub error_message: Option<String>,
}

/// Courier-reported shipment state, as received from the aggregator webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CourierStatus { PickedUp, InTransit, OutForDelivery, Delivered, RtoInitiated, RtoDelivered, Exception }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: i64,
    pub order_id: i64,
    pub awb_code: String,
    pub status: CourierStatus,
    pub location: Option<String>,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewTrackingEvent {
    pub order_id: i64,
    pub awb_code: String,
    pub status: CourierStatus,
    pub location: Option<String>,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
