//! Animart order workflow service
//!
//! Admin back-office core for an anime-merchandise storefront.
//!
//! ## Features
//! - Order status workflow (accept, reject, ready to dispatch, status override)
//! - Courier booking on dispatch
//! - Transactional customer emails with an attempt log
//! - Append-only status history
//! - Courier tracking ingestion

pub mod api;
pub mod config;
pub mod domain;
pub mod integrations;
pub mod store;
pub mod tracking;
pub mod workflow;

use thiserror::Error;

use crate::domain::aggregates::{OrderStatus, PaymentStatus};
use crate::store::StoreError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum OrderError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Order {0} not found")]
    NotFound(i64),

    #[error("No order is shipping under AWB {0}")]
    UnknownAwb(String),

    #[error("Cannot {action} order with status '{status}'")]
    InvalidTransition { action: &'static str, status: OrderStatus },

    #[error("Cannot accept order: payment status is '{0}', expected paid or cod")]
    PaymentNotSettled(PaymentStatus),

    #[error("Order {order_id} was modified concurrently (expected status '{expected}'); reload and retry")]
    ConcurrentModification { order_id: i64, expected: OrderStatus },

    #[error("Shipment booking failed: {0}")]
    Shipping(String),

    #[error("Shipment booking timed out after {0}s")]
    ShippingTimeout(u64),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, OrderError>;
