//! Aggregates module
pub mod order;

pub use order::{Customer, LineItem, Order, OrderStatus, PaymentStatus, RefundStatus, Shipment, ShippingAddress, Transition};
