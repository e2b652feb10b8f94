//! Outbound collaborators: courier aggregator and transactional email.
pub mod email;
pub mod shipping;

pub use email::{DisabledEmailSender, EmailError, EmailMessage, EmailSender, HttpEmailSender};
pub use shipping::{HttpShippingProvider, ShipmentRequest, ShippingError, ShippingProvider, UnconfiguredShipping};
