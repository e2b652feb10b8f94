//! Courier aggregator booking

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::domain::aggregates::{Order, PaymentStatus, Shipment, ShippingAddress};

#[derive(Debug, Error)]
pub enum ShippingError {
    /// The provider answered and refused the booking; message is theirs.
    #[error("{0}")]
    Rejected(String),
    #[error("shipping provider unreachable: {0}")]
    Transport(String),
    #[error("shipping provider is not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRequest {
    pub order_id: i64,
    pub order_number: String,
    /// Same order, same key: repeated calls must not book twice.
    #[serde(skip)]
    pub idempotency_key: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub address: ShippingAddress,
    pub items: Vec<ShipmentItem>,
    pub payment_method: &'static str,
    pub sub_total: Decimal,
    pub cod_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentItem { pub name: String, pub sku: String, pub units: u32, pub selling_price: Decimal }

impl ShipmentRequest {
    pub fn from_order(order: &Order) -> Self {
        let cod = order.payment_status == PaymentStatus::Cod;
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            idempotency_key: format!("rtd-{}", order.order_number),
            customer_name: order.customer.name.clone(),
            customer_phone: order.customer.phone.clone(),
            customer_email: order.customer.email.clone(),
            address: order.customer.address.clone(),
            items: order.items.iter().map(|i| ShipmentItem {
                name: i.name.clone(),
                sku: format!("P{}", i.product_id),
                units: i.quantity,
                selling_price: i.unit_price.amount(),
            }).collect(),
            payment_method: if cod { "cod" } else { "prepaid" },
            sub_total: order.total.amount(),
            cod_amount: if cod { order.total.amount() } else { Decimal::ZERO },
        }
    }
}

#[async_trait]
pub trait ShippingProvider: Send + Sync {
    async fn book_shipment(&self, request: &ShipmentRequest) -> Result<Shipment, ShippingError>;
}

/// Wire shape of the aggregator's booking answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookingResponse {
    #[serde(default)]
    success: bool,
    shipment_id: Option<String>,
    awb_code: Option<String>,
    courier_name: Option<String>,
    label_url: Option<String>,
    tracking_url: Option<String>,
    expected_delivery: Option<String>,
    error: Option<String>,
}

impl BookingResponse {
    fn into_shipment(self) -> Result<Shipment, ShippingError> {
        if !self.success {
            return Err(ShippingError::Rejected(self.error.unwrap_or_else(|| "shipment booking was declined".to_string())));
        }
        let awb_code = self.awb_code.filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ShippingError::Rejected("booking succeeded without an AWB code".to_string()))?;
        Ok(Shipment {
            shipment_id: self.shipment_id.unwrap_or_default(),
            awb_code,
            courier_name: self.courier_name.unwrap_or_else(|| "Unassigned".to_string()),
            label_url: self.label_url,
            tracking_url: self.tracking_url,
            expected_delivery: self.expected_delivery,
        })
    }
}

pub struct HttpShippingProvider {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpShippingProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, ShippingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()
            .map_err(|e| ShippingError::Transport(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), token })
    }
}

#[async_trait]
impl ShippingProvider for HttpShippingProvider {
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    async fn book_shipment(&self, request: &ShipmentRequest) -> Result<Shipment, ShippingError> {
        let mut call = self.client.post(format!("{}/shipments", self.base_url))
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(request);
        if let Some(token) = &self.token { call = call.bearer_auth(token); }

        let response = call.send().await.map_err(|e| ShippingError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| ShippingError::Transport(e.to_string()))?;
        let parsed = serde_json::from_str::<BookingResponse>(&body);

        let result = match parsed {
            Ok(r) if status.is_success() => r.into_shipment(),
            Ok(BookingResponse { error: Some(error), .. }) => Err(ShippingError::Rejected(error)),
            _ if status.is_success() => Err(ShippingError::Transport(format!("unreadable booking response: {body}"))),
            _ => Err(ShippingError::Rejected(format!("shipping provider returned HTTP {status}"))),
        };
        match &result {
            Ok(s) => info!(awb = %s.awb_code, courier = %s.courier_name, "shipment booked"),
            Err(e) => warn!(error = %e, "shipment booking failed"),
        }
        result
    }
}

/// Stand-in used when no aggregator is configured; every booking fails.
pub struct UnconfiguredShipping;

#[async_trait]
impl ShippingProvider for UnconfiguredShipping {
    async fn book_shipment(&self, _request: &ShipmentRequest) -> Result<Shipment, ShippingError> {
        Err(ShippingError::NotConfigured)
    }
}
