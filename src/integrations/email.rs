//! Transactional customer email

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::aggregates::Order;
use crate::domain::records::EmailKind;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email provider rejected message: {0}")]
    Rejected(String),
    #[error("email provider unreachable: {0}")]
    Transport(String),
    #[error("email delivery is not configured")]
    NotConfigured,
    #[error("order has no customer email address")]
    NoRecipient,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub kind: EmailKind,
    pub to: Option<String>,
    pub subject: String,
    pub html: String,
}

impl EmailMessage {
    pub fn accepted(order: &Order, store: &str) -> Self {
        let body = format!(
            "<p>Hi {name},</p><p>Good news! {store} has confirmed your order <strong>{number}</strong> \
             and we are packing it now.</p><p>Order total: {total}</p>{items}\
             <p>We will email you again as soon as it is ready to ship.</p>",
            name = escape(&order.customer.name), number = escape(&order.order_number), total = order.total,
            items = items_table(order), store = escape(store),
        );
        Self::build(EmailKind::OrderAccepted, order, format!("Your {store} order {} is confirmed", order.order_number), body)
    }

    pub fn rejected(order: &Order, store: &str) -> Self {
        let reason = order.rejection_reason.as_deref().unwrap_or("It could not be fulfilled");
        let refund = match (&order.refund_amount, order.refund_pending()) {
            (Some(amount), true) => format!(
                "<p>A refund of <strong>{amount}</strong> has been initiated to your original payment method. \
                 It usually arrives within 5-7 business days.</p>"
            ),
            _ => String::new(),
        };
        let body = format!(
            "<p>Hi {name},</p><p>We're sorry, your order <strong>{number}</strong> has been cancelled.</p>\
             <p>Reason: {reason}</p>{refund}<p>Reply to this email if you have any questions.</p>",
            name = escape(&order.customer.name), number = escape(&order.order_number), reason = escape(reason),
        );
        Self::build(EmailKind::OrderRejected, order, format!("Your {store} order {} has been cancelled", order.order_number), body)
    }

    pub fn ready_to_dispatch(order: &Order, store: &str) -> Self {
        let shipping = order.shipment.as_ref().map(|s| {
            let tracking = s.tracking_url.as_deref()
                .map(|url| format!("<p><a href=\"{}\">Track your package</a></p>", escape(url)))
                .unwrap_or_default();
            let eta = s.expected_delivery.as_deref()
                .map(|d| format!("<p>Expected delivery: {}</p>", escape(d)))
                .unwrap_or_default();
            format!("<p>Courier: {}<br>AWB: {}</p>{eta}{tracking}", escape(&s.courier_name), escape(&s.awb_code))
        }).unwrap_or_default();
        let body = format!(
            "<p>Hi {name},</p><p>Your order <strong>{number}</strong> is packed and waiting for courier pickup.</p>{shipping}",
            name = escape(&order.customer.name), number = escape(&order.order_number),
        );
        Self::build(EmailKind::OrderReadyToDispatch, order, format!("Your {store} order {} is ready to ship", order.order_number), body)
    }

    fn build(kind: EmailKind, order: &Order, subject: String, html: String) -> Self {
        let to = order.customer.email.clone().filter(|e| !e.trim().is_empty());
        Self { kind, to, subject, html }
    }
}

fn items_table(order: &Order) -> String {
    let rows: String = order.items.iter()
        .map(|i| format!("<tr><td>{}</td><td>{}</td><td>{}</td></tr>", escape(&i.name), i.quantity, i.line_total()))
        .collect();
    format!("<table><tr><th>Item</th><th>Qty</th><th>Amount</th></tr>{rows}</table>")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct SendEmailBody<'a> { from: &'a str, to: [&'a str; 1], subject: &'a str, html: &'a str }

impl HttpEmailSender {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>, timeout: Duration) -> Result<Self, EmailError> {
        let client = reqwest::Client::builder().timeout(timeout).build()
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(Self { client, api_url: api_url.into().trim_end_matches('/').to_string(), api_key: api_key.into(), from: from.into() })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let to = message.to.as_deref().ok_or(EmailError::NoRecipient)?;
        let body = SendEmailBody { from: &self.from, to: [to], subject: &message.subject, html: &message.html };
        let response = self.client.post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send().await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        if response.status().is_success() { return Ok(()); }
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        Err(EmailError::Rejected(format!("HTTP {status}: {detail}")))
    }
}

pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send(&self, _message: &EmailMessage) -> Result<(), EmailError> {
        Err(EmailError::NotConfigured)
    }
}
