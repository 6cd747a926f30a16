//! Tenant email notifications.
//!
//! The dispatcher listens on the event bus and emails the tenant when a bill
//! is created, paid, flagged overdue or charged a fee. Delivery is best
//! effort: failures are logged and never reach the billing operation that
//! raised the event.

use crate::config::NotificationConfig;
use crate::domain::clients::Client;
use crate::domain::ledger::BillLedger;
use crate::error::{BillingError, Result};
use crate::events::BillingEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one message and return the provider's message id.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    id: String,
}

/// Sends through an HTTP email API that accepts `{from, to, subject, html}`
/// and answers with `{id}`.
pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpEmailSender {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| BillingError::Notification {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            from_address: config.from_address.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<String> {
        let body = SendEmailRequest {
            from: &self.from_address,
            to: [to],
            subject,
            html,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| BillingError::Notification {
            message: format!("email request failed: {}", e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Notification {
                message: format!("email API returned {}: {}", status, text),
            });
        }

        let parsed: SendEmailResponse =
            response.json().await.map_err(|e| BillingError::Notification {
                message: format!("unexpected email API response: {}", e),
            })?;
        Ok(parsed.id)
    }
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _html: &str) -> Result<String> {
        let id = format!("log-{}", uuid::Uuid::new_v4());
        info!(to, subject, message_id = %id, "Email notification (not sent)");
        Ok(id)
    }
}

pub fn sender_from_config(config: &NotificationConfig) -> Result<Arc<dyn EmailSender>> {
    if config.enabled {
        Ok(Arc::new(HttpEmailSender::new(config)?))
    } else {
        Ok(Arc::new(LogEmailSender))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render(event: &BillingEvent, client: &Client) -> EmailMessage {
    let bill = event.bill();
    let period = bill
        .fee_period()
        .map(|p| p.to_string())
        .unwrap_or_else(|| bill.start_date().to_string());
    let due = bill
        .due_date()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let resource = escape_html(bill.assigned_resource());

    let (subject, lead) = match event {
        BillingEvent::BillCreated(_) => (
            format!("New bill for {} ({})", bill.assigned_resource(), period),
            format!("A new bill has been issued for {}.", resource),
        ),
        BillingEvent::BillPaid(_) => (
            format!("Payment received for {} ({})", bill.assigned_resource(), period),
            format!("Thank you, we have received your payment for {}.", resource),
        ),
        BillingEvent::BillOverdue(_) => (
            format!("Bill overdue for {} ({})", bill.assigned_resource(), period),
            format!("Your bill for {} was due on {} and is now overdue.", resource, due),
        ),
        BillingEvent::FeeApplied { kind, amount, .. } => (
            format!("Fee added to your bill for {} ({})", bill.assigned_resource(), period),
            format!("A {} fee of {} was added to your bill for {}.", kind, amount, resource),
        ),
    };

    let fees = bill.fees();
    let html = format!(
        "<p>Hello {name},</p>\
         <p>{lead}</p>\
         <table>\
         <tr><td>Period</td><td>{period}</td></tr>\
         <tr><td>Rent</td><td>{amount}</td></tr>\
         <tr><td>CUSA</td><td>{cusa}</td></tr>\
         <tr><td>Parking</td><td>{parking}</td></tr>\
         <tr><td>Late fee</td><td>{late}</td></tr>\
         <tr><td>Damage fee</td><td>{damage}</td></tr>\
         <tr><td><b>Total</b></td><td><b>{total}</b></td></tr>\
         <tr><td>Due</td><td>{due}</td></tr>\
         <tr><td>Status</td><td>{status}</td></tr>\
         </table>",
        name = escape_html(&client.name),
        lead = lead,
        period = escape_html(&period),
        amount = fees.amount,
        cusa = fees.cusa_fee,
        parking = fees.parking_fee,
        late = fees.late_fee,
        damage = fees.damage_fee,
        total = bill.total(),
        due = due,
        status = bill.status(),
    );

    EmailMessage { subject, html }
}

/// Turns bus events into tenant emails.
pub struct NotificationDispatcher {
    ledger: Arc<BillLedger>,
    sender: Arc<dyn EmailSender>,
}

impl NotificationDispatcher {
    pub fn new(ledger: Arc<BillLedger>, sender: Arc<dyn EmailSender>) -> Self {
        Self { ledger, sender }
    }

    /// Returns the message id, or `None` when the tenant has no email on file.
    pub async fn notify(&self, event: &BillingEvent) -> Result<Option<String>> {
        let client = self.ledger.get_client(event.bill().client_id()).await?;
        let Some(email) = client.email.as_deref() else {
            debug!(client_id = %client.id, event = event.name(), "Client has no email, skipping notification");
            return Ok(None);
        };

        let message = render(event, &client);
        let id = self.sender.send(email, &message.subject, &message.html).await?;
        info!(
            client_id = %client.id,
            bill_id = %event.bill().id(),
            event = event.name(),
            message_id = %id,
            "Sent billing notification"
        );
        Ok(Some(id))
    }

    /// Consume events until the bus shuts down.
    pub fn spawn(self, mut receiver: broadcast::Receiver<BillingEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting notification dispatcher");
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.notify(&event).await {
                            error!(
                                bill_id = %event.bill().id(),
                                event = event.name(),
                                "Failed to send billing notification: {}",
                                e
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Notification dispatcher lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Notification dispatcher stopped");
        })
    }
}
