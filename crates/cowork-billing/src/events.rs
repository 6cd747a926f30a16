//! Process-wide billing event bus.
//!
//! One bus is created by [`crate::service::BillingService`] at startup and
//! shared by `Arc`. Subscribers get a `broadcast` receiver; after
//! [`EventBus::shutdown`] no new events are accepted and receivers drain
//! what is left before seeing `Closed`.

use crate::domain::bill::Bill;
use crate::domain::types::{FeeKind, Money};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    BillCreated(Bill),
    BillPaid(Bill),
    BillOverdue(Bill),
    FeeApplied {
        bill: Bill,
        kind: FeeKind,
        amount: Money,
    },
}

impl BillingEvent {
    pub fn bill(&self) -> &Bill {
        match self {
            BillingEvent::BillCreated(bill)
            | BillingEvent::BillPaid(bill)
            | BillingEvent::BillOverdue(bill)
            | BillingEvent::FeeApplied { bill, .. } => bill,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BillingEvent::BillCreated(_) => "bill_created",
            BillingEvent::BillPaid(_) => "bill_paid",
            BillingEvent::BillOverdue(_) => "bill_overdue",
            BillingEvent::FeeApplied { .. } => "fee_applied",
        }
    }
}

pub struct EventBus {
    sender: Mutex<Option<broadcast::Sender<BillingEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<broadcast::Sender<BillingEvent>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns `None` once the bus has been shut down.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<BillingEvent>> {
        self.sender().as_ref().map(|s| s.subscribe())
    }

    /// Deliver to current subscribers; returns how many received it.
    pub fn publish(&self, event: BillingEvent) -> usize {
        let guard = self.sender();
        let Some(sender) = guard.as_ref() else {
            debug!(event = event.name(), "Event bus closed, dropping event");
            return 0;
        };

        let name = event.name();
        let bill_id = event.bill().id();
        match sender.send(event) {
            Ok(receivers) => {
                debug!(event = name, bill_id = %bill_id, receivers, "Published billing event");
                receivers
            }
            Err(_) => {
                debug!(event = name, bill_id = %bill_id, "No subscribers for billing event");
                0
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    pub fn shutdown(&self) {
        if self.sender().take().is_some() {
            info!("Billing event bus shut down");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
