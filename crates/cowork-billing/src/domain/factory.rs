use crate::domain::bill::{Bill, NewBill};
use crate::domain::clients::{Assignment, Client};
use crate::domain::clock::BillingClock;
use crate::domain::fee_schedule::FeeSchedule;
use crate::domain::ledger::BillLedger;
use crate::domain::types::{ClientId, ServiceType};
use crate::error::{BillingError, Result};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info};

/// One assignment the billing cycle could not bill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    pub client_id: ClientId,
    pub resource: String,
    pub message: String,
}

/// Outcome of [`BillFactory::run_billing_cycle`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub created: usize,
    pub already_billed: usize,
    pub failures: Vec<CycleFailure>,
}

impl CycleReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Builds new bills for a tenant's active assignments.
pub struct BillFactory {
    ledger: Arc<BillLedger>,
    schedule: Arc<FeeSchedule>,
    clock: BillingClock,
}

impl BillFactory {
    pub fn new(ledger: Arc<BillLedger>, schedule: Arc<FeeSchedule>, clock: BillingClock) -> Self {
        Self {
            ledger,
            schedule,
            clock,
        }
    }

    /// The assignment in force at `period_start`, or the most recent one for
    /// the resource when none is.
    fn select_assignment<'a>(
        client: &'a Client,
        assigned_resource: &str,
        service_type: ServiceType,
        period_start: NaiveDate,
    ) -> Option<&'a Assignment> {
        client
            .assignments
            .iter()
            .filter(|a| a.resource == assigned_resource && a.service_type == service_type)
            .find(|a| a.covers(period_start))
            .or_else(|| client.find_assignment(assigned_resource, service_type))
    }

    pub async fn create_bill(
        &self,
        client_id: &ClientId,
        assigned_resource: &str,
        service_type: ServiceType,
        period_start: NaiveDate,
    ) -> Result<Bill> {
        let defaults = self.schedule.resolve(service_type, assigned_resource)?;

        let client = self.ledger.get_client(client_id).await?;
        if !client.active {
            return Err(BillingError::ClientInactive {
                id: client_id.to_string(),
            });
        }

        let not_assigned = || BillingError::AssignmentNotFound {
            client_id: client_id.to_string(),
            resource: assigned_resource.to_string(),
            service_type: service_type.to_string(),
        };
        let assignment = Self::select_assignment(&client, assigned_resource, service_type, period_start)
            .ok_or_else(not_assigned)?;

        if period_start < assignment.start_date {
            return Err(BillingError::PeriodBeforeAssignment {
                client_id: client_id.to_string(),
                period_start: period_start.to_string(),
                assignment_start: assignment.start_date.to_string(),
            });
        }
        if assignment.end_date.map(|end| period_start > end).unwrap_or(false) {
            return Err(not_assigned());
        }

        let bill = Bill::issue(NewBill {
            client_id: client_id.clone(),
            assigned_resource: assigned_resource.to_string(),
            service_type,
            fees: defaults.components(),
            fee_period: self.clock.fee_period(period_start, defaults.cadence),
            start_date: period_start,
            due_date: self.clock.compute_due_date(period_start)?,
            created_at: Utc::now(),
        })?;

        self.ledger.insert_new_bill(&bill).await?;
        Ok(bill)
    }

    /// Bill the current period of every active assignment of every active
    /// client. Periods that already have a bill are counted, not re-billed,
    /// so running the cycle again the same day changes nothing.
    pub async fn run_billing_cycle(&self, today: NaiveDate) -> Result<CycleReport> {
        let clients = self.ledger.list_active_clients().await?;
        let mut report = CycleReport::default();

        for client in &clients {
            for assignment in client.active_assignments(today) {
                match self.bill_current_period(client, assignment, today).await {
                    Ok(bill) => {
                        report.created += 1;
                        info!(
                            bill_id = %bill.id(),
                            client_id = %client.id,
                            resource = %assignment.resource,
                            "Billing cycle created bill"
                        );
                    }
                    Err(BillingError::DuplicatePeriod { .. }) => report.already_billed += 1,
                    Err(e) => {
                        error!(
                            client_id = %client.id,
                            resource = %assignment.resource,
                            "Billing cycle failed for assignment: {}",
                            e
                        );
                        report.failures.push(CycleFailure {
                            client_id: client.id.clone(),
                            resource: assignment.resource.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            clients = clients.len(),
            created = report.created,
            already_billed = report.already_billed,
            failed = report.failed(),
            "Billing cycle finished"
        );
        Ok(report)
    }

    async fn bill_current_period(
        &self,
        client: &Client,
        assignment: &Assignment,
        today: NaiveDate,
    ) -> Result<Bill> {
        let cadence = self
            .schedule
            .resolve(assignment.service_type, &assignment.resource)?
            .cadence;
        let period_start = self
            .clock
            .period_start_containing(today, cadence)?
            .max(assignment.start_date);

        self.create_bill(&client.id, &assignment.resource, assignment.service_type, period_start)
            .await
    }
}
