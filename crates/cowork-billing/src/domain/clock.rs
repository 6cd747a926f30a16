use crate::config::BillingRulesConfig;
use crate::domain::bill::Bill;
use crate::domain::ledger::BillLedger;
use crate::domain::types::{BillId, BillStatus, BillingCadence, FeePeriod};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, info, warn};

/// One bill the overdue sweep could not flag
#[derive(Debug)]
pub struct SweepFailure {
    pub bill_id: BillId,
    pub error: BillingError,
}

/// Outcome of [`BillingClock::sweep`]
#[derive(Debug, Default)]
pub struct SweepReport {
    pub transitioned: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Temporal rules of billing: due dates, overdue detection and period
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingClock {
    grace_period_days: u32,
}

impl Default for BillingClock {
    fn default() -> Self {
        Self::new(15)
    }
}

impl BillingClock {
    pub fn new(grace_period_days: u32) -> Self {
        Self { grace_period_days }
    }

    pub fn from_config(config: &BillingRulesConfig) -> Self {
        Self::new(config.grace_period_days)
    }

    pub fn grace_period_days(&self) -> u32 {
        self.grace_period_days
    }

    pub fn compute_due_date(&self, period_start: NaiveDate) -> Result<NaiveDate> {
        period_start
            .checked_add_days(Days::new(u64::from(self.grace_period_days)))
            .ok_or_else(|| {
                BillingError::validation(
                    "periodStart",
                    format!("{} is too far in the future", period_start),
                )
            })
    }

    pub fn is_overdue(&self, bill: &Bill, now: DateTime<Utc>) -> bool {
        bill.status() == BillStatus::Unpaid && bill.is_past_due(now)
    }

    pub fn fee_period(&self, period_start: NaiveDate, cadence: BillingCadence) -> FeePeriod {
        cadence.label(period_start)
    }

    pub fn period_start_containing(&self, date: NaiveDate, cadence: BillingCadence) -> Result<NaiveDate> {
        cadence
            .period_start_containing(date)
            .ok_or_else(|| BillingError::validation("date", format!("{} has no {} period", date, cadence)))
    }

    pub fn next_period_start(&self, start: NaiveDate, cadence: BillingCadence) -> Result<NaiveDate> {
        cadence
            .next_period_start(start)
            .ok_or_else(|| BillingError::validation("date", format!("no {} period follows {}", cadence, start)))
    }

    /// Flag every unpaid bill whose due date has passed at `now` as overdue.
    ///
    /// The report counts the bills this call transitioned. Bills that were
    /// paid or flagged by someone else in the meantime are skipped, so
    /// repeated or concurrent sweeps never double count. A bill that fails
    /// does not stop the sweep; it is listed in the report's failures.
    pub async fn sweep(&self, ledger: &BillLedger, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = ledger.list_overdue_candidates(now).await?;
        debug!(candidates = candidates.len(), now = %now, "Starting overdue sweep");

        let mut report = SweepReport::default();
        for (bill, doc) in candidates {
            if !self.is_overdue(&bill, now) {
                continue;
            }
            match ledger.mark_overdue_document(doc, now).await {
                Ok((_, true)) => report.transitioned += 1,
                Ok((_, false)) => {}
                Err(BillingError::InvalidTransition { .. }) => {
                    debug!(bill_id = %bill.id(), "Bill was paid before it could be flagged");
                }
                Err(error) => {
                    warn!(bill_id = %bill.id(), "Failed to flag bill overdue: {}", error);
                    report.failures.push(SweepFailure {
                        bill_id: bill.id(),
                        error,
                    });
                }
            }
        }

        info!(
            transitioned = report.transitioned,
            failed = report.failed(),
            now = %now,
            "Overdue sweep finished"
        );
        Ok(report)
    }
}
