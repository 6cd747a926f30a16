use crate::domain::types::{BillId, BillStatus, ClientId, FeeKind, FeePeriod, Money, ServiceType};
use crate::error::{BillingError, Result};
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};

/// Charge components of a bill. The total is always derived from these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeComponents {
    pub amount: Money,
    pub cusa_fee: Money,
    pub parking_fee: Money,
    pub late_fee: Money,
    pub damage_fee: Money,
}

impl FeeComponents {
    /// Recurring components only; penalties start at zero.
    pub fn recurring(amount: Money, cusa_fee: Money, parking_fee: Money) -> Self {
        Self {
            amount,
            cusa_fee,
            parking_fee,
            late_fee: Money::ZERO,
            damage_fee: Money::ZERO,
        }
    }

    /// Sum of all components. Fails when the sum does not fit in a decimal.
    pub fn total(&self) -> Result<Money> {
        [
            self.cusa_fee,
            self.parking_fee,
            self.late_fee,
            self.damage_fee,
        ]
        .into_iter()
        .try_fold(self.amount, |acc, component| acc.try_add("total", component))
    }

    pub fn penalty(&self, kind: FeeKind) -> Money {
        match kind {
            FeeKind::Late => self.late_fee,
            FeeKind::Damage => self.damage_fee,
        }
    }

    /// Penalties accumulate, they never replace the existing value.
    pub fn add_penalty(&mut self, kind: FeeKind, amount: Money) -> Result<()> {
        let field = kind.field_name();
        match kind {
            FeeKind::Late => self.late_fee = self.late_fee.try_add(field, amount)?,
            FeeKind::Damage => self.damage_fee = self.damage_fee.try_add(field, amount)?,
        }
        Ok(())
    }
}

/// Inputs for issuing a fresh bill
#[derive(Debug, Clone)]
pub struct NewBill {
    pub client_id: ClientId,
    pub assigned_resource: String,
    pub service_type: ServiceType,
    pub fees: FeeComponents,
    pub fee_period: FeePeriod,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// One invoice for one client, one resource, one period.
///
/// Fields are private so that every mutation goes through a transition method
/// that re-checks the lifecycle rules. Timestamps are kept at millisecond
/// precision, the precision documents are stored with.
#[derive(Debug, Clone, PartialEq)]
pub struct Bill {
    id: BillId,
    client_id: ClientId,
    assigned_resource: String,
    service_type: ServiceType,
    fees: FeeComponents,
    total: Money,
    fee_period: Option<FeePeriod>,
    start_date: NaiveDate,
    due_date: Option<NaiveDate>,
    status: BillStatus,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Bill {
    pub fn issue(new: NewBill) -> Result<Self> {
        let created_at = new.created_at.trunc_subsecs(3);
        let bill = Self {
            id: BillId::new(),
            client_id: new.client_id,
            assigned_resource: new.assigned_resource,
            service_type: new.service_type,
            total: new.fees.total()?,
            fees: new.fees,
            fee_period: Some(new.fee_period),
            start_date: new.start_date,
            due_date: Some(new.due_date),
            status: BillStatus::Unpaid,
            paid_at: None,
            created_at,
            updated_at: created_at,
        };
        bill.check_invariants()?;
        Ok(bill)
    }

    /// Rebuild a bill from persisted parts, rejecting any combination that
    /// violates the lifecycle invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: BillId,
        client_id: ClientId,
        assigned_resource: String,
        service_type: ServiceType,
        fees: FeeComponents,
        fee_period: Option<FeePeriod>,
        start_date: NaiveDate,
        due_date: Option<NaiveDate>,
        status: BillStatus,
        paid_at: Option<DateTime<Utc>>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let bill = Self {
            id,
            client_id,
            assigned_resource,
            service_type,
            total: fees.total()?,
            fees,
            fee_period,
            start_date,
            due_date,
            status,
            paid_at,
            created_at,
            updated_at,
        };
        bill.check_invariants()?;
        Ok(bill)
    }

    pub fn check_invariants(&self) -> Result<()> {
        if self.client_id.as_str().trim().is_empty() {
            return Err(BillingError::validation("clientId", "must not be empty"));
        }
        if self.assigned_resource.trim().is_empty() {
            return Err(BillingError::validation(
                "assignedResource",
                "must not be empty",
            ));
        }
        if let Some(due) = self.due_date {
            if due < self.start_date {
                return Err(BillingError::validation(
                    "dueDate",
                    format!("{} precedes start date {}", due, self.start_date),
                ));
            }
        }

        match self.status {
            BillStatus::Paid => match self.paid_at {
                Some(paid_at) if paid_at >= self.created_at => {}
                Some(paid_at) => {
                    return Err(BillingError::validation(
                        "paidAt",
                        format!("{} precedes creation at {}", paid_at, self.created_at),
                    ))
                }
                None => {
                    return Err(BillingError::validation(
                        "paidAt",
                        "paid bills must record when they were paid",
                    ))
                }
            },
            BillStatus::Overdue => {
                if self.due_date.is_none() {
                    return Err(BillingError::validation(
                        "dueDate",
                        "overdue bills must have a due date",
                    ));
                }
                if self.paid_at.is_some() {
                    return Err(BillingError::validation(
                        "paidAt",
                        "overdue bills cannot carry a payment time",
                    ));
                }
            }
            BillStatus::Unpaid => {
                if self.paid_at.is_some() {
                    return Err(BillingError::validation(
                        "paidAt",
                        "unpaid bills cannot carry a payment time",
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn id(&self) -> BillId {
        self.id
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn assigned_resource(&self) -> &str {
        &self.assigned_resource
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    pub fn fees(&self) -> &FeeComponents {
        &self.fees
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn fee_period(&self) -> Option<&FeePeriod> {
        self.fee_period.as_ref()
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn status(&self) -> BillStatus {
        self.status
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True once the calendar day of `now` is past the due date.
    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date
            .map(|due| now.date_naive() > due)
            .unwrap_or(false)
    }

    fn invalid_transition(&self, to: BillStatus) -> BillingError {
        BillingError::InvalidTransition {
            bill_id: self.id.to_string(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn mark_paid(&mut self, paid_at: DateTime<Utc>) -> Result<()> {
        let paid_at = paid_at.trunc_subsecs(3);
        if !self.status.can_transition_to(BillStatus::Paid) {
            return Err(self.invalid_transition(BillStatus::Paid));
        }
        if paid_at < self.created_at {
            return Err(BillingError::validation(
                "paidAt",
                format!("{} precedes creation at {}", paid_at, self.created_at),
            ));
        }

        self.status = BillStatus::Paid;
        self.paid_at = Some(paid_at);
        self.updated_at = Utc::now().trunc_subsecs(3).max(paid_at);
        Ok(())
    }

    /// Returns `false` when the bill was already overdue and nothing changed.
    pub fn mark_overdue(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.status {
            BillStatus::Overdue => return Ok(false),
            BillStatus::Paid => return Err(self.invalid_transition(BillStatus::Overdue)),
            BillStatus::Unpaid => {}
        }
        if !self.is_past_due(now) {
            return Err(BillingError::validation(
                "dueDate",
                match self.due_date {
                    Some(due) => format!("bill {} is not past its due date {}", self.id, due),
                    None => format!("bill {} has no due date", self.id),
                },
            ));
        }

        self.status = BillStatus::Overdue;
        self.updated_at = now.trunc_subsecs(3);
        Ok(true)
    }

    /// Add a penalty. The bill is left untouched when the new total would
    /// not be representable.
    pub fn apply_fee(&mut self, kind: FeeKind, amount: Money) -> Result<()> {
        let mut fees = self.fees;
        fees.add_penalty(kind, amount)?;
        self.total = fees.total()?;
        self.fees = fees;
        self.updated_at = Utc::now().trunc_subsecs(3);
        Ok(())
    }
}
