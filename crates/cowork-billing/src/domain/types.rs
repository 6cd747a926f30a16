use crate::error::{BillingError, Result};
use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant identifier, as issued by the client directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bill identifier, opaque and assigned at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillId(Uuid);

impl BillId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for BillId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BillId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Non-negative currency amount.
///
/// Amounts are plain decimals with no minor-unit scaling; `5000` means five
/// thousand in the tenant's billing currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Option<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            None
        } else {
            Some(Self(amount.normalize()))
        }
    }

    /// Validate an amount at the API boundary, naming the offending field.
    pub fn try_new(field: &str, amount: Decimal) -> Result<Self> {
        Self::new(amount).ok_or_else(|| BillingError::invalid_amount(field, amount))
    }

    /// Parse user-supplied text such as `"200"` or `"12.50"`.
    pub fn parse(field: &str, raw: &str) -> Result<Self> {
        let amount =
            Decimal::from_str(raw.trim()).map_err(|_| BillingError::InvalidAmount {
                field: field.to_string(),
                amount: raw.to_string(),
            })?;
        Self::try_new(field, amount)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn checked_add(&self, other: Money) -> Option<Self> {
        self.0.checked_add(other.0).map(|sum| Self(sum.normalize()))
    }

    /// Add `other`, reporting overflow as an invalid amount for `field`.
    pub fn try_add(&self, field: &str, other: Money) -> Result<Self> {
        self.checked_add(other).ok_or_else(|| BillingError::InvalidAmount {
            field: field.to_string(),
            amount: format!("{} + {} overflows", self, other),
        })
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl TryFrom<Decimal> for Money {
    type Error = String;

    fn try_from(value: Decimal) -> std::result::Result<Self, Self::Error> {
        Money::new(value).ok_or_else(|| format!("amount must not be negative, got {}", value))
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of tenancy a bill is charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    DedicatedDesk,
    PrivateOffice,
    VirtualOffice,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [
        ServiceType::DedicatedDesk,
        ServiceType::PrivateOffice,
        ServiceType::VirtualOffice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::DedicatedDesk => "dedicated-desk",
            ServiceType::PrivateOffice => "private-office",
            ServiceType::VirtualOffice => "virtual-office",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dedicated-desk" | "dedicated_desk" => Ok(ServiceType::DedicatedDesk),
            "private-office" | "private_office" => Ok(ServiceType::PrivateOffice),
            "virtual-office" | "virtual_office" => Ok(ServiceType::VirtualOffice),
            other => Err(BillingError::Configuration {
                message: format!("unrecognized service type '{}'", other),
            }),
        }
    }
}

/// Bill lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Unpaid,
    Paid,
    Overdue,
}

impl BillStatus {
    pub fn can_transition_to(&self, next: BillStatus) -> bool {
        matches!(
            (self, next),
            (BillStatus::Unpaid, BillStatus::Paid)
                | (BillStatus::Unpaid, BillStatus::Overdue)
                | (BillStatus::Overdue, BillStatus::Paid)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Unpaid => "unpaid",
            BillStatus::Paid => "paid",
            BillStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for BillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unpaid" => Ok(BillStatus::Unpaid),
            "paid" => Ok(BillStatus::Paid),
            "overdue" => Ok(BillStatus::Overdue),
            other => Err(BillingError::validation(
                "status",
                format!("unknown bill status '{}'", other),
            )),
        }
    }
}

/// Penalty components an admin may add to a bill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Late,
    Damage,
}

impl FeeKind {
    pub fn field_name(&self) -> &'static str {
        match self {
            FeeKind::Late => "lateFee",
            FeeKind::Damage => "damageFee",
        }
    }
}

impl fmt::Display for FeeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeKind::Late => write!(f, "late"),
            FeeKind::Damage => write!(f, "damage"),
        }
    }
}

impl FromStr for FeeKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "late" => Ok(FeeKind::Late),
            "damage" => Ok(FeeKind::Damage),
            other => Err(BillingError::validation(
                "feeKind",
                format!("fee kind must be 'late' or 'damage', got '{}'", other),
            )),
        }
    }
}

/// Recurrence of a resource's billing periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingCadence {
    #[default]
    Monthly,
    Quarterly,
    Annual,
}

impl BillingCadence {
    fn months(&self) -> u32 {
        match self {
            BillingCadence::Monthly => 1,
            BillingCadence::Quarterly => 3,
            BillingCadence::Annual => 12,
        }
    }

    /// First day of the calendar-aligned period that contains `date`.
    pub fn period_start_containing(&self, date: NaiveDate) -> Option<NaiveDate> {
        let month = match self {
            BillingCadence::Monthly => date.month(),
            BillingCadence::Quarterly => ((date.month() - 1) / 3) * 3 + 1,
            BillingCadence::Annual => 1,
        };
        NaiveDate::from_ymd_opt(date.year(), month, 1)
    }

    /// First day of the period after the one containing `date`.
    pub fn next_period_start(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.period_start_containing(date)?
            .checked_add_months(Months::new(self.months()))
    }

    pub fn label(&self, date: NaiveDate) -> FeePeriod {
        let label = match self {
            BillingCadence::Monthly => date.format("%Y-%m").to_string(),
            BillingCadence::Quarterly => {
                format!("{}-Q{}", date.year(), (date.month() - 1) / 3 + 1)
            }
            BillingCadence::Annual => format!("{}", date.year()),
        };
        FeePeriod(label)
    }
}

impl fmt::Display for BillingCadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillingCadence::Monthly => write!(f, "monthly"),
            BillingCadence::Quarterly => write!(f, "quarterly"),
            BillingCadence::Annual => write!(f, "annual"),
        }
    }
}

/// Label of the billing cycle a bill covers, e.g. `2026-01` or `2026-Q1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeePeriod(String);

impl FeePeriod {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
