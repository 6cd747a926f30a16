//! Serialization contract between the typed domain and the schema-less store.
//!
//! Decoding normalizes legacy documents (absent fee components read as zero)
//! and rejects anything that breaks the bill invariants, so readers never
//! have to default fields themselves.

use crate::domain::bill::{Bill, FeeComponents};
use crate::domain::clients::Client;
use crate::domain::types::{BillId, BillStatus, ClientId, FeePeriod, Money, ServiceType};
use crate::storage::{StoreError, StoreResult, StoredDocument};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamps are written as RFC 3339 UTC with millisecond precision so that
/// lexical order matches chronological order.
mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => super::serialize(dt, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            raw.map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}

/// Wire shape of `clients/{clientId}/bills/{billId}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillDocument {
    pub bill_id: BillId,
    pub client_id: ClientId,
    pub assigned_resource: String,
    pub service_type: ServiceType,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub cusa_fee: Option<Decimal>,
    #[serde(default)]
    pub parking_fee: Option<Decimal>,
    #[serde(default)]
    pub late_fee: Option<Decimal>,
    #[serde(default)]
    pub damage_fee: Option<Decimal>,
    #[serde(default)]
    pub fee_period: Option<FeePeriod>,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub status: BillStatus,
    #[serde(default, with = "timestamp::option")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Bill> for BillDocument {
    fn from(bill: &Bill) -> Self {
        let fees = bill.fees();
        Self {
            bill_id: bill.id(),
            client_id: bill.client_id().clone(),
            assigned_resource: bill.assigned_resource().to_string(),
            service_type: bill.service_type(),
            amount: Some(fees.amount.as_decimal()),
            cusa_fee: Some(fees.cusa_fee.as_decimal()),
            parking_fee: Some(fees.parking_fee.as_decimal()),
            late_fee: Some(fees.late_fee.as_decimal()),
            damage_fee: Some(fees.damage_fee.as_decimal()),
            fee_period: bill.fee_period().cloned(),
            start_date: bill.start_date(),
            due_date: bill.due_date(),
            status: bill.status(),
            paid_at: bill.paid_at(),
            created_at: bill.created_at(),
            updated_at: Some(bill.updated_at()),
        }
    }
}

impl BillDocument {
    pub fn into_bill(self) -> crate::error::Result<Bill> {
        let fee = |field: &str, value: Option<Decimal>| {
            Money::try_new(field, value.unwrap_or(Decimal::ZERO))
        };
        let fees = FeeComponents {
            amount: fee("amount", self.amount)?,
            cusa_fee: fee("cusaFee", self.cusa_fee)?,
            parking_fee: fee("parkingFee", self.parking_fee)?,
            late_fee: fee("lateFee", self.late_fee)?,
            damage_fee: fee("damageFee", self.damage_fee)?,
        };

        Bill::restore(
            self.bill_id,
            self.client_id,
            self.assigned_resource,
            self.service_type,
            fees,
            self.fee_period,
            self.start_date,
            self.due_date,
            self.status,
            self.paid_at,
            self.created_at,
            self.updated_at.unwrap_or(self.created_at),
        )
    }
}

/// Marker document that makes a client/resource/period triple unique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodClaimDocument {
    pub bill_id: BillId,
    pub client_id: ClientId,
    pub assigned_resource: String,
    pub fee_period: FeePeriod,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl PeriodClaimDocument {
    pub fn for_bill(bill: &Bill, fee_period: &FeePeriod) -> Self {
        Self {
            bill_id: bill.id(),
            client_id: bill.client_id().clone(),
            assigned_resource: bill.assigned_resource().to_string(),
            fee_period: fee_period.clone(),
            created_at: bill.created_at(),
        }
    }
}

fn malformed(doc: &StoredDocument, message: impl ToString) -> StoreError {
    StoreError::Malformed {
        path: doc.path.to_string(),
        message: message.to_string(),
    }
}

pub fn encode<T: Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Malformed {
        path: String::new(),
        message: e.to_string(),
    })
}

pub fn encode_bill(bill: &Bill) -> StoreResult<Value> {
    encode(&BillDocument::from(bill))
}

pub fn decode_bill(doc: &StoredDocument) -> StoreResult<Bill> {
    let raw: BillDocument =
        serde_json::from_value(doc.data.clone()).map_err(|e| malformed(doc, e))?;
    if raw.bill_id.to_string() != doc.path.id() {
        return Err(malformed(
            doc,
            format!("billId {} does not match document id", raw.bill_id),
        ));
    }
    raw.into_bill().map_err(|e| malformed(doc, e))
}

pub fn decode_client(doc: &StoredDocument) -> StoreResult<Client> {
    let client: Client = serde_json::from_value(doc.data.clone()).map_err(|e| malformed(doc, e))?;
    client.validate().map_err(|e| malformed(doc, e))?;
    Ok(client)
}
