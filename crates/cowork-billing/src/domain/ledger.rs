use crate::domain::bill::Bill;
use crate::domain::clients::Client;
use crate::domain::types::{BillId, BillStatus, ClientId, FeeKind, Money, ServiceType};
use crate::error::{BillingError, Result};
use crate::events::{BillingEvent, EventBus};
use crate::storage::documents::{decode_bill, decode_client, encode, encode_bill};
use crate::storage::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, OrderBy, PeriodClaimDocument,
    RetryPolicy, StoreError, StoredDocument, BILLS,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optional filters for [`BillLedger::list_by_client`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillFilter {
    pub assigned_resource: Option<String>,
    pub status: Option<BillStatus>,
    pub service_type: Option<ServiceType>,
}

impl BillFilter {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            assigned_resource: Some(resource.into()),
            ..Default::default()
        }
    }

    pub fn status(status: BillStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    fn to_field_filters(&self) -> Vec<FieldFilter> {
        let mut filters = Vec::new();
        if let Some(resource) = &self.assigned_resource {
            filters.push(FieldFilter::eq("assignedResource", resource.as_str()));
        }
        if let Some(status) = self.status {
            filters.push(FieldFilter::eq("status", status.as_str()));
        }
        if let Some(service_type) = self.service_type {
            filters.push(FieldFilter::eq("serviceType", service_type.as_str()));
        }
        filters
    }
}

/// Per-client aggregate shown on the admin dashboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBillingSummary {
    pub client_id: ClientId,
    pub as_of: NaiveDate,
    pub outstanding_total: Money,
    pub overdue_total: Money,
    pub paid_total: Money,
    pub unpaid_count: usize,
    pub overdue_count: usize,
    pub paid_count: usize,
    /// Unpaid bills already past due that the next sweep will flag
    pub past_due_unpaid_count: usize,
}

/// Authoritative store and query surface for bills and the tenants they
/// belong to.
///
/// Reads go through the [`RetryPolicy`]. Transitions are read-modify-write
/// cycles made atomic by a conditional update on the document version; a
/// version conflict re-reads and re-validates, anything else is reported
/// without retrying.
pub struct BillLedger {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    max_write_attempts: u32,
    events: Option<Arc<EventBus>>,
}

impl BillLedger {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            max_write_attempts: 5,
            events: None,
        }
    }

    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn publish(&self, event: BillingEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    // Client directory

    pub async fn register_client(&self, client: &Client) -> Result<()> {
        client.validate()?;
        let data = encode(client).map_err(|e| BillingError::from_store("register_client", true, e))?;
        self.store
            .set(&DocumentPath::client(&client.id), data)
            .await
            .map_err(|e| BillingError::from_store("register_client", true, e))?;

        info!(client_id = %client.id, active = client.active, "Registered client");
        Ok(())
    }

    pub async fn get_client(&self, client_id: &ClientId) -> Result<Client> {
        let path = DocumentPath::client(client_id);
        let doc = self
            .retry
            .read("get_client", || self.store.get(&path))
            .await
            .map_err(|e| BillingError::from_store("get_client", false, e))?
            .ok_or_else(|| BillingError::ClientNotFound {
                id: client_id.to_string(),
            })?;

        decode_client(&doc).map_err(|e| BillingError::from_store("get_client", false, e))
    }

    pub async fn list_active_clients(&self) -> Result<Vec<Client>> {
        let collection = CollectionPath::clients();
        let filters = [FieldFilter::eq("active", true)];
        let order = OrderBy::asc("id");
        let docs = self
            .retry
            .read("list_active_clients", || {
                self.store.query(&collection, &filters, Some(&order))
            })
            .await
            .map_err(|e| BillingError::from_store("list_active_clients", false, e))?;

        Ok(docs
            .iter()
            .filter_map(|doc| match decode_client(doc) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(path = %doc.path, "Skipping malformed client document: {}", e);
                    None
                }
            })
            .collect())
    }

    // Bills

    /// Persist a freshly issued bill together with its period claim.
    ///
    /// Both documents are created atomically, so two concurrent creations for
    /// the same client, resource and period leave exactly one bill behind.
    pub async fn insert_new_bill(&self, bill: &Bill) -> Result<()> {
        let fee_period = bill.fee_period().ok_or_else(|| {
            BillingError::validation("feePeriod", "new bills must carry a fee period")
        })?;
        let claim_path =
            DocumentPath::period_claim(bill.client_id(), bill.assigned_resource(), fee_period);

        let bill_data =
            encode_bill(bill).map_err(|e| BillingError::from_store("create_bill", true, e))?;
        let claim_data = encode(&PeriodClaimDocument::for_bill(bill, fee_period))
            .map_err(|e| BillingError::from_store("create_bill", true, e))?;

        let result = self
            .store
            .create_all(vec![
                (DocumentPath::bill(bill.client_id(), &bill.id()), bill_data),
                (claim_path, claim_data),
            ])
            .await;

        match result {
            Ok(()) => {}
            Err(StoreError::AlreadyExists { path }) => {
                info!(
                    client_id = %bill.client_id(),
                    resource = bill.assigned_resource(),
                    fee_period = %fee_period,
                    path = %path,
                    "Rejected duplicate bill for period"
                );
                return Err(BillingError::DuplicatePeriod {
                    client_id: bill.client_id().to_string(),
                    resource: bill.assigned_resource().to_string(),
                    fee_period: fee_period.to_string(),
                });
            }
            Err(e) => return Err(BillingError::from_store("create_bill", true, e)),
        }

        info!(
            bill_id = %bill.id(),
            client_id = %bill.client_id(),
            resource = bill.assigned_resource(),
            fee_period = %fee_period,
            total = %bill.total(),
            "Created bill"
        );
        self.publish(BillingEvent::BillCreated(bill.clone()));
        Ok(())
    }

    async fn find_bill_document(&self, bill_id: &BillId) -> Result<StoredDocument> {
        let filters = [FieldFilter::eq("billId", bill_id.to_string())];
        let docs = self
            .retry
            .read("get_bill", || self.store.query_group(BILLS, &filters, None))
            .await
            .map_err(|e| BillingError::from_store("get_bill", false, e))?;

        docs.into_iter()
            .find(|doc| doc.path.id() == bill_id.to_string())
            .ok_or_else(|| BillingError::BillNotFound {
                id: bill_id.to_string(),
            })
    }

    pub async fn get_bill(&self, bill_id: &BillId) -> Result<Bill> {
        let doc = self.find_bill_document(bill_id).await?;
        decode_bill(&doc).map_err(|e| BillingError::from_store("get_bill", false, e))
    }

    /// Bills of one client, most recently created first.
    pub async fn list_by_client(&self, client_id: &ClientId, filter: &BillFilter) -> Result<Vec<Bill>> {
        let collection = CollectionPath::bills(client_id);
        let filters = filter.to_field_filters();
        let order = OrderBy::desc("createdAt");
        let docs = self
            .retry
            .read("list_by_client", || {
                self.store.query(&collection, &filters, Some(&order))
            })
            .await
            .map_err(|e| BillingError::from_store("list_by_client", false, e))?;

        Ok(decode_bills(&docs))
    }

    /// Unpaid bills, across every client, whose due date has passed at `now`,
    /// each with the document it was decoded from.
    pub(crate) async fn list_overdue_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Bill, StoredDocument)>> {
        let filters = [FieldFilter::eq("status", BillStatus::Unpaid.as_str())];
        let order = OrderBy::asc("dueDate");
        let docs = self
            .retry
            .read("list_overdue_candidates", || {
                self.store.query_group(BILLS, &filters, Some(&order))
            })
            .await
            .map_err(|e| BillingError::from_store("list_overdue_candidates", false, e))?;

        Ok(docs
            .into_iter()
            .filter_map(|doc| match decode_bill(&doc) {
                Ok(bill) => Some((bill, doc)),
                Err(e) => {
                    warn!(path = %doc.path, "Skipping malformed bill document: {}", e);
                    None
                }
            })
            .filter(|(bill, _)| bill.status() == BillStatus::Unpaid && bill.is_past_due(now))
            .collect())
    }

    async fn modify<F>(&self, bill_id: &BillId, operation: &str, change: F) -> Result<(Bill, bool)>
    where
        F: FnMut(&mut Bill) -> Result<bool>,
    {
        let doc = self.find_bill_document(bill_id).await?;
        self.modify_document(doc, operation, change).await
    }

    /// Run one read-modify-write cycle starting from an already read document.
    ///
    /// `change` returns whether it modified the bill; when it did not, nothing
    /// is written. Returns the resulting bill and whether it was written.
    async fn modify_document<F>(
        &self,
        mut doc: StoredDocument,
        operation: &str,
        mut change: F,
    ) -> Result<(Bill, bool)>
    where
        F: FnMut(&mut Bill) -> Result<bool>,
    {
        let path = doc.path.clone();
        let bill_id = path.id().to_string();

        for attempt in 1..=self.max_write_attempts {
            let mut bill = decode_bill(&doc).map_err(|e| BillingError::from_store(operation, false, e))?;
            if !change(&mut bill)? {
                return Ok((bill, false));
            }

            let data = encode_bill(&bill).map_err(|e| BillingError::from_store(operation, true, e))?;
            match self.store.update(&path, data, doc.version).await {
                Ok(_) => return Ok((bill, true)),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(
                        bill_id = %bill_id,
                        operation,
                        attempt,
                        "Bill changed concurrently, re-reading"
                    );
                    doc = self
                        .retry
                        .read(operation, || self.store.get(&path))
                        .await
                        .map_err(|e| BillingError::from_store(operation, false, e))?
                        .ok_or_else(|| BillingError::BillNotFound {
                            id: bill_id.clone(),
                        })?;
                }
                Err(StoreError::NotFound { .. }) => {
                    return Err(BillingError::BillNotFound { id: bill_id })
                }
                Err(e) => return Err(BillingError::from_store(operation, true, e)),
            }
        }

        warn!(bill_id = %bill_id, operation, "Giving up after repeated version conflicts");
        Err(BillingError::Conflict {
            path: path.to_string(),
            attempts: self.max_write_attempts,
        })
    }

    /// `unpaid | overdue -> paid`
    pub async fn mark_paid(&self, bill_id: &BillId, paid_at: DateTime<Utc>) -> Result<Bill> {
        let (bill, _) = self
            .modify(bill_id, "mark_paid", |bill| bill.mark_paid(paid_at).map(|_| true))
            .await?;

        info!(
            bill_id = %bill_id,
            client_id = %bill.client_id(),
            paid_at = %paid_at,
            "Marked bill paid"
        );
        self.publish(BillingEvent::BillPaid(bill.clone()));
        Ok(bill)
    }

    pub async fn mark_overdue(&self, bill_id: &BillId) -> Result<Bill> {
        self.mark_overdue_at(bill_id, Utc::now())
            .await
            .map(|(bill, _)| bill)
    }

    /// `unpaid -> overdue` as of `now`. The flag is `false` when the bill was
    /// already overdue and nothing was written.
    pub async fn mark_overdue_at(&self, bill_id: &BillId, now: DateTime<Utc>) -> Result<(Bill, bool)> {
        let doc = self.find_bill_document(bill_id).await?;
        self.mark_overdue_document(doc, now).await
    }

    /// [`mark_overdue_at`](Self::mark_overdue_at) for a document the caller
    /// already holds, skipping the lookup by id.
    pub(crate) async fn mark_overdue_document(
        &self,
        doc: StoredDocument,
        now: DateTime<Utc>,
    ) -> Result<(Bill, bool)> {
        let (bill, changed) = self
            .modify_document(doc, "mark_overdue", |bill| bill.mark_overdue(now))
            .await?;

        if changed {
            info!(bill_id = %bill.id(), client_id = %bill.client_id(), "Marked bill overdue");
            self.publish(BillingEvent::BillOverdue(bill.clone()));
        } else {
            debug!(bill_id = %bill.id(), "Bill already overdue");
        }
        Ok((bill, changed))
    }

    /// Add a late or damage fee to the existing component.
    pub async fn apply_fee(&self, bill_id: &BillId, kind: FeeKind, amount: Decimal) -> Result<Bill> {
        let amount = Money::try_new(kind.field_name(), amount)?;
        let (bill, _) = self
            .modify(bill_id, "apply_fee", |bill| bill.apply_fee(kind, amount).map(|_| true))
            .await?;

        info!(
            bill_id = %bill_id,
            client_id = %bill.client_id(),
            kind = %kind,
            amount = %amount,
            total = %bill.total(),
            "Applied fee"
        );
        self.publish(BillingEvent::FeeApplied {
            bill: bill.clone(),
            kind,
            amount,
        });
        Ok(bill)
    }

    // Read models

    /// Bills keyed by resource, each group newest first.
    pub async fn group_by_resource(&self, client_id: &ClientId) -> Result<BTreeMap<String, Vec<Bill>>> {
        let bills = self.list_by_client(client_id, &BillFilter::default()).await?;
        let mut groups: BTreeMap<String, Vec<Bill>> = BTreeMap::new();
        for bill in bills {
            groups
                .entry(bill.assigned_resource().to_string())
                .or_default()
                .push(bill);
        }
        Ok(groups)
    }

    pub async fn summarize_client(&self, client_id: &ClientId, today: NaiveDate) -> Result<ClientBillingSummary> {
        let bills = self.list_by_client(client_id, &BillFilter::default()).await?;

        let mut summary = ClientBillingSummary {
            client_id: client_id.clone(),
            as_of: today,
            outstanding_total: Money::ZERO,
            overdue_total: Money::ZERO,
            paid_total: Money::ZERO,
            unpaid_count: 0,
            overdue_count: 0,
            paid_count: 0,
            past_due_unpaid_count: 0,
        };

        for bill in &bills {
            let total = bill.total();
            match bill.status() {
                BillStatus::Unpaid => {
                    summary.unpaid_count += 1;
                    summary.outstanding_total =
                        summary.outstanding_total.try_add("outstandingTotal", total)?;
                    if bill.due_date().map(|due| today > due).unwrap_or(false) {
                        summary.past_due_unpaid_count += 1;
                    }
                }
                BillStatus::Overdue => {
                    summary.overdue_count += 1;
                    summary.outstanding_total =
                        summary.outstanding_total.try_add("outstandingTotal", total)?;
                    summary.overdue_total =
                        summary.overdue_total.try_add("overdueTotal", total)?;
                }
                BillStatus::Paid => {
                    summary.paid_count += 1;
                    summary.paid_total =
                        summary.paid_total.try_add("paidTotal", total)?;
                }
            }
        }

        Ok(summary)
    }
}

/// Malformed documents are logged and left out of listings.
fn decode_bills(docs: &[StoredDocument]) -> Vec<Bill> {
    docs.iter()
        .filter_map(|doc| match decode_bill(doc) {
            Ok(bill) => Some(bill),
            Err(e) => {
                warn!(path = %doc.path, "Skipping malformed bill document: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bill::{FeeComponents, NewBill};
    use crate::domain::clients::Assignment;
    use crate::domain::types::FeePeriod;
    use crate::storage::MemoryDocumentStore;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger() -> (BillLedger, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        (BillLedger::new(store.clone(), RetryPolicy::no_delay(3)), store)
    }

    fn issue(client: &str, resource: &str, period: &str, month: u32) -> Bill {
        Bill::issue(NewBill {
            client_id: ClientId::new(client),
            assigned_resource: resource.to_string(),
            service_type: ServiceType::DedicatedDesk,
            fees: FeeComponents::recurring(
                Money::new(dec!(5000)).unwrap(),
                Money::new(dec!(500)).unwrap(),
                Money::ZERO,
            ),
            fee_period: FeePeriod::new(period),
            start_date: date(2026, month, 1),
            due_date: date(2026, month, 16),
            created_at: Utc.with_ymd_and_hms(2026, month, 1, 8, 0, 0).unwrap(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_client_directory() {
        let (ledger, _) = ledger();
        let active = Client::new(ClientId::new("c1"), "Acme").with_assignment(Assignment::new(
            "Desk-12",
            ServiceType::DedicatedDesk,
            date(2026, 1, 1),
        ));
        let mut inactive = Client::new(ClientId::new("c2"), "Gone");
        inactive.active = false;

        ledger.register_client(&active).await.unwrap();
        ledger.register_client(&inactive).await.unwrap();

        assert_eq!(ledger.get_client(&ClientId::new("c1")).await.unwrap(), active);
        assert!(matches!(
            ledger.get_client(&ClientId::new("nope")).await,
            Err(BillingError::ClientNotFound { .. })
        ));

        let listed = ledger.list_active_clients().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, ClientId::new("c1"));
    }

    #[tokio::test]
    async fn test_listing_filters_and_order() {
        let (ledger, _) = ledger();
        let jan = issue("c1", "Desk-12", "2026-01", 1);
        let feb = issue("c1", "Desk-12", "2026-02", 2);
        let other = issue("c1", "Desk-14", "2026-02", 2);
        for bill in [&jan, &feb, &other] {
            ledger.insert_new_bill(bill).await.unwrap();
        }
        ledger
            .mark_paid(&jan.id(), Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap())
            .await
            .unwrap();

        let desk12 = ledger
            .list_by_client(&ClientId::new("c1"), &BillFilter::resource("Desk-12"))
            .await
            .unwrap();
        assert_eq!(
            desk12.iter().map(|b| b.id()).collect::<Vec<_>>(),
            vec![feb.id(), jan.id()]
        );

        let paid = ledger
            .list_by_client(&ClientId::new("c1"), &BillFilter::status(BillStatus::Paid))
            .await
            .unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].id(), jan.id());

        let groups = ledger.group_by_resource(&ClientId::new("c1")).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["Desk-12"].len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_period_rejected() {
        let (ledger, store) = ledger();
        ledger
            .insert_new_bill(&issue("c1", "Desk-12", "2026-01", 1))
            .await
            .unwrap();

        let result = ledger
            .insert_new_bill(&issue("c1", "Desk-12", "2026-01", 1))
            .await;
        assert!(matches!(result, Err(BillingError::DuplicatePeriod { .. })));
        // one bill plus its period claim
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_bill() {
        let (ledger, _) = ledger();
        let missing = BillId::new();
        assert!(matches!(
            ledger.get_bill(&missing).await,
            Err(BillingError::BillNotFound { .. })
        ));
        assert!(matches!(
            ledger.mark_paid(&missing, Utc::now()).await,
            Err(BillingError::BillNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_negative_fee_rejected_before_any_write() {
        let (ledger, _) = ledger();
        let bill = issue("c1", "Desk-12", "2026-01", 1);
        ledger.insert_new_bill(&bill).await.unwrap();

        let result = ledger.apply_fee(&bill.id(), FeeKind::Damage, dec!(-5)).await;
        assert!(matches!(result, Err(BillingError::InvalidAmount { .. })));
        assert!(ledger.get_bill(&bill.id()).await.unwrap().fees().damage_fee.is_zero());
    }

    #[tokio::test]
    async fn test_fee_overflow_is_rejected_without_write() {
        let (ledger, store) = ledger();
        let bill = issue("c1", "Desk-12", "2026-01", 1);
        ledger.insert_new_bill(&bill).await.unwrap();
        let path = DocumentPath::bill(bill.client_id(), &bill.id());

        ledger
            .apply_fee(&bill.id(), FeeKind::Late, Decimal::MAX - dec!(5500))
            .await
            .unwrap();
        let version = store.get(&path).await.unwrap().unwrap().version;

        let result = ledger.apply_fee(&bill.id(), FeeKind::Late, Decimal::MAX).await;
        assert!(matches!(result, Err(BillingError::InvalidAmount { .. })));
        assert!(result.unwrap_err().nothing_changed());
        assert_eq!(store.get(&path).await.unwrap().unwrap().version, version);
        assert_eq!(
            ledger.get_bill(&bill.id()).await.unwrap().total().as_decimal(),
            Decimal::MAX
        );
    }

    #[tokio::test]
    async fn test_mark_overdue_is_idempotent() {
        let (ledger, _) = ledger();
        let bill = issue("c1", "Desk-12", "2026-01", 1);
        ledger.insert_new_bill(&bill).await.unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 17, 0, 0, 0).unwrap();

        let (first, changed) = ledger.mark_overdue_at(&bill.id(), now).await.unwrap();
        assert!(changed);
        assert_eq!(first.status(), BillStatus::Overdue);

        let (second, changed) = ledger.mark_overdue_at(&bill.id(), now).await.unwrap();
        assert!(!changed);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_events_published_on_transitions() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe().unwrap();
        let ledger = BillLedger::new(Arc::new(MemoryDocumentStore::new()), RetryPolicy::no_delay(1))
            .with_events(bus);

        let bill = issue("c1", "Desk-12", "2026-01", 1);
        ledger.insert_new_bill(&bill).await.unwrap();
        ledger.apply_fee(&bill.id(), FeeKind::Late, dec!(200)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "bill_created");
        match rx.recv().await.unwrap() {
            BillingEvent::FeeApplied { kind, amount, .. } => {
                assert_eq!(kind, FeeKind::Late);
                assert_eq!(amount.as_decimal(), dec!(200));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_documents_are_skipped_in_listings() {
        let (ledger, store) = ledger();
        let bill = issue("c1", "Desk-12", "2026-01", 1);
        ledger.insert_new_bill(&bill).await.unwrap();

        let broken = CollectionPath::bills(&ClientId::new("c1")).doc("broken");
        store
            .set(&broken, json!({"billId": "broken", "status": "void"}))
            .await
            .unwrap();

        let bills = ledger
            .list_by_client(&ClientId::new("c1"), &BillFilter::default())
            .await
            .unwrap();
        assert_eq!(bills.len(), 1);
    }

    #[tokio::test]
    async fn test_summary() {
        let (ledger, _) = ledger();
        let jan = issue("c1", "Desk-12", "2026-01", 1);
        let feb = issue("c1", "Desk-12", "2026-02", 2);
        let mar = issue("c1", "Desk-12", "2026-03", 3);
        for bill in [&jan, &feb, &mar] {
            ledger.insert_new_bill(bill).await.unwrap();
        }
        ledger
            .mark_paid(&jan.id(), Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap())
            .await
            .unwrap();
        ledger
            .mark_overdue_at(&feb.id(), Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap())
            .await
            .unwrap();

        let summary = ledger
            .summarize_client(&ClientId::new("c1"), date(2026, 3, 20))
            .await
            .unwrap();
        assert_eq!(summary.paid_count, 1);
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.unpaid_count, 1);
        assert_eq!(summary.past_due_unpaid_count, 1);
        assert_eq!(summary.paid_total.as_decimal(), dec!(5500));
        assert_eq!(summary.overdue_total.as_decimal(), dec!(5500));
        assert_eq!(summary.outstanding_total.as_decimal(), dec!(11000));
    }
}
