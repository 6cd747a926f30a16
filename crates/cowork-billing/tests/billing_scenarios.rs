use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use cowork_billing::config::FeeScheduleConfig;
use cowork_billing::domain::{
    Assignment, BillFactory, BillFilter, BillLedger, BillStatus, BillingCadence, BillingClock, Client,
    ClientId, FeeKind, FeeSchedule, Money, ServiceType,
};
use cowork_billing::storage::documents::{decode_bill, encode_bill};
use cowork_billing::storage::{
    CollectionPath, DocumentPath, DocumentStore, FieldFilter, MemoryDocumentStore, OrderBy,
    RetryPolicy, StoreError, StoreResult, StoredDocument,
};
use cowork_billing::BillingError;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Harness {
    ledger: Arc<BillLedger>,
    factory: BillFactory,
    clock: BillingClock,
}

async fn harness_with_store(store: Arc<dyn DocumentStore>) -> Harness {
    let ledger = Arc::new(BillLedger::new(store, RetryPolicy::no_delay(3)));
    let schedule =
        FeeSchedule::from_config(&FeeScheduleConfig::default(), BillingCadence::Monthly).unwrap();
    let clock = BillingClock::new(15);
    let factory = BillFactory::new(ledger.clone(), Arc::new(schedule), clock);

    ledger
        .register_client(
            &Client::new(ClientId::new("c1"), "Acme")
                .with_email("ops@acme.test")
                .with_assignment(Assignment::new(
                    "Desk-12",
                    ServiceType::DedicatedDesk,
                    date(2025, 12, 1),
                )),
        )
        .await
        .unwrap();

    Harness {
        ledger,
        factory,
        clock,
    }
}

async fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryDocumentStore::new())).await
}

#[tokio::test]
async fn create_bill_then_list_returns_it() {
    let h = harness().await;
    let client = ClientId::new("c1");

    let bill = h
        .factory
        .create_bill(&client, "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    assert_eq!(bill.due_date(), Some(date(2026, 1, 16)));
    assert_eq!(bill.status(), BillStatus::Unpaid);
    assert_eq!(bill.total().as_decimal(), dec!(5500));

    let listed = h
        .ledger
        .list_by_client(&client, &BillFilter::resource("Desk-12"))
        .await
        .unwrap();
    assert_eq!(listed, vec![bill]);
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let h = harness().await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    let first = h
        .clock
        .sweep(&h.ledger, Utc.with_ymd_and_hms(2026, 1, 17, 0, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(first.transitioned, 1);
    assert_eq!(first.failed(), 0);
    assert_eq!(h.ledger.get_bill(&bill.id()).await.unwrap().status(), BillStatus::Overdue);

    let second = h
        .clock
        .sweep(&h.ledger, Utc.with_ymd_and_hms(2026, 1, 20, 0, 0, 0).unwrap())
        .await
        .unwrap();
    assert_eq!(second.transitioned, 0);
}

#[tokio::test]
async fn mark_paid_is_terminal() {
    let h = harness().await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    let paid_at = Utc::now();
    let paid = h.ledger.mark_paid(&bill.id(), paid_at).await.unwrap();
    let recorded = paid.paid_at().unwrap();

    let again = h.ledger.mark_paid(&bill.id(), paid_at).await;
    assert!(matches!(again, Err(BillingError::InvalidTransition { .. })));

    let overdue = h.ledger.mark_overdue(&bill.id()).await;
    assert!(matches!(overdue, Err(BillingError::InvalidTransition { .. })));

    let stored = h.ledger.get_bill(&bill.id()).await.unwrap();
    assert_eq!(stored.status(), BillStatus::Paid);
    assert_eq!(stored.paid_at(), Some(recorded));
}

#[tokio::test]
async fn concurrent_create_bill_persists_exactly_one() {
    let h = harness().await;
    let client = ClientId::new("c1");

    let attempts = (0..4).map(|_| {
        h.factory
            .create_bill(&client, "Desk-12", ServiceType::DedicatedDesk, date(2026, 2, 1))
    });
    let results = futures::future::join_all(attempts).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(BillingError::DuplicatePeriod { .. })))
        .count();
    assert_eq!(created, 1);
    assert_eq!(duplicates, 3);

    let bills = h
        .ledger
        .list_by_client(&client, &BillFilter::default())
        .await
        .unwrap();
    assert_eq!(bills.len(), 1);
}

#[tokio::test]
async fn late_fees_accumulate() {
    let h = harness().await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    h.ledger.apply_fee(&bill.id(), FeeKind::Late, dec!(200)).await.unwrap();
    let updated = h.ledger.apply_fee(&bill.id(), FeeKind::Late, dec!(100)).await.unwrap();

    assert_eq!(updated.fees().late_fee.as_decimal(), dec!(300));
    assert_eq!(updated.total().as_decimal(), dec!(5800));
}

#[tokio::test]
async fn concurrent_mark_paid_and_apply_fee_keep_both_updates() {
    let h = harness().await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    let bill_id = bill.id();
    let (paid, fee) = tokio::join!(
        h.ledger.mark_paid(&bill_id, Utc::now()),
        h.ledger.apply_fee(&bill_id, FeeKind::Damage, dec!(75)),
    );
    paid.unwrap();
    fee.unwrap();

    let stored = h.ledger.get_bill(&bill.id()).await.unwrap();
    assert_eq!(stored.status(), BillStatus::Paid);
    assert_eq!(stored.fees().damage_fee.as_decimal(), dec!(75));
}

/// Fails the next `read_failures` reads, and every write when `fail_writes`
/// is set, with `Unavailable`.
struct FlakyStore {
    inner: MemoryDocumentStore,
    read_failures: AtomicU32,
    fail_writes: AtomicBool,
    reads: AtomicU32,
    writes: AtomicU32,
}

impl FlakyStore {
    fn new(read_failures: u32, fail_writes: bool) -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            read_failures: AtomicU32::new(read_failures),
            fail_writes: AtomicBool::new(fail_writes),
            reads: AtomicU32::new(0),
            writes: AtomicU32::new(0),
        }
    }

    fn read(&self) -> StoreResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.read_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.read_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable {
                message: "read timed out".to_string(),
            });
        }
        Ok(())
    }

    fn write(&self) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "write timed out".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<StoredDocument>> {
        self.read()?;
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<u64> {
        // client registration during setup is not counted
        self.inner.set(path, data).await
    }

    async fn create_all(&self, docs: Vec<(DocumentPath, Value)>) -> StoreResult<()> {
        self.write()?;
        self.inner.create_all(docs).await
    }

    async fn update(&self, path: &DocumentPath, data: Value, expected_version: u64) -> StoreResult<u64> {
        self.write()?;
        self.inner.update(path, data, expected_version).await
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.read()?;
        self.inner.query(collection, filters, order_by).await
    }

    async fn query_group(
        &self,
        collection_id: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.read()?;
        self.inner.query_group(collection_id, filters, order_by).await
    }
}

#[tokio::test]
async fn reads_are_retried_transparently() {
    let store = Arc::new(FlakyStore::new(0, false));
    let h = harness_with_store(store.clone()).await;
    let client = ClientId::new("c1");
    h.factory
        .create_bill(&client, "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    store.read_failures.store(2, Ordering::SeqCst);
    let before = store.reads.load(Ordering::SeqCst);
    let bills = h
        .ledger
        .list_by_client(&client, &BillFilter::default())
        .await
        .unwrap();

    assert_eq!(bills.len(), 1);
    assert_eq!(store.reads.load(Ordering::SeqCst) - before, 3);
}

#[tokio::test]
async fn failed_writes_are_not_retried() {
    let store = Arc::new(FlakyStore::new(0, true));
    let h = harness_with_store(store.clone()).await;

    let result = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, BillingError::StoreUnavailable { write: true, .. }));
    assert!(!err.is_retryable());
    assert!(err.user_message().contains("may not have been applied"));
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn read_outage_reports_nothing_changed() {
    let store = Arc::new(FlakyStore::new(0, false));
    let h = harness_with_store(store.clone()).await;
    store.read_failures.store(10, Ordering::SeqCst);

    let err = h
        .ledger
        .list_by_client(&ClientId::new("c1"), &BillFilter::default())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(err.nothing_changed());
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sweep_reports_failed_writes() {
    let store = Arc::new(FlakyStore::new(0, false));
    let h = harness_with_store(store.clone()).await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    store.fail_writes.store(true, Ordering::SeqCst);
    let before = store.writes.load(Ordering::SeqCst);
    let report = h
        .clock
        .sweep(&h.ledger, Utc.with_ymd_and_hms(2026, 1, 17, 0, 0, 0).unwrap())
        .await
        .unwrap();

    assert_eq!(report.transitioned, 0);
    assert_eq!(report.failed(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.bill_id, bill.id());
    assert!(matches!(
        failure.error,
        BillingError::StoreUnavailable { write: true, .. }
    ));
    assert!(failure.error.user_message().contains("may not have been applied"));
    assert_eq!(store.writes.load(Ordering::SeqCst) - before, 1);

    store.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(h.ledger.get_bill(&bill.id()).await.unwrap().status(), BillStatus::Unpaid);
}

/// Lets another writer add a 10 late fee right before each of the next
/// `contentions` updates, so those updates hit a stale version.
struct ContendedStore {
    inner: MemoryDocumentStore,
    contentions: AtomicU32,
    conflicts: AtomicU32,
}

impl ContendedStore {
    fn new() -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            contentions: AtomicU32::new(0),
            conflicts: AtomicU32::new(0),
        }
    }

    async fn competing_late_fee(&self, path: &DocumentPath) -> StoreResult<()> {
        if let Some(current) = self.inner.get(path).await? {
            let mut bill = decode_bill(&current)?;
            bill.apply_fee(FeeKind::Late, Money::new(dec!(10)).unwrap())
                .map_err(|e| StoreError::Unavailable {
                    message: e.to_string(),
                })?;
            self.inner
                .update(path, encode_bill(&bill)?, current.version)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for ContendedStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<StoredDocument>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<u64> {
        self.inner.set(path, data).await
    }

    async fn create_all(&self, docs: Vec<(DocumentPath, Value)>) -> StoreResult<()> {
        self.inner.create_all(docs).await
    }

    async fn update(&self, path: &DocumentPath, data: Value, expected_version: u64) -> StoreResult<u64> {
        let contend = self
            .contentions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contend {
            self.competing_late_fee(path).await?;
        }

        let result = self.inner.update(path, data, expected_version).await;
        if matches!(result, Err(StoreError::VersionConflict { .. })) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn query(
        &self,
        collection: &CollectionPath,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.inner.query(collection, filters, order_by).await
    }

    async fn query_group(
        &self,
        collection_id: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.inner.query_group(collection_id, filters, order_by).await
    }
}

#[tokio::test]
async fn interleaved_writes_are_not_lost() {
    let store = Arc::new(ContendedStore::new());
    let h = harness_with_store(store.clone()).await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();

    store.contentions.store(2, Ordering::SeqCst);
    let updated = h.ledger.apply_fee(&bill.id(), FeeKind::Late, dec!(200)).await.unwrap();

    assert_eq!(store.conflicts.load(Ordering::SeqCst), 2);
    assert_eq!(updated.fees().late_fee.as_decimal(), dec!(220));

    store.contentions.store(1, Ordering::SeqCst);
    let paid = h.ledger.mark_paid(&bill.id(), Utc::now()).await.unwrap();

    assert_eq!(store.conflicts.load(Ordering::SeqCst), 3);
    assert_eq!(paid.status(), BillStatus::Paid);
    let stored = h.ledger.get_bill(&bill.id()).await.unwrap();
    assert_eq!(stored.status(), BillStatus::Paid);
    assert_eq!(stored.fees().late_fee.as_decimal(), dec!(230));
    assert_eq!(stored.total().as_decimal(), dec!(5730));
}

#[tokio::test]
async fn persistent_contention_gives_up_with_conflict() {
    let store = Arc::new(ContendedStore::new());
    let h = harness_with_store(store.clone()).await;
    let bill = h
        .factory
        .create_bill(&ClientId::new("c1"), "Desk-12", ServiceType::DedicatedDesk, date(2026, 1, 1))
        .await
        .unwrap();
    let ledger = BillLedger::new(store.clone(), RetryPolicy::no_delay(3)).with_max_write_attempts(3);

    store.contentions.store(50, Ordering::SeqCst);
    let err = ledger
        .apply_fee(&bill.id(), FeeKind::Damage, dec!(75))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Conflict { attempts: 3, .. }));
    assert!(err.nothing_changed());
    assert_eq!(store.conflicts.load(Ordering::SeqCst), 3);

    store.contentions.store(0, Ordering::SeqCst);
    let stored = ledger.get_bill(&bill.id()).await.unwrap();
    assert!(stored.fees().damage_fee.is_zero());
    assert_eq!(stored.fees().late_fee.as_decimal(), dec!(30));
}

#[tokio::test]
async fn sweep_reads_candidates_once() {
    let store = Arc::new(FlakyStore::new(0, false));
    let h = harness_with_store(store.clone()).await;
    let client = ClientId::new("c1");
    for start in [date(2025, 12, 1), date(2026, 1, 1)] {
        h.factory
            .create_bill(&client, "Desk-12", ServiceType::DedicatedDesk, start)
            .await
            .unwrap();
    }

    let before = store.reads.load(Ordering::SeqCst);
    let report = h
        .clock
        .sweep(&h.ledger, Utc.with_ymd_and_hms(2026, 1, 17, 0, 0, 0).unwrap())
        .await
        .unwrap();

    assert_eq!(report.transitioned, 2);
    // one collection-group query, no per-bill lookups
    assert_eq!(store.reads.load(Ordering::SeqCst) - before, 1);
}
