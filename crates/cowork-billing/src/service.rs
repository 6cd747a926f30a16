use crate::config::{BillingConfig, StorageBackend};
use crate::domain::{BillFactory, BillLedger, BillingClock, CycleReport, FeeSchedule, SweepReport};
use crate::error::{BillingError, Result};
use crate::events::EventBus;
use crate::notifications::{sender_from_config, EmailSender, NotificationDispatcher};
use crate::storage::{DocumentStore, MemoryDocumentStore, PgDocumentStore, RetryPolicy};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Wires the billing components together and owns their lifecycle.
///
/// The event bus is created here and handed to the ledger; it is torn down by
/// [`BillingService::shutdown`], which also waits for the notification
/// dispatcher to drain.
pub struct BillingService {
    config: BillingConfig,
    ledger: Arc<BillLedger>,
    factory: BillFactory,
    clock: BillingClock,
    events: Arc<EventBus>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BillingService {
    pub async fn from_config(config: BillingConfig) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = match config.storage.backend {
            StorageBackend::Postgres => {
                let store = PgDocumentStore::connect(&config.database)
                    .await
                    .map_err(|e| BillingError::from_store("connect", false, e))?;
                Arc::new(store)
            }
            StorageBackend::Memory => {
                info!("Using in-memory document store, data will not survive a restart");
                Arc::new(MemoryDocumentStore::new())
            }
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: BillingConfig, store: Arc<dyn DocumentStore>) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::new(config.notifications.event_buffer_size));
        let ledger = Arc::new(
            BillLedger::new(store, RetryPolicy::from_config(&config.retry))
                .with_max_write_attempts(config.billing.max_write_attempts)
                .with_events(events.clone()),
        );
        let schedule = FeeSchedule::from_config(&config.fee_schedule, config.billing.default_cadence)?;
        let clock = BillingClock::from_config(&config.billing);
        let factory = BillFactory::new(ledger.clone(), Arc::new(schedule), clock);

        Ok(Self {
            config,
            ledger,
            factory,
            clock,
            events,
            dispatcher: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &BillingConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<BillLedger> {
        &self.ledger
    }

    pub fn factory(&self) -> &BillFactory {
        &self.factory
    }

    pub fn clock(&self) -> &BillingClock {
        &self.clock
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Start emailing tenants with the sender chosen by configuration.
    pub async fn start_notifications(&self) -> Result<()> {
        let sender = sender_from_config(&self.config.notifications)?;
        self.start_notifications_with(sender).await
    }

    pub async fn start_notifications_with(&self, sender: Arc<dyn EmailSender>) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            return Ok(());
        }
        let receiver = self.events.subscribe().ok_or_else(|| BillingError::Notification {
            message: "event bus already shut down".to_string(),
        })?;
        *dispatcher = Some(NotificationDispatcher::new(self.ledger.clone(), sender).spawn(receiver));
        Ok(())
    }

    pub async fn run_sweep(&self) -> Result<SweepReport> {
        self.clock.sweep(&self.ledger, Utc::now()).await
    }

    pub async fn run_billing_cycle(&self) -> Result<CycleReport> {
        self.factory.run_billing_cycle(Utc::now().date_naive()).await
    }

    /// Run the billing cycle and overdue sweep on their configured intervals
    /// until `shutdown` resolves. Both run once immediately.
    pub async fn run_scheduler(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut sweep_timer = tokio::time::interval(self.config.scheduler.sweep_interval());
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle_timer = tokio::time::interval(self.config.scheduler.billing_cycle_interval());
        cycle_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sweep_interval_seconds = self.config.scheduler.sweep_interval_seconds,
            billing_cycle_interval_seconds = self.config.scheduler.billing_cycle_interval_seconds,
            "Starting billing scheduler"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Billing scheduler received shutdown signal");
                    break;
                }
                _ = cycle_timer.tick() => {
                    if let Err(e) = self.run_billing_cycle().await {
                        error!("Billing cycle failed: {}", e);
                    }
                }
                _ = sweep_timer.tick() => {
                    match self.run_sweep().await {
                        Ok(report) => {
                            for failure in &report.failures {
                                error!(
                                    bill_id = %failure.bill_id,
                                    "Overdue sweep could not flag bill: {}",
                                    failure.error.user_message()
                                );
                            }
                        }
                        Err(e) => error!("Overdue sweep failed: {}", e.user_message()),
                    }
                }
            }
        }

        Ok(())
    }

    /// Close the event bus and wait for pending notifications.
    pub async fn shutdown(&self) {
        info!("Shutting down billing service");
        self.events.shutdown();

        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Notification dispatcher terminated abnormally: {}", e);
            }
        }
        info!("Billing service shutdown complete");
    }
}
