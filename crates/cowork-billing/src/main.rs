use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use cowork_billing::config::{BillingConfig, StorageBackend};
use cowork_billing::domain::{Bill, BillFilter, BillId, BillStatus, ClientId, FeeKind, ServiceType};
use cowork_billing::logging::{init_logging, DEFAULT_FILTER};
use cowork_billing::storage::PgDocumentStore;
use cowork_billing::{BillingError, BillingService};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "cowork-billing")]
#[command(about = "Co-working tenancy billing: bills, fees, due dates and overdue sweeps")]
struct Args {
    #[arg(short, long, global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the default configuration as TOML
    GenConfig,

    /// Run database migrations
    Migrate,

    /// Create a bill for one client, resource and period
    CreateBill {
        #[arg(long)]
        client: String,
        #[arg(long)]
        resource: String,
        #[arg(long)]
        service_type: ServiceType,
        #[arg(long, help = "First day of the period, YYYY-MM-DD")]
        period_start: NaiveDate,
    },

    /// List a client's bills, newest first
    ListBills {
        #[arg(long)]
        client: String,
        #[arg(long)]
        resource: Option<String>,
        #[arg(long)]
        status: Option<BillStatus>,
        #[arg(long)]
        service_type: Option<ServiceType>,
    },

    /// Record a payment
    MarkPaid {
        #[arg(long)]
        bill: BillId,
        #[arg(long, help = "Payment time, RFC 3339; defaults to now")]
        paid_at: Option<DateTime<Utc>>,
    },

    /// Add a late or damage fee to a bill
    ApplyFee {
        #[arg(long)]
        bill: BillId,
        #[arg(long)]
        kind: FeeKind,
        #[arg(long)]
        amount: Decimal,
    },

    /// Flag unpaid bills past their due date as overdue
    Sweep {
        #[arg(long, help = "Evaluate as of this time, RFC 3339; defaults to now")]
        now: Option<DateTime<Utc>>,
    },

    /// Run the billing cycle, overdue sweep and notifications until stopped
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::GenConfig = args.command {
        println!("{}", BillingConfig::default().to_toml()?);
        return Ok(());
    }

    let config = BillingConfig::load(args.config.clone())?;
    init_logging(&args.verbosity, DEFAULT_FILTER, config.logging.json)?;

    info!(
        environment = %config.service.environment,
        service_id = %config.service.service_id,
        "Loaded billing configuration"
    );

    if let Err(e) = execute(args.command, config).await {
        if let Some(billing) = e.downcast_ref::<BillingError>() {
            eprintln!("{}", billing.user_message());
        }
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn execute(command: Command, config: BillingConfig) -> Result<()> {
    if let Command::Migrate = command {
        if config.storage.backend != StorageBackend::Postgres {
            warn!("Storage backend is not postgres, nothing to migrate");
            return Ok(());
        }
        let store = PgDocumentStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?;
        store.run_migrations().await.context("Migration failed")?;
        return Ok(());
    }

    let service = BillingService::from_config(config).await?;
    run_then_shutdown(&service, command).await
}

/// The service is shut down whether or not the command succeeds.
async fn run_then_shutdown(service: &BillingService, command: Command) -> Result<()> {
    let result = run_command(service, command).await;
    service.shutdown().await;
    result
}

async fn run_command(service: &BillingService, command: Command) -> Result<()> {
    match command {
        Command::CreateBill {
            client,
            resource,
            service_type,
            period_start,
        } => {
            let bill = service
                .factory()
                .create_bill(&ClientId::new(client), &resource, service_type, period_start)
                .await?;
            print_bill(&bill);
        }
        Command::ListBills {
            client,
            resource,
            status,
            service_type,
        } => {
            let filter = BillFilter {
                assigned_resource: resource,
                status,
                service_type,
            };
            let bills = service
                .ledger()
                .list_by_client(&ClientId::new(client), &filter)
                .await?;
            if bills.is_empty() {
                println!("No bills found");
            }
            for bill in &bills {
                print_bill(bill);
            }
        }
        Command::MarkPaid { bill, paid_at } => {
            let bill = service
                .ledger()
                .mark_paid(&bill, paid_at.unwrap_or_else(Utc::now))
                .await?;
            print_bill(&bill);
        }
        Command::ApplyFee { bill, kind, amount } => {
            let bill = service.ledger().apply_fee(&bill, kind, amount).await?;
            print_bill(&bill);
        }
        Command::Sweep { now } => {
            let now = now.unwrap_or_else(Utc::now);
            let report = service.clock().sweep(service.ledger(), now).await?;
            println!("{} bill(s) marked overdue", report.transitioned);
            for failure in &report.failures {
                eprintln!("Bill {}: {}", failure.bill_id, failure.error.user_message());
            }
            if report.failed() > 0 {
                bail!("{} bill(s) could not be flagged overdue", report.failed());
            }
        }
        Command::Run => {
            service.start_notifications().await?;
            service.run_scheduler(shutdown_signal()).await?;
        }
        Command::GenConfig | Command::Migrate => {}
    }
    Ok(())
}

fn print_bill(bill: &Bill) {
    let fees = bill.fees();
    println!(
        "{id}  {client}  {resource} ({service})  period={period}  status={status}  due={due}  \
         total={total} [rent={amount} cusa={cusa} parking={parking} late={late} damage={damage}]",
        id = bill.id(),
        client = bill.client_id(),
        resource = bill.assigned_resource(),
        service = bill.service_type(),
        period = bill.fee_period().map(|p| p.to_string()).unwrap_or_default(),
        status = bill.status(),
        due = bill.due_date().map(|d| d.to_string()).unwrap_or_default(),
        total = bill.total(),
        amount = fees.amount,
        cusa = fees.cusa_fee,
        parking = fees.parking_fee,
        late = fees.late_fee,
        damage = fees.damage_fee,
    );
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
