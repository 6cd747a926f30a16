use crate::domain::types::{BillingCadence, ServiceType};
use crate::error::{BillingError, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "cowork-billing.toml";
pub const ENV_PREFIX: &str = "COWORK_BILLING_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub billing: BillingRulesConfig,
    pub fee_schedule: FeeScheduleConfig,
    pub retry: RetryConfig,
    pub notifications: NotificationConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub environment: String,
    pub service_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            service_id: "cowork-billing".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://billing@localhost:5432/cowork_billing".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            max_lifetime_seconds: 1800,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BillingRulesConfig {
    /// Days between period start and due date
    pub grace_period_days: u32,
    pub default_cadence: BillingCadence,
    /// Read-modify-write attempts before a version conflict is reported
    pub max_write_attempts: u32,
}

impl Default for BillingRulesConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 15,
            default_cadence: BillingCadence::Monthly,
            max_write_attempts: 5,
        }
    }
}

/// Default recurring fees for one service type
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeEntryConfig {
    pub amount: Decimal,
    #[serde(default)]
    pub cusa_fee: Decimal,
    #[serde(default)]
    pub parking_fee: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<BillingCadence>,
    /// Per-resource overrides keyed by resource name, e.g. `Office-3`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceOverrideConfig>,
}

impl FeeEntryConfig {
    pub fn new(amount: Decimal, cusa_fee: Decimal, parking_fee: Decimal) -> Self {
        Self {
            amount,
            cusa_fee,
            parking_fee,
            cadence: None,
            resources: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceOverrideConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cusa_fee: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parking_fee: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<BillingCadence>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeScheduleConfig {
    pub entries: BTreeMap<ServiceType, FeeEntryConfig>,
}

impl Default for FeeScheduleConfig {
    fn default() -> Self {
        let entries = BTreeMap::from([
            (
                ServiceType::DedicatedDesk,
                FeeEntryConfig::new(dec!(5000), dec!(500), dec!(0)),
            ),
            (
                ServiceType::PrivateOffice,
                FeeEntryConfig::new(dec!(15000), dec!(1500), dec!(1000)),
            ),
            (
                ServiceType::VirtualOffice,
                FeeEntryConfig::new(dec!(2000), dec!(0), dec!(0)),
            ),
        ]);
        Self { entries }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub api_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub from_address: String,
    pub request_timeout_seconds: u64,
    pub event_buffer_size: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "https://api.resend.com/emails".to_string(),
            api_key: None,
            from_address: "billing@cowork.local".to_string(),
            request_timeout_seconds: 10,
            event_buffer_size: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub sweep_interval_seconds: u64,
    pub billing_cycle_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 3_600,
            billing_cycle_interval_seconds: 21_600,
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }

    pub fn billing_cycle_interval(&self) -> Duration {
        Duration::from_secs(self.billing_cycle_interval_seconds.max(1))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub json: bool,
}

impl BillingConfig {
    /// Layer defaults, then a TOML file, then `COWORK_BILLING_*` variables.
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(BillingConfig::default()));

        match path_override {
            Some(path) if path.exists() => {
                figment = figment.merge(Toml::file(&path));
            }
            Some(path) => {
                return Err(BillingError::Configuration {
                    message: format!("config file {} does not exist", path.display()),
                });
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: BillingConfig = figment.extract().map_err(|e| BillingError::Configuration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(BillingError::Configuration { message });

        if self.billing.grace_period_days > 365 {
            return fail(format!(
                "billing.grace_period_days must be at most 365, got {}",
                self.billing.grace_period_days
            ));
        }
        if self.billing.max_write_attempts == 0 {
            return fail("billing.max_write_attempts must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return fail("retry.initial_backoff_ms exceeds retry.max_backoff_ms".to_string());
        }

        for (service_type, entry) in &self.fee_schedule.entries {
            let mut amounts = vec![
                ("amount".to_string(), Some(entry.amount)),
                ("cusa_fee".to_string(), Some(entry.cusa_fee)),
                ("parking_fee".to_string(), Some(entry.parking_fee)),
            ];
            for (resource, o) in &entry.resources {
                amounts.push((format!("{}.amount", resource), o.amount));
                amounts.push((format!("{}.cusa_fee", resource), o.cusa_fee));
                amounts.push((format!("{}.parking_fee", resource), o.parking_fee));
            }
            for (field, value) in amounts {
                if let Some(value) = value {
                    if value.is_sign_negative() && !value.is_zero() {
                        return fail(format!(
                            "fee_schedule.{}.{} must not be negative, got {}",
                            service_type, field, value
                        ));
                    }
                }
            }
        }

        if self.notifications.enabled && self.notifications.api_url.trim().is_empty() {
            return fail("notifications.api_url is required when notifications are enabled".to_string());
        }
        if self.notifications.event_buffer_size == 0 {
            return fail("notifications.event_buffer_size must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BillingError::Configuration {
            message: e.to_string(),
        })
    }
}
