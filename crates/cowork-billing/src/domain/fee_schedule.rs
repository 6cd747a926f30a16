use crate::config::FeeScheduleConfig;
use crate::domain::bill::FeeComponents;
use crate::domain::types::{BillingCadence, Money, ServiceType};
use crate::error::{BillingError, Result};
use std::collections::{BTreeMap, HashMap};

/// Recurring defaults resolved for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeDefaults {
    pub amount: Money,
    pub cusa_fee: Money,
    pub parking_fee: Money,
    pub cadence: BillingCadence,
}

impl FeeDefaults {
    /// Late and damage fees are never defaulted.
    pub fn components(&self) -> FeeComponents {
        FeeComponents::recurring(self.amount, self.cusa_fee, self.parking_fee)
    }
}

#[derive(Debug, Clone, Default)]
struct ResourceOverride {
    amount: Option<Money>,
    cusa_fee: Option<Money>,
    parking_fee: Option<Money>,
    cadence: Option<BillingCadence>,
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    base: FeeDefaults,
    resources: HashMap<String, ResourceOverride>,
}

/// Static fee lookup per service type, with optional per-resource overrides.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    entries: BTreeMap<ServiceType, ScheduleEntry>,
}

impl FeeSchedule {
    pub fn from_config(config: &FeeScheduleConfig, default_cadence: BillingCadence) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (service_type, entry) in &config.entries {
            let field = |name: &str| format!("fee_schedule.{}.{}", service_type, name);
            let base = FeeDefaults {
                amount: Money::try_new(&field("amount"), entry.amount)?,
                cusa_fee: Money::try_new(&field("cusa_fee"), entry.cusa_fee)?,
                parking_fee: Money::try_new(&field("parking_fee"), entry.parking_fee)?,
                cadence: entry.cadence.unwrap_or(default_cadence),
            };

            let mut resources = HashMap::new();
            for (resource, o) in &entry.resources {
                let optional = |name: &str, value: Option<rust_decimal::Decimal>| {
                    value
                        .map(|v| Money::try_new(&field(&format!("{}.{}", resource, name)), v))
                        .transpose()
                };
                resources.insert(
                    resource.clone(),
                    ResourceOverride {
                        amount: optional("amount", o.amount)?,
                        cusa_fee: optional("cusa_fee", o.cusa_fee)?,
                        parking_fee: optional("parking_fee", o.parking_fee)?,
                        cadence: o.cadence,
                    },
                );
            }

            entries.insert(*service_type, ScheduleEntry { base, resources });
        }

        Ok(Self { entries })
    }

    /// Resolve the recurring defaults for a resource.
    ///
    /// Fails with a configuration error when the service type has no entry.
    pub fn resolve(&self, service_type: ServiceType, assigned_resource: &str) -> Result<FeeDefaults> {
        let entry = self
            .entries
            .get(&service_type)
            .ok_or_else(|| BillingError::Configuration {
                message: format!("no fee schedule entry for service type '{}'", service_type),
            })?;

        let Some(o) = entry.resources.get(assigned_resource) else {
            return Ok(entry.base);
        };

        Ok(FeeDefaults {
            amount: o.amount.unwrap_or(entry.base.amount),
            cusa_fee: o.cusa_fee.unwrap_or(entry.base.cusa_fee),
            parking_fee: o.parking_fee.unwrap_or(entry.base.parking_fee),
            cadence: o.cadence.unwrap_or(entry.base.cadence),
        })
    }

    /// Like [`resolve`](Self::resolve) but accepts the raw service type text
    /// coming from a tenant record or the command line.
    pub fn resolve_str(&self, service_type: &str, assigned_resource: &str) -> Result<FeeDefaults> {
        let service_type: ServiceType = service_type.parse()?;
        self.resolve(service_type, assigned_resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeeEntryConfig, ResourceOverrideConfig};
    use rust_decimal_macros::dec;

    fn schedule() -> FeeSchedule {
        let mut config = FeeScheduleConfig::default();
        let office = config
            .entries
            .get_mut(&ServiceType::PrivateOffice)
            .unwrap();
        office.resources.insert(
            "Office-3".to_string(),
            ResourceOverrideConfig {
                amount: Some(dec!(18000)),
                cadence: Some(BillingCadence::Quarterly),
                ..Default::default()
            },
        );
        FeeSchedule::from_config(&config, BillingCadence::Monthly).unwrap()
    }

    #[test]
    fn test_resolve_defaults() {
        let defaults = schedule()
            .resolve(ServiceType::DedicatedDesk, "Desk-12")
            .unwrap();
        assert_eq!(defaults.amount.as_decimal(), dec!(5000));
        assert_eq!(defaults.cusa_fee.as_decimal(), dec!(500));
        assert!(defaults.parking_fee.is_zero());
        assert_eq!(defaults.cadence, BillingCadence::Monthly);

        let fees = defaults.components();
        assert!(fees.late_fee.is_zero());
        assert!(fees.damage_fee.is_zero());
    }

    #[test]
    fn test_resource_override_falls_back_per_field() {
        let defaults = schedule()
            .resolve(ServiceType::PrivateOffice, "Office-3")
            .unwrap();
        assert_eq!(defaults.amount.as_decimal(), dec!(18000));
        assert_eq!(defaults.cusa_fee.as_decimal(), dec!(1500));
        assert_eq!(defaults.cadence, BillingCadence::Quarterly);
    }

    #[test]
    fn test_unknown_service_type_is_configuration_error() {
        let mut config = FeeScheduleConfig::default();
        config.entries.remove(&ServiceType::VirtualOffice);
        let schedule = FeeSchedule::from_config(&config, BillingCadence::Monthly).unwrap();

        assert!(matches!(
            schedule.resolve(ServiceType::VirtualOffice, "VO-Basic"),
            Err(BillingError::Configuration { .. })
        ));
        assert!(matches!(
            schedule.resolve_str("hot-desk", "Desk-1"),
            Err(BillingError::Configuration { .. })
        ));
    }

    #[test]
    fn test_negative_configured_fee_rejected() {
        let mut config = FeeScheduleConfig::default();
        config.entries.insert(
            ServiceType::VirtualOffice,
            FeeEntryConfig::new(dec!(-10), dec!(0), dec!(0)),
        );
        assert!(matches!(
            FeeSchedule::from_config(&config, BillingCadence::Monthly),
            Err(BillingError::InvalidAmount { .. })
        ));
    }
}
