pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod notifications;
pub mod service;
pub mod storage;

pub use config::BillingConfig;
pub use error::{BillingError, Result};
pub use events::{BillingEvent, EventBus};
pub use service::BillingService;
