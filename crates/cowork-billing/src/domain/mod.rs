pub mod bill;
pub mod clients;
pub mod clock;
pub mod factory;
pub mod fee_schedule;
pub mod ledger;
pub mod types;

pub use bill::{Bill, FeeComponents, NewBill};
pub use clients::{Assignment, Client};
pub use clock::{BillingClock, SweepFailure, SweepReport};
pub use factory::{BillFactory, CycleFailure, CycleReport};
pub use fee_schedule::{FeeDefaults, FeeSchedule};
pub use ledger::{BillFilter, BillLedger, ClientBillingSummary};
pub use types::{
    BillId, BillStatus, BillingCadence, ClientId, FeeKind, FeePeriod, Money, ServiceType,
};
