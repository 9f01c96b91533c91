//! Background job scheduler and job implementations.

mod payment_reconciliation;
mod pool_metrics;
mod scheduler;

pub use payment_reconciliation::PaymentReconciliationJob;
pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
