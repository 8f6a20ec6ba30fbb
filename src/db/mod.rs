//! Database module — PostgreSQL-backed persistence for credentials,
//! usage records, violations, billing records, and alerts (C2/C3 plus
//! the aggregator stores).

pub mod alerts;
pub mod billing;
pub mod credentials;
pub mod pool;
pub mod tasks;
pub mod usage;
pub mod violations;

pub use alerts::AlertRepository;
pub use billing::BillingRepository;
pub use credentials::CredentialRepository;
pub use pool::DbPool;
pub use tasks::TaskRepository;
pub use usage::UsageRepository;
pub use violations::ViolationRepository;
