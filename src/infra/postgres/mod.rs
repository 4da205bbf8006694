pub mod job_repo;
pub mod ledger_repo;
pub mod order_repo;

pub use job_repo::PgJobQueue;
pub use ledger_repo::PgLedger;
pub use order_repo::PgOrderStore;
