pub mod audit_repo;
pub mod order_repo;
pub mod payment_repo;
pub mod store;

pub use store::PgOrderStore;
