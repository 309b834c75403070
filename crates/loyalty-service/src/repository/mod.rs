//! 数据访问层

pub mod catalog_repo;
pub mod client_repo;
pub mod gift_repo;
pub mod memory;
pub mod postgres;
pub mod sync_repo;
pub mod traits;

pub use memory::MemoryLoyaltyStore;
pub use postgres::PgLoyaltyStore;
pub use traits::{CancelOutcome, ContactUpsert, LoyaltyStore, RedeemOutcome, SyncQueueStore};
