pub mod error;
pub mod factory;
pub mod filter;
pub mod memory;
pub mod postgres_store;
pub mod redb_store;
pub mod store;

pub use error::StoreError;
pub use factory::build_store;
pub use filter::ExecutionHistoryFilter;
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use redb_store::RedbStore;
pub use store::StateStore;
