pub mod traits;

pub mod redis_store;

#[cfg(feature = "sqlite")]
pub mod sqlite;
