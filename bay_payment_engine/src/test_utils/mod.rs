//! Helpers for the engine's own tests and for downstream integration tests.
//!
//! Everything here is built for hermetic testing. [`prepare_env`] stamps out throwaway Sqlite
//! databases, [`MemoryFastStore`] stands in for Redis, and the scripted doubles replace the two
//! network dependencies (the provider and the merchant's notify endpoint).
pub mod memory_store;
pub mod prepare_env;
pub mod scripted;
pub mod seed;

pub use memory_store::MemoryFastStore;
pub use prepare_env::{prepare_test_env, random_db_path};
pub use scripted::{RecordingTransport, ScriptedProvider};
pub use seed::{seed_tenancy, SeededTenancy};
