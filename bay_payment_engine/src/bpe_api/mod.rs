//! # Bay payment engine public API
//!
//! The `bpe_api` module exposes the programmatic API for the Bay payment engine. The API is
//! modular, so that clients can pick and choose the functionality they want, and the individual
//! APIs can run on different machines against the same database.
//!
//! * [`order_flow_api`] is the primary API: merchant authentication, order creation, the cashier
//!   open/close transitions, and the provider webhook that marks orders paid.
//! * [`notify_api`] delivers paid-order notifications to merchants, with a per-merchant circuit
//!   breaker between us and slow merchant endpoints.
//! * [`royalty_api`] drives the asynchronous royalty settlement queue.
//! * [`order_number`] issues platform order numbers behind a fast-store fence.
//!
//! The other submodules are support types.
//!
//! # API usage
//!
//! The pattern for all the APIs is the same. An instance is created by supplying a database
//! backend and a fast store that implement the traits the API requires:
//!
//! ```rust,ignore
//! use bay_payment_engine::{EventProducers, OrderFlowApi, RedisStore, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let store = RedisStore::connect(...).await?;
//! let api = OrderFlowApi::new(db, store, EventProducers::default());
//! let order = api.create_order(&merchant, new_order_request).await?;
//! ```

pub mod errors;
pub mod notify_api;
pub mod order_flow_api;
pub mod order_number;
pub mod order_objects;
pub mod royalty_api;
