//! Bay Payment Engine
//!
//! The Bay Payment Engine is the order lifecycle core of a multi-tenant payment aggregation gateway. Agents resell
//! payment capability to merchants, and the engine owns everything between "a merchant asked for an order" and "the
//! merchant has acknowledged that it was paid". This library contains the core logic only. It is transport-agnostic;
//! the HTTP surface lives in the Bay Payment Server crate.
//!
//! The library is divided into two main sections:
//! 1. Database management and control ([`mod@db`]). Sqlite is the durable backend and Redis is the shared fast
//!    store. You should never need to access either directly. Instead, use the public API provided by the payment
//!    engine. The exception is the data types used in the database. These are defined in the `db_types` module and
//!    are public.
//! 2. The payment engine public API ([`mod@bpe_api`]). This provides the public-facing functionality of the engine.
//!    It is responsible for merchant authentication, order state, merchant notification and royalty settlement.
//!    Specific backends need to implement the traits in [`mod@db`] in order to act as a backend for the Bay Payment
//!    Server.
//!
//! The engine also provides a set of events that can be subscribed to. These events are emitted when certain actions
//! occur within the payment engine. For example, when a provider confirms payment, an `OrderPaidEvent` is emitted.
//! A simple Actor framework is used so that you can easily hook into these events and perform custom actions. The
//! server uses this to drive merchant notification off the webhook request path.
mod db;

mod bpe_api;
pub mod db_types;
pub mod events;
pub mod helpers;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use bpe_api::{errors, notify_api, order_flow_api, order_number, order_objects, royalty_api};
pub use bpe_api::{
    errors::{NotifyApiError, OrderFlowError},
    notify_api::{NotifyApi, NotifyConfig, NotifyDispatchResult, NotifySkipReason},
    order_flow_api::OrderFlowApi,
    royalty_api::{RoyaltyApi, RoyaltyConfig, RoyaltyTickOutcome},
};
pub use db::redis_store::RedisStore;
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use db::traits;
