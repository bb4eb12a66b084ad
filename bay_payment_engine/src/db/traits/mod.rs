//! # Backend interface contracts.
//!
//! This module defines the interfaces that backends must implement to drive the payment engine.
//!
//! ## Durable storage
//! * [`PaymentGatewayDatabase`] owns the order table and every `pay_status` transition. Nothing
//!   else in the system writes order state.
//! * [`MerchantManagement`] resolves merchants, products and subjects during order creation and
//!   authentication.
//! * [`RoyaltyManagement`] owns the settlement rows, including the conditional claim that acts as
//!   the settlement lease.
//!
//! ## Shared fast store
//! [`FastStore`] abstracts the Redis instance that holds the order-number fences, the webhook
//! dedup keys, the notification circuit breaker and the settlement queue. Every caller must
//! treat [`FastStoreError::Unavailable`] as a degraded mode, not a fatal error.
//!
//! ## The outside world
//! [`PaymentProvider`] is the upstream payment network (callback verification, order queries,
//! royalty transfers) and [`NotifyTransport`] is the HTTP POST to the merchant's server. Both
//! have scripted implementations in `test_utils` so the engine can be tested hermetically.
mod fast_store;
mod merchant_management;
mod notify_transport;
mod payment_gateway_database;
mod payment_provider;
mod royalty_management;

pub use fast_store::{FastStore, FastStoreError};
pub use merchant_management::{MerchantApiError, MerchantManagement};
pub use notify_transport::{NotifyOutcome, NotifyTransport};
pub use payment_gateway_database::{PaymentGatewayDatabase, PaymentGatewayError};
pub use payment_provider::{PaymentProvider, ProviderError, ProviderOrderStatus, SUBJECT_DISABLE_ERROR_CODES};
pub use royalty_management::{RoyaltyApiError, RoyaltyManagement};
