//! Outbound HTTP clients. The engine only sees these through its `NotifyTransport` and
//! `PaymentProvider` traits.

mod merchant_notify;
mod provider;

pub use merchant_notify::HttpNotifier;
pub use provider::ProviderClient;
