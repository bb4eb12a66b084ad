//! # Bay payment gateway server
//! This crate hosts the HTTP face of the gateway. It is responsible for:
//! Authenticated merchant requests for creating, querying and closing orders.
//! The buyer-facing cashier page that opens an order for payment.
//! Receiving and verifying asynchronous payment confirmations from the provider.
//! Operator endpoints for notifications, settlements and order search.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! The order lifecycle logic itself lives in `bay_payment_engine`. This crate wires that engine to
//! actix-web, reqwest and the process environment, and nothing more.

pub mod config;
pub mod data_objects;
pub mod errors;

pub mod helpers;
pub mod integrations;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
