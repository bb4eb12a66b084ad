//! End-to-end tests for the Bay payment gateway.
//!
//! Each scenario runs the real server assembly (actix, the engine, the event pipeline) on a
//! local port with a throwaway Sqlite database, an in-process fast store, and scripted doubles
//! for the provider and the merchant's notify endpoint. See [`helpers::BpgWorld`].
pub mod helpers;
