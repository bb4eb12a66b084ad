//! Small helper functions shared across the engine.

use rand::Rng;

/// Generates a new 32-character lowercase hex trace id.
///
/// Every order carries one from creation so that log lines from the create call, the provider
/// callback, the notification attempts and the settlement worker can all be tied together.
pub fn new_trace_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}
