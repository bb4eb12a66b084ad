//! Platform order number issuance.
//!
//! Candidates have the shape `BY{agent_id}{YYYYMMDDHHMMSS}{XXXXXXXX}`: a fixed tag, the issuing
//! agent, a UTC timestamp and four random bytes in uppercase hex. The timestamp keeps numbers
//! roughly sortable for humans; the random suffix carries the actual uniqueness.
//!
//! Two concurrent create calls must never walk away with the same number, even across server
//! instances. Each candidate is therefore committed through an atomic `SET NX` fence in the fast
//! store before it is handed out. When the fast store is down, issuance degrades to a uniqueness
//! check against the durable store rather than failing the create call.

use chrono::{DateTime, Utc};
use log::*;
use rand::Rng;

use crate::{
    bpe_api::errors::OrderFlowError,
    db_types::OrderNo,
    traits::{FastStore, FastStoreError, PaymentGatewayDatabase},
};

/// Platform order numbers start with this tag.
pub const ORDER_NO_PREFIX: &str = "BY";
/// How many candidates are tried before giving up with [`OrderFlowError::OrderNumberExhausted`].
pub const ISSUE_RETRY_LIMIT: u32 = 10;
/// Lifetime of the issuance fence. Long enough to cover any create transaction, short enough that
/// numbers reserved by a crashed caller become available again.
pub const FENCE_TTL_SECS: u64 = 600;

pub fn fence_key(order_no: &OrderNo) -> String {
    format!("order:commit:{order_no}")
}

pub fn new_candidate(agent_id: i64, now: DateTime<Utc>) -> OrderNo {
    let suffix: u32 = rand::thread_rng().gen();
    OrderNo(format!("{ORDER_NO_PREFIX}{agent_id}{}{suffix:08X}", now.format("%Y%m%d%H%M%S")))
}

/// Issues a platform order number that no concurrent create call can be holding.
///
/// The happy path is one `SET NX` round trip. A fenced candidate (another caller got there first)
/// burns one attempt from the retry budget. If the fast store is unreachable, the degraded path
/// checks the candidate against the orders table instead and writes the fence back on a best
/// effort basis, so a fast-store outage slows creates down but does not stop them. An exhausted
/// budget is reported as [`OrderFlowError::OrderNumberExhausted`], which callers surface as
/// retryable.
pub async fn issue<B, F>(db: &B, store: &F, agent_id: i64) -> Result<OrderNo, OrderFlowError>
where
    B: PaymentGatewayDatabase,
    F: FastStore,
{
    let mut degraded_logged = false;
    for attempt in 1..=ISSUE_RETRY_LIMIT {
        let candidate = new_candidate(agent_id, Utc::now());
        let key = fence_key(&candidate);
        match store.set_if_absent(&key, "1", FENCE_TTL_SECS).await {
            Ok(true) => {
                trace!("🔄️ Order number {candidate} fenced on attempt {attempt}");
                return Ok(candidate);
            },
            Ok(false) => {
                debug!("🔄️ Order number {candidate} is already fenced. Trying another.");
            },
            Err(FastStoreError::Unavailable(e)) => {
                if !degraded_logged {
                    warn!("🔄️ Fast store is unavailable ({e}). Issuing order numbers against the durable store.");
                    degraded_logged = true;
                }
                if db.order_no_exists(&candidate).await? {
                    debug!("🔄️ Order number {candidate} is already taken. Trying another.");
                    continue;
                }
                // Best effort. If this fails as well, the unique index on the orders table still
                // catches a collision at insert time.
                let _ = store.set_if_absent(&key, "1", FENCE_TTL_SECS).await;
                return Ok(candidate);
            },
            Err(e) => return Err(e.into()),
        }
    }
    warn!("🔄️ No unique order number for agent {agent_id} after {ISSUE_RETRY_LIMIT} attempts");
    Err(OrderFlowError::OrderNumberExhausted(ISSUE_RETRY_LIMIT))
}
