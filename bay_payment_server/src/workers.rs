//! Background workers. Each one is a tokio task on its own clock; they share the engine APIs with
//! the request handlers and add no logic of their own beyond pacing and logging.

use bay_payment_engine::{
    db_types::Order,
    events::EventProducers,
    NotifyApi,
    NotifyConfig,
    OrderFlowApi,
    RedisStore,
    RoyaltyApi,
    RoyaltyConfig,
    RoyaltyTickOutcome,
    SqliteDatabase,
};
use chrono::Duration;
use log::*;
use tokio::task::JoinHandle;

use crate::integrations::{HttpNotifier, ProviderClient};

/// How many notification retry candidates one sweep picks up.
const NOTIFY_RETRY_BATCH: i64 = 50;

/// Starts the expiry worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// The cashier page already closes expired orders at the door; this sweep catches the orders
/// nobody ever tried to open.
pub fn start_expiry_worker(
    db: SqliteDatabase,
    store: RedisStore,
    producers: EventProducers,
    order_lifetime: Duration,
    interval_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        let api = OrderFlowApi::new(db, store, producers).with_order_lifetime(order_lifetime);
        info!("🕰️ Order expiry worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running order expiry sweep");
            match api.expire_due_orders().await {
                Ok(closed) if closed.is_empty() => {},
                Ok(closed) => {
                    info!("🕰️ {} orders expired: {}", closed.len(), order_list(&closed));
                },
                Err(e) => {
                    error!("🕰️ Error running the order expiry sweep: {e}");
                },
            }
        }
    })
}

/// Starts the notification retry worker. Do not await the returned JoinHandle.
///
/// Picks up paid orders whose merchants have not acknowledged yet and re-dispatches them as
/// automatic deliveries, so the attempt cap and the circuit breaker both apply.
pub fn start_notify_worker(
    db: SqliteDatabase,
    store: RedisStore,
    producers: EventProducers,
    config: NotifyConfig,
    transport: HttpNotifier,
    interval_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        let api = NotifyApi::new(db, store, producers, config);
        info!("🕰️ Notification retry worker started");
        loop {
            timer.tick().await;
            let candidates = match api.fetch_retry_candidates(NOTIFY_RETRY_BATCH).await {
                Ok(c) => c,
                Err(e) => {
                    error!("🕰️ Could not fetch notification retry candidates: {e}");
                    continue;
                },
            };
            if candidates.is_empty() {
                continue;
            }
            debug!("🕰️ {} orders waiting for a notification retry", candidates.len());
            for order in &candidates {
                if let Err(e) = api.notify_order_paid(&transport, order, false).await {
                    error!(
                        "🕰️ [{}] Notification retry for order [{}] failed: {e}",
                        order.trace_id, order.platform_order_no
                    );
                }
            }
        }
    })
}

/// Starts the settlement queue worker. Do not await the returned JoinHandle.
///
/// Processes one message per tick and polls again immediately while the queue has work, so a
/// burst drains at full speed without hot-looping on an empty queue.
pub fn start_royalty_worker(
    db: SqliteDatabase,
    store: RedisStore,
    producers: EventProducers,
    config: RoyaltyConfig,
    provider: ProviderClient,
    poll_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let api = RoyaltyApi::new(db, store, producers, config);
        info!("🕰️ Settlement worker started");
        loop {
            match api.process_next(&provider).await {
                Ok(RoyaltyTickOutcome::Idle) | Ok(RoyaltyTickOutcome::Deferred) => {
                    tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
                },
                Ok(outcome) => {
                    trace!("🕰️ Settlement tick: {outcome:?}");
                },
                Err(e) => {
                    error!("🕰️ Settlement tick failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
                },
            }
        }
    })
}

/// Starts the settlement backstop scanner. Do not await the returned JoinHandle.
///
/// Releases leases held by dead workers and re-queues paid orders the queue forgot about.
pub fn start_backstop_worker(
    db: SqliteDatabase,
    store: RedisStore,
    producers: EventProducers,
    config: RoyaltyConfig,
    interval_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        let api = RoyaltyApi::new(db, store, producers, config);
        info!("🕰️ Settlement backstop scanner started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running settlement backstop scan");
            match api.scan_backstop().await {
                Ok(0) => {},
                Ok(queued) => info!("🕰️ Backstop queued {queued} forgotten settlements"),
                Err(e) => error!("🕰️ Error running the settlement backstop scan: {e}"),
            }
        }
    })
}

fn order_list(orders: &[Order]) -> String {
    orders
        .iter()
        .map(|o| format!("[{}] merchant: {} amount: {}", o.platform_order_no, o.merchant_id, o.amount))
        .collect::<Vec<String>>()
        .join(", ")
}
