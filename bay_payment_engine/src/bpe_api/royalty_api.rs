//! Asynchronous royalty settlement.
//!
//! Paid orders owe a profit share to the payee configured on their subject. The share is settled
//! through the provider, asynchronously, driven by a FIFO queue in the fast store: the webhook
//! path pushes a message when an order becomes paid, the worker pops one message per tick, and a
//! backstop scanner re-queues paid orders whose settlement fell through the cracks.
//!
//! The settlement row (`OrderRoyalty`) is the source of truth, not the queue. Messages are cheap
//! and can be lost, duplicated or malformed; every decision re-derives from the row, and the
//! `Pending`→`Processing` conditional update is the lease that makes the provider call
//! exactly-once per attempt even with racing workers.

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{NewOrderRoyalty, Order, OrderRoyalty, PayStatus, RoyaltyMessage, RoyaltyStatus, RoyaltyType, SettlementRequest, Subject},
    events::{EventProducers, OperatorAlert, OperatorAlertEvent},
    traits::{FastStore, PaymentGatewayDatabase, PaymentProvider, ProviderError, RoyaltyApiError},
};

/// The fast-store list holding the settlement work queue.
pub const ROYALTY_QUEUE_KEY: &str = "royalty:queue";
/// Automatic settlement attempts per order before the row goes terminal.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_SECS: i64 = 60;
/// The merchant share for `RoyaltyType::Merchant` splits, in basis points.
pub const DEFAULT_MERCHANT_SHARE_BPS: i64 = 9000;
/// A `Processing` row older than this belongs to a dead worker and is released.
pub const DEFAULT_STALE_LEASE_SECS: i64 = 600;
/// The backstop only looks at orders paid at least this long ago, to stay out of the live
/// queue's way.
pub const DEFAULT_BACKSTOP_MIN_AGE_SECS: i64 = 300;
pub const DEFAULT_BACKSTOP_BATCH: i64 = 50;
/// Repeat operator alerts for the same order or subject are suppressed for this long.
pub const ALERT_DEDUP_TTL_SECS: u64 = 180;

pub fn royalty_failure_alert_key(order_id: i64) -> String {
    format!("royalty:failure:notify:{order_id}")
}

pub fn subject_disabled_alert_key(subject_id: i64) -> String {
    format!("subject:disabled:notify:{subject_id}")
}

#[derive(Debug, Clone)]
pub struct RoyaltyConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: i64,
    pub merchant_share_bps: i64,
    pub stale_lease_secs: i64,
    pub backstop_min_age_secs: i64,
    pub backstop_batch: i64,
}

impl Default for RoyaltyConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            merchant_share_bps: DEFAULT_MERCHANT_SHARE_BPS,
            stale_lease_secs: DEFAULT_STALE_LEASE_SECS,
            backstop_min_age_secs: DEFAULT_BACKSTOP_MIN_AGE_SECS,
            backstop_batch: DEFAULT_BACKSTOP_BATCH,
        }
    }
}

/// What one worker tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoyaltyTickOutcome {
    /// The queue was empty.
    Idle,
    /// The head of the queue is not due yet and went back.
    Deferred,
    /// The message was dropped: malformed, a duplicate, or aimed at a row an operator owns.
    Discarded,
    /// The order's subject keeps the full amount.
    NothingDue(i64),
    /// A transient obstacle. The message went back with a delay.
    Requeued(i64),
    Settled(i64),
    /// The row is terminal now. An operator has to pick it up.
    Abandoned(i64),
}

pub struct RoyaltyApi<B, F> {
    db: B,
    store: F,
    producers: EventProducers,
    config: RoyaltyConfig,
}

impl<B, F> RoyaltyApi<B, F> {
    pub fn new(db: B, store: F, producers: EventProducers, config: RoyaltyConfig) -> Self {
        Self { db, store, producers, config }
    }

    pub fn config(&self) -> &RoyaltyConfig {
        &self.config
    }
}

impl<B, F> RoyaltyApi<B, F>
where
    B: PaymentGatewayDatabase,
    F: FastStore,
{
    /// Puts a settlement message on the queue.
    pub async fn enqueue(&self, msg: RoyaltyMessage) -> Result<(), RoyaltyApiError> {
        let payload = serde_json::to_string(&msg)?;
        self.store.queue_push(ROYALTY_QUEUE_KEY, &payload).await?;
        debug!("👛️ Settlement for order id {} queued", msg.order_id);
        Ok(())
    }

    /// Manual settlement request from the operator API. The order must exist; everything else is
    /// decided by the worker when the message comes off the queue.
    pub async fn enqueue_for_order(
        &self,
        order_id: i64,
        operator_ip: Option<String>,
        operator_agent: Option<String>,
    ) -> Result<(), RoyaltyApiError> {
        let Some(order) = self.db.fetch_order_by_id(order_id).await? else {
            return Err(RoyaltyApiError::OrderNotFound(order_id));
        };
        info!("👛️ [{}] Operator queued a settlement for order [{}]", order.trace_id, order.platform_order_no);
        self.enqueue(RoyaltyMessage::with_operator(order.id, operator_ip, operator_agent)).await
    }

    /// Pops and processes at most one message. The worker loop calls this on a short interval and
    /// uses the outcome to decide whether to poll again immediately or sleep.
    pub async fn process_next<P: PaymentProvider>(&self, provider: &P) -> Result<RoyaltyTickOutcome, RoyaltyApiError> {
        let Some(raw) = self.store.queue_pop(ROYALTY_QUEUE_KEY).await? else {
            return Ok(RoyaltyTickOutcome::Idle);
        };
        let msg: RoyaltyMessage = match serde_json::from_str(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                error!("👛️ Discarding an unparsable queue message ({e}): {raw}");
                return Ok(RoyaltyTickOutcome::Discarded);
            },
        };
        if msg.is_deferred(Utc::now()) {
            self.store.queue_push(ROYALTY_QUEUE_KEY, &raw).await?;
            return Ok(RoyaltyTickOutcome::Deferred);
        }
        self.settle(provider, msg).await
    }

    async fn settle<P: PaymentProvider>(
        &self,
        provider: &P,
        msg: RoyaltyMessage,
    ) -> Result<RoyaltyTickOutcome, RoyaltyApiError> {
        let Some(order) = self.db.fetch_order_by_id(msg.order_id).await? else {
            error!("👛️ Settlement message for order id {}, but the order does not exist", msg.order_id);
            self.alert_once(
                royalty_failure_alert_key(msg.order_id),
                OperatorAlert::RoyaltyFailed { order_id: msg.order_id, message: "the order does not exist".to_string() },
            )
            .await;
            return Ok(RoyaltyTickOutcome::Discarded);
        };
        if order.pay_status != PayStatus::Paid {
            // Usually a race between the webhook commit and the worker. Give the order some time,
            // but not forever.
            return if msg.attempts < self.config.max_attempts {
                debug!(
                    "👛️ [{}] Order [{}] is {}, not Paid. Requeueing the settlement.",
                    order.trace_id, order.platform_order_no, order.pay_status
                );
                self.requeue(&msg).await?;
                Ok(RoyaltyTickOutcome::Requeued(order.id))
            } else {
                warn!(
                    "👛️ [{}] Order [{}] never reached Paid after {} settlement checks. Giving up.",
                    order.trace_id, order.platform_order_no, msg.attempts
                );
                self.alert_once(
                    royalty_failure_alert_key(order.id),
                    OperatorAlert::RoyaltyFailed {
                        order_id: order.id,
                        message: format!("the order is {} and never became payable", order.pay_status),
                    },
                )
                .await;
                Ok(RoyaltyTickOutcome::Abandoned(order.id))
            };
        }
        let existing = self.db.fetch_royalty_for_order(order.id).await?;
        if let Some(row) = &existing {
            match row.royalty_status {
                RoyaltyStatus::Success => {
                    debug!(
                        "👛️ [{}] Settlement for order [{}] already succeeded. Dropping the duplicate message.",
                        order.trace_id, order.platform_order_no
                    );
                    return Ok(RoyaltyTickOutcome::Discarded);
                },
                RoyaltyStatus::Processing => {
                    debug!(
                        "👛️ [{}] Another worker holds the settlement lease for order [{}]",
                        order.trace_id, order.platform_order_no
                    );
                    return Ok(RoyaltyTickOutcome::Discarded);
                },
                RoyaltyStatus::Failed if row.terminal => {
                    debug!(
                        "👛️ [{}] Settlement for order [{}] is terminal. An operator owns it now.",
                        order.trace_id, order.platform_order_no
                    );
                    return Ok(RoyaltyTickOutcome::Discarded);
                },
                RoyaltyStatus::Pending | RoyaltyStatus::Failed => {},
            }
        }
        let Some(subject) = self.db.fetch_subject(order.subject_id).await? else {
            error!("👛️ [{}] Order [{}] references subject {}, which does not exist", order.trace_id, order.platform_order_no, order.subject_id);
            self.alert_once(
                royalty_failure_alert_key(order.id),
                OperatorAlert::RoyaltyFailed {
                    order_id: order.id,
                    message: format!("subject {} does not exist", order.subject_id),
                },
            )
            .await;
            return Ok(RoyaltyTickOutcome::Discarded);
        };
        if subject.royalty_type == RoyaltyType::None {
            debug!(
                "👛️ [{}] Subject {} keeps the full amount of order [{}]. No settlement due.",
                order.trace_id, subject.id, order.platform_order_no
            );
            return Ok(RoyaltyTickOutcome::NothingDue(order.id));
        }
        if existing.is_none() {
            let split = match compute_split(&order, &subject, self.config.merchant_share_bps) {
                Ok(split) => split,
                Err(e) => {
                    error!(
                        "👛️ [{}] The settlement split for order [{}] is invalid: {e}",
                        order.trace_id, order.platform_order_no
                    );
                    self.alert_once(
                        royalty_failure_alert_key(order.id),
                        OperatorAlert::RoyaltyFailed { order_id: order.id, message: e.to_string() },
                    )
                    .await;
                    return Ok(RoyaltyTickOutcome::Discarded);
                },
            };
            match self.db.insert_royalty(split).await {
                Ok(_) => {},
                // A racing worker created the row first. The claim below decides who proceeds.
                Err(RoyaltyApiError::RoyaltyAlreadyExists(_)) => {},
                Err(e) => return Err(e),
            }
        }
        let Some(claimed) = self.db.claim_royalty(order.id).await? else {
            debug!("👛️ [{}] Could not claim the settlement lease for order [{}]", order.trace_id, order.platform_order_no);
            return Ok(RoyaltyTickOutcome::Discarded);
        };
        let request = SettlementRequest {
            order_id: order.id,
            platform_order_no: order.platform_order_no.clone(),
            trade_no: order.trade_no.clone().unwrap_or_default(),
            subject_id: subject.id,
            royalty_amount: claimed.royalty_amount,
            payee_account: claimed.payee_account.clone().unwrap_or_default(),
            payee_name: claimed.payee_name.clone().unwrap_or_default(),
            payee_user_id: claimed.payee_user_id.clone(),
        };
        match provider.settle_royalty(&request).await {
            Ok(receipt) => {
                self.db.complete_royalty_success(order.id, &receipt).await?;
                info!(
                    "👛️ [{}] Royalty of {} for order [{}] settled as {}",
                    order.trace_id, claimed.royalty_amount, order.platform_order_no, receipt.settle_no
                );
                Ok(RoyaltyTickOutcome::Settled(order.id))
            },
            Err(e) => self.record_settlement_failure(&order, &subject, &claimed, &msg, e).await,
        }
    }

    /// Re-runs a failed settlement from scratch: the old row is deleted and a fresh message is
    /// queued, so amounts and payee details are recomputed from the current subject.
    pub async fn retry(
        &self,
        order_id: i64,
        operator_ip: Option<String>,
        operator_agent: Option<String>,
    ) -> Result<(), RoyaltyApiError> {
        let Some(row) = self.db.fetch_royalty_for_order(order_id).await? else {
            return Err(RoyaltyApiError::RoyaltyNotFound(order_id));
        };
        if row.royalty_status != RoyaltyStatus::Failed {
            return Err(RoyaltyApiError::RetryNotAllowed(order_id, format!("the settlement is {}", row.royalty_status)));
        }
        if !self.db.delete_failed_royalty(order_id).await? {
            return Err(RoyaltyApiError::RetryNotAllowed(
                order_id,
                "the settlement changed state underneath the retry".to_string(),
            ));
        }
        info!("👛️ Operator retry for the settlement of order id {order_id}");
        self.enqueue(RoyaltyMessage::with_operator(order_id, operator_ip, operator_agent)).await
    }

    pub async fn royalty_status(&self, order_id: i64) -> Result<OrderRoyalty, RoyaltyApiError> {
        self.db.fetch_royalty_for_order(order_id).await?.ok_or(RoyaltyApiError::RoyaltyNotFound(order_id))
    }

    /// The safety net behind the queue: releases leases held by dead workers and re-queues paid
    /// orders that still lack a settlement. Returns how many orders were queued.
    pub async fn scan_backstop(&self) -> Result<usize, RoyaltyApiError> {
        let released = self.db.release_stale_royalties(Duration::seconds(self.config.stale_lease_secs)).await?;
        for row in &released {
            warn!("👛️ The settlement lease for order id {} expired. Released it for another attempt.", row.order_id);
        }
        let due = self
            .db
            .fetch_orders_needing_settlement(Duration::seconds(self.config.backstop_min_age_secs), self.config.backstop_batch)
            .await?;
        let queued = due.len();
        for order in due {
            debug!("👛️ [{}] Backstop queueing a settlement for order [{}]", order.trace_id, order.platform_order_no);
            self.enqueue(RoyaltyMessage::new(order.id)).await?;
        }
        Ok(queued)
    }

    async fn record_settlement_failure(
        &self,
        order: &Order,
        subject: &Subject,
        claimed: &OrderRoyalty,
        msg: &RoyaltyMessage,
        err: ProviderError,
    ) -> Result<RoyaltyTickOutcome, RoyaltyApiError> {
        match err {
            ProviderError::Transient(detail) => {
                let out_of_attempts = claimed.attempts >= self.config.max_attempts as i64;
                self.db.complete_royalty_failure(order.id, &detail, out_of_attempts).await?;
                if out_of_attempts {
                    warn!(
                        "👛️ [{}] Giving up on the settlement for order [{}] after {} attempts: {detail}",
                        order.trace_id, order.platform_order_no, claimed.attempts
                    );
                    self.alert_once(
                        royalty_failure_alert_key(order.id),
                        OperatorAlert::RoyaltyFailed {
                            order_id: order.id,
                            message: format!("abandoned after {} attempts: {detail}", claimed.attempts),
                        },
                    )
                    .await;
                    Ok(RoyaltyTickOutcome::Abandoned(order.id))
                } else {
                    debug!(
                        "👛️ [{}] Settlement attempt {} for order [{}] failed ({detail}). Will retry.",
                        order.trace_id, claimed.attempts, order.platform_order_no
                    );
                    self.requeue(msg).await?;
                    Ok(RoyaltyTickOutcome::Requeued(order.id))
                }
            },
            ProviderError::Terminal { .. } => {
                let message = err.to_string();
                self.db.complete_royalty_failure(order.id, &message, true).await?;
                warn!(
                    "👛️ [{}] The provider rejected the settlement for order [{}]: {message}",
                    order.trace_id, order.platform_order_no
                );
                if let Some(code) = err.disabling_code() {
                    match self.db.disable_subject(subject.id).await {
                        Ok(()) => {
                            warn!("👛️ Subject {} disabled after provider code {code}", subject.id);
                            self.alert_once(
                                subject_disabled_alert_key(subject.id),
                                OperatorAlert::SubjectDisabled { subject_id: subject.id, code: code.to_string() },
                            )
                            .await;
                        },
                        Err(e) => error!("👛️ Could not disable subject {}: {e}", subject.id),
                    }
                }
                self.alert_once(
                    royalty_failure_alert_key(order.id),
                    OperatorAlert::RoyaltyFailed { order_id: order.id, message },
                )
                .await;
                Ok(RoyaltyTickOutcome::Abandoned(order.id))
            },
        }
    }

    async fn requeue(&self, msg: &RoyaltyMessage) -> Result<(), RoyaltyApiError> {
        let delayed = msg.requeued(Duration::seconds(self.config.retry_delay_secs));
        let payload = serde_json::to_string(&delayed)?;
        self.store.queue_push(ROYALTY_QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Publishes an operator alert at most once per dedup window. A broken fast store widens the
    /// window to zero rather than muting alerts.
    async fn alert_once(&self, dedup_key: String, alert: OperatorAlert) {
        match self.store.set_if_absent(&dedup_key, "1", ALERT_DEDUP_TTL_SECS).await {
            Ok(true) => {},
            Ok(false) => return,
            Err(e) => warn!("👛️ Alert dedup is unavailable ({e}). Emitting the alert anyway."),
        }
        for producer in &self.producers.alert_producer {
            producer.publish_event(OperatorAlertEvent::new(alert.clone())).await;
        }
    }
}

/// Works out who gets what for one paid order.
///
/// `single` gives the payee `royalty_rate` basis points of the order amount, rounded half-up to
/// the cent; `merchant` gives the payee the fixed merchant share. The remainder stays with the
/// subject. Both shares must be non-negative and sum back to the order amount within one cent,
/// and the order must carry the provider trade number and the subject a payee, otherwise the
/// split is rejected as [`RoyaltyApiError::InvalidSplit`].
pub fn compute_split(order: &Order, subject: &Subject, merchant_share_bps: i64) -> Result<NewOrderRoyalty, RoyaltyApiError> {
    if order.trade_no.as_deref().map(str::is_empty).unwrap_or(true) {
        return Err(RoyaltyApiError::InvalidSplit(format!(
            "order [{}] has no provider trade number",
            order.platform_order_no
        )));
    }
    let rate = match subject.royalty_type {
        RoyaltyType::None => {
            return Err(RoyaltyApiError::InvalidSplit("no settlement is due for royalty type none".to_string()))
        },
        RoyaltyType::Single => subject.royalty_rate,
        RoyaltyType::Merchant => merchant_share_bps,
    };
    let royalty_amount = order.amount.share_bps(rate);
    let subject_amount = order.amount - royalty_amount;
    if royalty_amount.is_negative() || subject_amount.is_negative() {
        return Err(RoyaltyApiError::InvalidSplit(format!(
            "a share is negative: royalty {royalty_amount}, subject {subject_amount}"
        )));
    }
    if ((royalty_amount + subject_amount) - order.amount).value().abs() > 1 {
        return Err(RoyaltyApiError::InvalidSplit(format!(
            "the shares drift from the order amount: {royalty_amount} + {subject_amount} != {}",
            order.amount
        )));
    }
    let payee_account = subject.payee_account.clone().filter(|a| !a.is_empty());
    let payee_name = subject.payee_name.clone().filter(|n| !n.is_empty());
    if payee_account.is_none() || payee_name.is_none() {
        return Err(RoyaltyApiError::InvalidSplit(format!("subject {} has no payee on file", subject.id)));
    }
    Ok(NewOrderRoyalty {
        order_id: order.id,
        royalty_type: subject.royalty_type,
        royalty_rate: rate,
        royalty_amount,
        subject_amount,
        payee_account,
        payee_name,
        payee_user_id: subject.payee_user_id.clone(),
    })
}
