//! Merchant notification dispatch with a per-merchant circuit breaker.
//!
//! The dispatcher owns everything between "this order is paid" and "the merchant has
//! acknowledged": building and signing the payload, classifying the delivery outcome, the
//! attempt bookkeeping on the order row, and the breaker state in the fast store. The HTTP POST
//! itself sits behind [`NotifyTransport`] so the server can plug in reqwest and the tests can
//! script outcomes.
//!
//! Breaker model: two rolling counters per merchant (timeouts and bad responses, one hour TTL).
//! When either reaches its threshold the circuit key is written with the cooldown as TTL and both
//! counters are cleared. While the circuit is open, automatic deliveries are skipped without a
//! network call; they still count as failed attempts so that a dead merchant endpoint runs out of
//! retries instead of queueing forever. Manual resends bypass the cap and the breaker.

use std::collections::HashMap;

use bpg_common::signature;
use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    bpe_api::errors::NotifyApiError,
    db_types::{Merchant, NotifyStatus, Order, PayStatus},
    events::{EventProducers, OperatorAlert, OperatorAlertEvent},
    traits::{FastStore, NotifyOutcome, NotifyTransport, PaymentGatewayDatabase, PaymentGatewayError},
};

pub const DEFAULT_FAILURE_THRESHOLD: i64 = 5;
pub const DEFAULT_CIRCUIT_SECS: u64 = 300;
pub const DEFAULT_COUNTER_TTL_SECS: u64 = 3600;
/// Automatic deliveries stop after this many attempts per order.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

pub fn circuit_key(merchant_id: i64) -> String {
    format!("notify:circuit:{merchant_id}")
}

pub fn timeout_counter_key(merchant_id: i64) -> String {
    format!("notify:timeout:cnt:{merchant_id}")
}

pub fn bad_response_counter_key(merchant_id: i64) -> String {
    format!("notify:badresp:cnt:{merchant_id}")
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub timeout_threshold: i64,
    pub bad_response_threshold: i64,
    pub circuit_secs: u64,
    pub counter_ttl_secs: u64,
    pub max_attempts: i64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            timeout_threshold: DEFAULT_FAILURE_THRESHOLD,
            bad_response_threshold: DEFAULT_FAILURE_THRESHOLD,
            circuit_secs: DEFAULT_CIRCUIT_SECS,
            counter_ttl_secs: DEFAULT_COUNTER_TTL_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// How one dispatch call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyDispatchResult {
    Delivered,
    Skipped(NotifySkipReason),
    TimedOut,
    /// The merchant endpoint answered, but not with an acknowledgement.
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotifySkipReason {
    NoUrl,
    AttemptCapReached,
    CircuitOpen(DateTime<Utc>),
}

pub struct NotifyApi<B, F> {
    db: B,
    store: F,
    producers: EventProducers,
    config: NotifyConfig,
}

impl<B, F> NotifyApi<B, F> {
    pub fn new(db: B, store: F, producers: EventProducers, config: NotifyConfig) -> Self {
        Self { db, store, producers, config }
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }
}

impl<B, F> NotifyApi<B, F>
where
    B: PaymentGatewayDatabase,
    F: FastStore,
{
    /// Delivers (or decides not to deliver) the paid notification for one order.
    ///
    /// `manual` marks an operator-forced resend, which ignores the attempt cap and the breaker.
    /// Every automatic dispatch decision is recorded on the order row, delivered or not, so
    /// `notify_times` counts attempts the system has spent on the order rather than packets on
    /// the wire.
    pub async fn notify_order_paid<T: NotifyTransport>(
        &self,
        transport: &T,
        order: &Order,
        manual: bool,
    ) -> Result<NotifyDispatchResult, NotifyApiError> {
        let Some(merchant) = self.db.fetch_merchant(order.merchant_id).await? else {
            return Err(NotifyApiError::MerchantNotFound(order.merchant_id));
        };
        let Some(url) = order.notify_url.as_deref().filter(|u| !u.is_empty()) else {
            debug!("📨️ [{}] Order [{}] has no notify url. Nothing to deliver.", order.trace_id, order.platform_order_no);
            return Ok(NotifyDispatchResult::Skipped(NotifySkipReason::NoUrl));
        };
        if !manual {
            if order.notify_times >= self.config.max_attempts {
                debug!(
                    "📨️ [{}] Order [{}] has used all {} notification attempts",
                    order.trace_id, order.platform_order_no, self.config.max_attempts
                );
                return Ok(NotifyDispatchResult::Skipped(NotifySkipReason::AttemptCapReached));
            }
            let circuit = match self.circuit_state(merchant.id).await {
                Ok(c) => c,
                Err(e) => {
                    warn!("📨️ Breaker state for merchant {} is unavailable ({e}). Treating it as closed.", merchant.id);
                    None
                },
            };
            if let Some(until) = circuit {
                self.db.update_notify_result(order.id, NotifyStatus::Failed).await?;
                warn!(
                    "📨️ [{}] Circuit for merchant {} is open until {until}. Skipping delivery of [{}].",
                    order.trace_id, merchant.id, order.platform_order_no
                );
                return Ok(NotifyDispatchResult::Skipped(NotifySkipReason::CircuitOpen(until)));
            }
        }
        let form = build_paid_payload(order, &merchant, Utc::now());
        match transport.deliver(url, &form).await {
            NotifyOutcome::Success => {
                self.db.update_notify_result(order.id, NotifyStatus::Success).await?;
                self.reset_breaker(merchant.id).await;
                info!("📨️ [{}] Merchant {} acknowledged the notification for [{}]", order.trace_id, merchant.id, order.platform_order_no);
                Ok(NotifyDispatchResult::Delivered)
            },
            NotifyOutcome::Timeout(detail) => {
                debug!("📨️ [{}] Notification for [{}] timed out: {detail}", order.trace_id, order.platform_order_no);
                self.record_failure(order, merchant.id, &timeout_counter_key(merchant.id), self.config.timeout_threshold)
                    .await?;
                Ok(NotifyDispatchResult::TimedOut)
            },
            NotifyOutcome::BadResponse(detail) => {
                debug!("📨️ [{}] Notification for [{}] was not acknowledged: {detail}", order.trace_id, order.platform_order_no);
                self.record_failure(
                    order,
                    merchant.id,
                    &bad_response_counter_key(merchant.id),
                    self.config.bad_response_threshold,
                )
                .await?;
                Ok(NotifyDispatchResult::Rejected)
            },
        }
    }

    /// Orders that still want an automatic delivery attempt. Fodder for the retry worker.
    pub async fn fetch_retry_candidates(&self, limit: i64) -> Result<Vec<Order>, NotifyApiError> {
        Ok(self.db.fetch_orders_for_notify_retry(self.config.max_attempts, limit).await?)
    }

    /// Operator-forced resend for an order referenced by its internal id. Runs as a manual
    /// dispatch, so neither the attempt cap nor the breaker applies.
    pub async fn resend<T: NotifyTransport>(
        &self,
        transport: &T,
        order_id: i64,
    ) -> Result<NotifyDispatchResult, NotifyApiError> {
        let Some(order) = self.db.fetch_order_by_id(order_id).await? else {
            return Err(PaymentGatewayError::OrderIdNotFound(order_id).into());
        };
        info!("📨️ [{}] Operator requested a resend for order [{}]", order.trace_id, order.platform_order_no);
        self.notify_order_paid(transport, &order, true).await
    }

    /// When the circuit for this merchant is open, the instant it closes again.
    pub async fn circuit_state(&self, merchant_id: i64) -> Result<Option<DateTime<Utc>>, NotifyApiError> {
        let Some(value) = self.store.get(&circuit_key(merchant_id)).await? else {
            return Ok(None);
        };
        let until = value.parse::<i64>().ok().and_then(|t| DateTime::from_timestamp(t, 0));
        match until {
            Some(until) if until > Utc::now() => Ok(Some(until)),
            Some(_) => Ok(None),
            None => {
                warn!("📨️ Unparsable circuit value '{value}' for merchant {merchant_id}. Treating it as closed.");
                Ok(None)
            },
        }
    }

    /// Operator escape hatch: drops the circuit and both failure counters for a merchant.
    pub async fn clear_circuit(&self, merchant_id: i64) -> Result<(), NotifyApiError> {
        let keys =
            [circuit_key(merchant_id), timeout_counter_key(merchant_id), bad_response_counter_key(merchant_id)];
        self.store.delete(&[&keys[0], &keys[1], &keys[2]]).await?;
        info!("📨️ Circuit and failure counters for merchant {merchant_id} cleared");
        Ok(())
    }

    async fn record_failure(
        &self,
        order: &Order,
        merchant_id: i64,
        counter_key: &str,
        threshold: i64,
    ) -> Result<(), NotifyApiError> {
        self.db.update_notify_result(order.id, NotifyStatus::Failed).await?;
        let count = match self.store.increment_with_ttl(counter_key, self.config.counter_ttl_secs).await {
            Ok(count) => count,
            Err(e) => {
                warn!("📨️ Breaker bookkeeping for merchant {merchant_id} is unavailable: {e}");
                return Ok(());
            },
        };
        if count >= threshold {
            self.open_circuit(merchant_id).await;
        }
        Ok(())
    }

    async fn open_circuit(&self, merchant_id: i64) {
        let until = Utc::now() + Duration::seconds(self.config.circuit_secs as i64);
        let key = circuit_key(merchant_id);
        if let Err(e) = self.store.set_with_ttl(&key, &until.timestamp().to_string(), self.config.circuit_secs).await {
            warn!("📨️ Could not open the circuit for merchant {merchant_id}: {e}");
            return;
        }
        let counters = [timeout_counter_key(merchant_id), bad_response_counter_key(merchant_id)];
        if let Err(e) = self.store.delete(&[&counters[0], &counters[1]]).await {
            warn!("📨️ Could not reset the failure counters for merchant {merchant_id}: {e}");
        }
        warn!("📨️ Circuit opened for merchant {merchant_id} until {until}");
        for producer in &self.producers.alert_producer {
            producer.publish_event(OperatorAlertEvent::new(OperatorAlert::CircuitOpened { merchant_id, until })).await;
        }
    }

    async fn reset_breaker(&self, merchant_id: i64) {
        let keys =
            [circuit_key(merchant_id), timeout_counter_key(merchant_id), bad_response_counter_key(merchant_id)];
        if let Err(e) = self.store.delete(&[&keys[0], &keys[1], &keys[2]]).await {
            warn!("📨️ Could not reset the breaker state for merchant {merchant_id}: {e}");
        }
    }
}

/// The signed form body a merchant receives when an order is paid.
///
/// Merchants verify it with the same canonical scheme they sign requests with, so the field set
/// here is part of the public integration contract.
pub fn build_paid_payload(order: &Order, merchant: &Merchant, now: DateTime<Utc>) -> Vec<(String, String)> {
    let paid_at = order.paid_at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()).unwrap_or_default();
    let mut form = vec![
        ("platform_order_no".to_string(), order.platform_order_no.to_string()),
        ("merchant_order_no".to_string(), order.merchant_order_no.clone()),
        ("amount".to_string(), order.amount.to_string()),
        ("pay_status".to_string(), PayStatus::Paid.as_code().to_string()),
        ("trade_no".to_string(), order.trade_no.clone().unwrap_or_default()),
        ("paid_at".to_string(), paid_at),
        ("timestamp".to_string(), now.timestamp().to_string()),
    ];
    let params: HashMap<String, String> = form.iter().cloned().collect();
    let sig = signature::sign(&params, &merchant.api_secret, merchant.signature_algo());
    form.push((signature::SIGN_FIELD.to_string(), sig));
    form
}
