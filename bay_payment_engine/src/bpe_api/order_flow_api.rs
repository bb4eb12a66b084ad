use std::{collections::HashMap, fmt::Debug};

use bpg_common::{signature, Money};
use chrono::{Duration, NaiveDateTime, TimeZone, Utc};
use log::*;

use crate::{
    bpe_api::{
        errors::OrderFlowError,
        order_number,
        order_objects::{CloseOutcome, CreateOrderRequest, OpenOutcome, OrderQueryFilter, WebhookOutcome},
        royalty_api::ROYALTY_QUEUE_KEY,
    },
    db_types::{
        Merchant,
        NewOrder,
        Order,
        OrderNo,
        PaymentConfirmation,
        PayStatus,
        RoyaltyMessage,
        Subject,
    },
    events::{EventProducers, OrderClosedEvent, OrderPaidEvent},
    helpers::new_trace_id,
    traits::{FastStore, PaymentGatewayDatabase, PaymentGatewayError, PaymentProvider, ProviderOrderStatus},
};

/// Orders stay payable for this long after creation unless configured otherwise.
pub const DEFAULT_ORDER_LIFETIME_SECS: i64 = 600;

/// Trade statuses in a provider callback that count as "the buyer has paid".
pub const PAID_TRADE_STATUSES: [&str; 2] = ["TRADE_SUCCESS", "TRADE_FINISHED"];

/// TTL on the webhook dedup fence. Only needs to outlive a provider redelivery burst; the sticky
/// `Paid` state covers everything beyond that.
pub const WEBHOOK_DEDUP_TTL_SECS: u64 = 300;

/// `OrderFlowApi` is the primary API for the order lifecycle: creation, the cashier-page open
/// hook, merchant queries, reconcile-then-close, the provider payment callback and the refund
/// marker. Every `pay_status` transition in the system funnels through this type.
pub struct OrderFlowApi<B, F> {
    db: B,
    store: F,
    producers: EventProducers,
    order_lifetime: Duration,
}

impl<B, F> Debug for OrderFlowApi<B, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B, F> OrderFlowApi<B, F> {
    pub fn new(db: B, store: F, producers: EventProducers) -> Self {
        Self { db, store, producers, order_lifetime: Duration::seconds(DEFAULT_ORDER_LIFETIME_SECS) }
    }

    pub fn with_order_lifetime(mut self, lifetime: Duration) -> Self {
        self.order_lifetime = lifetime;
        self
    }
}

impl<B, F> OrderFlowApi<B, F>
where
    B: PaymentGatewayDatabase,
    F: FastStore,
{
    /// Resolves and authenticates the merchant behind a signed API request.
    ///
    /// Checks, in order: the `api_key` parameter is present and known, the merchant is enabled,
    /// the caller's IP is allowed, and the request signature verifies against the merchant's
    /// secret and configured digest algorithm. Every failure collapses into the same
    /// [`OrderFlowError::InvalidCredentials`] so that callers cannot probe which check failed.
    pub async fn authenticate(
        &self,
        params: &HashMap<String, String>,
        client_ip: Option<&str>,
    ) -> Result<Merchant, OrderFlowError> {
        let Some(api_key) = params.get("api_key").filter(|k| !k.is_empty()) else {
            debug!("🔄️ Authentication failed. No api_key in the request.");
            return Err(OrderFlowError::InvalidCredentials);
        };
        let Some(merchant) = self.db.fetch_merchant_by_api_key(api_key).await? else {
            debug!("🔄️ Authentication failed. Unknown api_key.");
            return Err(OrderFlowError::InvalidCredentials);
        };
        if !merchant.is_enabled() {
            debug!("🔄️ Authentication failed. Merchant {} is disabled.", merchant.id);
            return Err(OrderFlowError::InvalidCredentials);
        }
        if !merchant.allows_ip(client_ip.unwrap_or("")) {
            debug!("🔄️ Authentication failed. IP {client_ip:?} is not whitelisted for merchant {}.", merchant.id);
            return Err(OrderFlowError::InvalidCredentials);
        }
        if !signature::verify(params, &merchant.api_secret, merchant.signature_algo()) {
            debug!("🔄️ Authentication failed. Bad signature for merchant {}.", merchant.id);
            return Err(OrderFlowError::InvalidCredentials);
        }
        Ok(merchant)
    }

    /// Creates a new order for an authenticated merchant.
    ///
    /// Validation order: required fields and a positive amount, an enabled product for the
    /// merchant's agent, a usable subject (explicit or randomly picked within its amount limits),
    /// and no existing order with the same merchant order number. The platform order number is
    /// issued through the fenced issuer, so two racing create calls can never end up with the
    /// same number. The order lands in `Created` with a ten-minute expiry by default.
    pub async fn create_order(&self, merchant: &Merchant, req: CreateOrderRequest) -> Result<Order, OrderFlowError> {
        let merchant_order_no = req.merchant_order_no.trim();
        if merchant_order_no.is_empty() || merchant_order_no.len() > 64 {
            return Err(OrderFlowError::Validation("merchant_order_no must be 1-64 characters".into()));
        }
        if req.product_code.trim().is_empty() {
            return Err(OrderFlowError::Validation("product_code is required".into()));
        }
        if !req.amount.is_positive() {
            return Err(OrderFlowError::Validation("amount must be greater than zero".into()));
        }
        let Some(product) = self.db.fetch_enabled_product(merchant.agent_id, req.product_code.trim()).await? else {
            return Err(OrderFlowError::Validation(format!(
                "product code '{}' is unknown or disabled",
                req.product_code.trim()
            )));
        };
        let subject = self.resolve_subject(merchant, &req).await?;
        if let Some(existing) = self.db.fetch_order_by_merchant_order(merchant.id, merchant_order_no).await? {
            debug!(
                "🔄️ Merchant {} resubmitted order no {merchant_order_no}, which is already order [{}]",
                merchant.id, existing.platform_order_no
            );
            return Err(PaymentGatewayError::DuplicateMerchantOrder(merchant_order_no.to_string()).into());
        }
        let platform_order_no = order_number::issue(&self.db, &self.store, merchant.agent_id).await?;
        let now = Utc::now();
        let new_order = NewOrder {
            platform_order_no,
            merchant_order_no: merchant_order_no.to_string(),
            trace_id: new_trace_id(),
            agent_id: merchant.agent_id,
            merchant_id: merchant.id,
            product_id: product.id,
            subject_id: subject.id,
            amount: req.amount,
            payment_method: product.payment_method.clone(),
            notify_url: req.notify_url.filter(|u| !u.is_empty()).or_else(|| merchant.notify_url.clone()),
            return_url: req.return_url.filter(|u| !u.is_empty()).or_else(|| merchant.return_url.clone()),
            client_ip: req.client_ip,
            expires_at: now + self.order_lifetime,
        };
        let order = self.db.insert_order(new_order).await?;
        info!("🔄️ [{}] Created {order}", order.trace_id);
        Ok(order)
    }

    async fn resolve_subject(&self, merchant: &Merchant, req: &CreateOrderRequest) -> Result<Subject, OrderFlowError> {
        match req.subject_id {
            Some(id) => {
                let subject = self.db.fetch_subject(id).await?;
                match subject {
                    Some(s) if s.agent_id == merchant.agent_id && s.is_enabled() && s.accepts_amount(req.amount) => Ok(s),
                    _ => Err(OrderFlowError::Validation(format!("subject {id} is not available for this payment"))),
                }
            },
            None => {
                let subject = self.db.pick_subject_for_payment(merchant.agent_id, req.amount).await?;
                subject.ok_or_else(|| {
                    OrderFlowError::Validation(format!("no payment subject accepts an amount of {}", req.amount))
                })
            },
        }
    }

    /// The cashier-page hook. Marks a `Created` order as `Opened`, enforcing expiry at the door:
    /// an expired order is closed on the spot instead of being rendered.
    pub async fn open_order(&self, order_no: &OrderNo) -> Result<OpenOutcome, OrderFlowError> {
        let Some(order) = self.db.fetch_order_by_order_no(order_no).await? else {
            return Err(PaymentGatewayError::OrderNotFound(order_no.clone()).into());
        };
        let outcome = match order.pay_status {
            PayStatus::Created | PayStatus::Opened if order.is_expired_at(Utc::now()) => {
                let closed = self.db.close_order(order_no).await?;
                warn!("🔄️ [{}] Cashier page requested for expired order [{order_no}]. Closed it.", closed.trace_id);
                self.publish_order_closed(&closed).await;
                OpenOutcome::Expired(closed)
            },
            PayStatus::Created => {
                let opened = self.db.mark_order_opened(order_no).await?;
                debug!("🔄️ [{}] Order [{order_no}] opened", opened.trace_id);
                OpenOutcome::Opened(opened)
            },
            PayStatus::Opened => OpenOutcome::AlreadyOpen(order),
            PayStatus::Paid | PayStatus::Closed | PayStatus::Refunded => OpenOutcome::NotPayable(order),
        };
        Ok(outcome)
    }

    /// Fetches an order on behalf of a merchant, by platform order number or by the merchant's own
    /// order number. Orders belonging to other merchants are indistinguishable from absent ones.
    pub async fn query_order(
        &self,
        merchant: &Merchant,
        platform_order_no: Option<&OrderNo>,
        merchant_order_no: Option<&str>,
    ) -> Result<Order, OrderFlowError> {
        self.resolve_merchant_order(merchant, platform_order_no, merchant_order_no).await
    }

    /// Reconcile-then-close. The provider is asked for the order's real status first; a close only
    /// goes through when the provider agrees that no payment happened. If the provider reports a
    /// payment, the order is marked paid instead, with the full set of paid side effects.
    pub async fn close_order<P: PaymentProvider>(
        &self,
        provider: &P,
        merchant: &Merchant,
        platform_order_no: Option<&OrderNo>,
        merchant_order_no: Option<&str>,
    ) -> Result<CloseOutcome, OrderFlowError> {
        let order = self.resolve_merchant_order(merchant, platform_order_no, merchant_order_no).await?;
        match order.pay_status {
            PayStatus::Paid => return Ok(CloseOutcome::AlreadyPaid(order)),
            PayStatus::Closed => return Ok(CloseOutcome::AlreadyClosed(order)),
            PayStatus::Refunded => {
                return Err(PaymentGatewayError::OrderModificationForbidden(
                    "a refunded order cannot be closed".to_string(),
                )
                .into())
            },
            PayStatus::Created | PayStatus::Opened => {},
        }
        match provider.query_order(&order.platform_order_no).await? {
            ProviderOrderStatus::Paid { trade_no, amount, paid_at, buyer_id } => {
                warn!(
                    "🔄️ [{}] Close requested for order [{}], but the provider reports it as paid. Marking it paid.",
                    order.trace_id, order.platform_order_no
                );
                let confirmation = PaymentConfirmation {
                    platform_order_no: order.platform_order_no.clone(),
                    trade_no,
                    amount,
                    paid_at,
                    buyer_id,
                };
                let (order, newly_paid) = self.db.mark_order_paid(&confirmation).await?;
                if newly_paid {
                    self.order_paid_side_effects(&order, None, None).await;
                }
                Ok(CloseOutcome::PaidInstead(order))
            },
            _ => {
                let order = self.db.close_order(&order.platform_order_no).await?;
                info!("🔄️ [{}] Closed {order}", order.trace_id);
                self.publish_order_closed(&order).await;
                Ok(CloseOutcome::Closed(order))
            },
        }
    }

    /// Processes one provider payment callback.
    ///
    /// The signature is verified before anything else; an unverifiable callback changes no state.
    /// Deliveries are deduplicated through a short-lived fence on (order, trade) in the fast
    /// store, but correctness never depends on it: `mark_order_paid` treats an already-`Paid`
    /// order as an acknowledged no-op, so redeliveries are safe even with the fast store down.
    /// Post-commit side effects (the paid event and the settlement queue message) are fire and
    /// forget; their failures are logged and never fail the callback.
    pub async fn handle_payment_confirmation<P: PaymentProvider>(
        &self,
        provider: &P,
        params: &HashMap<String, String>,
        remote_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<WebhookOutcome, OrderFlowError> {
        if !provider.verify_callback(params) {
            warn!("🔄️ Provider callback with a bad signature from {remote_ip:?}. Ignoring it.");
            return Err(OrderFlowError::InvalidProviderSignature);
        }
        let Some(order_no) = params.get("out_trade_no").filter(|v| !v.is_empty()) else {
            return Err(OrderFlowError::Validation("the callback carries no out_trade_no".into()));
        };
        let order_no = OrderNo::from(order_no.as_str());
        let trade_status = params.get("trade_status").map(String::as_str).unwrap_or_default();
        if !PAID_TRADE_STATUSES.contains(&trade_status) {
            debug!("🔄️ Callback for order [{order_no}] with trade status '{trade_status}'. Nothing to do.");
            return Ok(WebhookOutcome::Ignored);
        }
        let Some(order) = self.db.fetch_order_by_order_no(&order_no).await? else {
            warn!("🔄️ Callback for unknown order [{order_no}]");
            return Err(PaymentGatewayError::OrderNotFound(order_no).into());
        };
        let Some(trade_no) = params.get("trade_no").filter(|v| !v.is_empty()).cloned() else {
            return Err(OrderFlowError::Validation("the callback carries no trade_no".into()));
        };
        let amount = params
            .get("total_amount")
            .and_then(|v| v.parse::<Money>().ok())
            .ok_or_else(|| OrderFlowError::Validation("the callback carries no parsable total_amount".into()))?;
        if amount != order.amount {
            warn!(
                "🔄️ [{}] Callback for order [{}] carries amount {amount}, but the order is for {}. Rejecting.",
                order.trace_id, order.platform_order_no, order.amount
            );
            return Err(OrderFlowError::Validation("the callback amount does not match the order".into()));
        }
        let dedup_key = format!("notify:dedup:{}:{trade_no}", order.platform_order_no);
        match self.store.set_if_absent(&dedup_key, "1", WEBHOOK_DEDUP_TTL_SECS).await {
            Ok(true) => {},
            Ok(false) => {
                if order.pay_status == PayStatus::Paid {
                    debug!(
                        "🔄️ [{}] Redelivered confirmation for paid order [{}]. Acknowledging without side effects.",
                        order.trace_id, order.platform_order_no
                    );
                    return Ok(WebhookOutcome::AlreadyPaid(order));
                }
                // The fence is set but the order never made it to Paid. A previous delivery must
                // have died mid-processing, so this one carries on.
            },
            Err(e) => {
                warn!("🔄️ [{}] Webhook dedup fence unavailable ({e}). Continuing without it.", order.trace_id);
            },
        }
        let paid_at = params
            .get("gmt_payment")
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
            .map(|t| Utc.from_utc_datetime(&t))
            .unwrap_or_else(Utc::now);
        let confirmation = PaymentConfirmation {
            platform_order_no: order.platform_order_no.clone(),
            trade_no,
            amount,
            paid_at,
            buyer_id: params.get("buyer_id").filter(|v| !v.is_empty()).cloned(),
        };
        let (order, newly_paid) = self.db.mark_order_paid(&confirmation).await?;
        if newly_paid {
            info!("🔄️ [{}] Payment confirmed for {order}", order.trace_id);
            self.order_paid_side_effects(&order, remote_ip, user_agent).await;
            Ok(WebhookOutcome::MarkedPaid(order))
        } else {
            debug!("🔄️ [{}] Order [{}] was already paid", order.trace_id, order.platform_order_no);
            Ok(WebhookOutcome::AlreadyPaid(order))
        }
    }

    /// Operator-initiated refund marker. The actual movement of money happens out of band.
    pub async fn mark_order_refunded(&self, order_no: &OrderNo) -> Result<Order, OrderFlowError> {
        let order = self.db.mark_order_refunded(order_no).await?;
        info!("🔄️ [{}] Refund recorded for {order}", order.trace_id);
        Ok(order)
    }

    /// Closes every order whose expiry has passed and publishes a closed event for each. The
    /// expiry worker calls this on an interval.
    pub async fn expire_due_orders(&self) -> Result<Vec<Order>, OrderFlowError> {
        let expired = self.db.expire_due_orders().await?;
        for order in &expired {
            debug!("🔄️ [{}] Order [{}] expired", order.trace_id, order.platform_order_no);
            self.publish_order_closed(order).await;
        }
        Ok(expired)
    }

    /// Dynamic order search for the operator API.
    pub async fn search_orders(&self, filter: OrderQueryFilter) -> Result<Vec<Order>, OrderFlowError> {
        Ok(self.db.search_orders(filter).await?)
    }

    async fn resolve_merchant_order(
        &self,
        merchant: &Merchant,
        platform_order_no: Option<&OrderNo>,
        merchant_order_no: Option<&str>,
    ) -> Result<Order, OrderFlowError> {
        let order = if let Some(order_no) = platform_order_no {
            self.db.fetch_order_by_order_no(order_no).await?
        } else if let Some(mon) = merchant_order_no.map(str::trim).filter(|m| !m.is_empty()) {
            self.db.fetch_order_by_merchant_order(merchant.id, mon).await?
        } else {
            return Err(OrderFlowError::Validation(
                "either platform_order_no or merchant_order_no is required".into(),
            ));
        };
        match order {
            Some(order) if order.merchant_id == merchant.id => Ok(order),
            _ => {
                let reference = platform_order_no
                    .cloned()
                    .or_else(|| merchant_order_no.map(OrderNo::from))
                    .unwrap_or_else(|| OrderNo::from(""));
                Err(PaymentGatewayError::OrderNotFound(reference).into())
            },
        }
    }

    /// Everything that happens after an order becomes `Paid`: the paid event for the notification
    /// pipeline and the settlement queue message. Both are fire and forget.
    async fn order_paid_side_effects(&self, order: &Order, remote_ip: Option<&str>, user_agent: Option<&str>) {
        for producer in &self.producers.order_paid_producer {
            producer.publish_event(OrderPaidEvent::new(order.clone())).await;
        }
        let msg = RoyaltyMessage::with_operator(order.id, remote_ip.map(String::from), user_agent.map(String::from));
        match serde_json::to_string(&msg) {
            Ok(payload) => {
                if let Err(e) = self.store.queue_push(ROYALTY_QUEUE_KEY, &payload).await {
                    warn!(
                        "🔄️ [{}] Could not enqueue the settlement message: {e}. The backstop scanner will pick this \
                         order up.",
                        order.trace_id
                    );
                }
            },
            Err(e) => error!("🔄️ [{}] Could not serialize the settlement message: {e}", order.trace_id),
        }
    }

    async fn publish_order_closed(&self, order: &Order) {
        for producer in &self.producers.order_closed_producer {
            producer.publish_event(OrderClosedEvent::new(order.clone())).await;
        }
    }
}
