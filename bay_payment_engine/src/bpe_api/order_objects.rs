use std::fmt::Display;

use bpg_common::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{NotifyStatus, Order, OrderNo, PayStatus};

/// The validated payload of a merchant's create-order call. The server builds this after the
/// signature has been checked; everything in here is still subject to business validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub merchant_order_no: String,
    pub product_code: String,
    pub amount: Money,
    /// Route through this specific subject. When absent, an enabled subject of the agent that
    /// accepts the amount is picked at random.
    pub subject_id: Option<i64>,
    /// Overrides the merchant's configured notification URL for this order.
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
}

/// What happened when the cashier page asked to open an order.
#[derive(Debug, Clone)]
pub enum OpenOutcome {
    /// `Created` → `Opened`. First render of the payment page.
    Opened(Order),
    /// The page was rendered before. Not an error, the order is still payable.
    AlreadyOpen(Order),
    /// The order was past its expiry and has been closed instead.
    Expired(Order),
    /// Paid, closed or refunded. The page should show the final state instead of a cashier.
    NotPayable(Order),
}

impl OpenOutcome {
    pub fn order(&self) -> &Order {
        match self {
            OpenOutcome::Opened(o) | OpenOutcome::AlreadyOpen(o) | OpenOutcome::Expired(o) | OpenOutcome::NotPayable(o) => o,
        }
    }
}

/// The result of a reconcile-then-close call.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    Closed(Order),
    AlreadyClosed(Order),
    /// The provider reported a payment while we were trying to close, so the order was marked paid
    /// instead of closed.
    PaidInstead(Order),
    AlreadyPaid(Order),
}

impl CloseOutcome {
    pub fn order(&self) -> &Order {
        match self {
            CloseOutcome::Closed(o) | CloseOutcome::AlreadyClosed(o) | CloseOutcome::PaidInstead(o) | CloseOutcome::AlreadyPaid(o) => o,
        }
    }
}

/// The result of processing one provider payment callback.
#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    /// This delivery performed the `Paid` transition.
    MarkedPaid(Order),
    /// A redelivery of a confirmation that was already applied. Acknowledged without side effects.
    AlreadyPaid(Order),
    /// The callback carried a trade status we do not act on.
    Ignored,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub merchant_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub platform_order_no: Option<OrderNo>,
    pub merchant_order_no: Option<String>,
    pub trade_no: Option<String>,
    pub pay_status: Option<Vec<PayStatus>>,
    pub notify_status: Option<NotifyStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_amount: Option<Money>,
    pub max_amount: Option<Money>,
    /// Page size. `None` returns every match.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderQueryFilter {
    pub fn with_merchant_id(mut self, merchant_id: i64) -> Self {
        self.merchant_id = Some(merchant_id);
        self
    }

    pub fn with_agent_id(mut self, agent_id: i64) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_platform_order_no(mut self, order_no: OrderNo) -> Self {
        self.platform_order_no = Some(order_no);
        self
    }

    pub fn with_merchant_order_no(mut self, merchant_order_no: String) -> Self {
        self.merchant_order_no = Some(merchant_order_no);
        self
    }

    pub fn with_trade_no(mut self, trade_no: String) -> Self {
        self.trade_no = Some(trade_no);
        self
    }

    pub fn with_pay_status(mut self, status: PayStatus) -> Self {
        self.pay_status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn with_notify_status(mut self, status: NotifyStatus) -> Self {
        self.notify_status = Some(status);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_min_amount(mut self, amount: Money) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn with_max_amount(mut self, amount: Money) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// True when no row criteria are set. Paging fields do not count, they only shape the result
    /// window.
    pub fn is_empty(&self) -> bool {
        self.merchant_id.is_none() &&
            self.agent_id.is_none() &&
            self.platform_order_no.is_none() &&
            self.merchant_order_no.is_none() &&
            self.trade_no.is_none() &&
            self.pay_status.is_none() &&
            self.notify_status.is_none() &&
            self.since.is_none() &&
            self.until.is_none() &&
            self.min_amount.is_none() &&
            self.max_amount.is_none()
    }
}

impl Display for OrderQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "No filters.")?;
            return Ok(());
        }
        if let Some(merchant_id) = &self.merchant_id {
            write!(f, "merchant_id: {merchant_id}. ")?;
        }
        if let Some(agent_id) = &self.agent_id {
            write!(f, "agent_id: {agent_id}. ")?;
        }
        if let Some(order_no) = &self.platform_order_no {
            write!(f, "platform_order_no: {order_no}. ")?;
        }
        if let Some(mon) = &self.merchant_order_no {
            write!(f, "merchant_order_no: {mon}. ")?;
        }
        if let Some(trade_no) = &self.trade_no {
            write!(f, "trade_no: {trade_no}. ")?;
        }
        if let Some(statuses) = &self.pay_status {
            let statuses = statuses.iter().map(|s| s.to_string()).collect::<Vec<String>>().join(",");
            write!(f, "pay_status: [{statuses}]. ")?;
        }
        if let Some(notify_status) = &self.notify_status {
            write!(f, "notify_status: {notify_status}. ")?;
        }
        if let Some(since) = &self.since {
            write!(f, "since {since}. ")?;
        }
        if let Some(until) = &self.until {
            write!(f, "until {until}. ")?;
        }
        if let Some(min) = &self.min_amount {
            write!(f, "amount >= {min}. ")?;
        }
        if let Some(max) = &self.max_amount {
            write!(f, "amount <= {max}. ")?;
        }
        if let Some(limit) = &self.limit {
            write!(f, "limit {limit}. ")?;
        }
        if let Some(offset) = &self.offset {
            write!(f, "offset {offset}. ")?;
        }
        Ok(())
    }
}
