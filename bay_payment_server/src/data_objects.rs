use std::{fmt::Display, str::FromStr};

use bay_payment_engine::{
    db_types::{Order, OrderRoyalty, PayStatus},
    order_objects::OrderQueryFilter,
};
use bpg_common::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

/// The envelope every merchant-facing JSON response travels in. `code` is `0` for success and `1`
/// for failure, matching what merchant SDKs in this ecosystem expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self::success_with("success", data)
    }

    pub fn success_with<S: Display, T: Serialize>(message: S, data: T) -> Self {
        let data = serde_json::to_value(data).ok();
        Self { code: 0, message: message.to_string(), data }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { code: 1, message: message.to_string(), data: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedResult {
    pub platform_order_no: String,
    pub merchant_order_no: String,
    pub amount: String,
    pub payment_method: String,
    pub payment_url: String,
    pub expire_time: DateTime<Utc>,
}

impl OrderCreatedResult {
    pub fn new(order: &Order, public_url: &str) -> Self {
        Self {
            platform_order_no: order.platform_order_no.to_string(),
            merchant_order_no: order.merchant_order_no.clone(),
            amount: order.amount.to_string(),
            payment_method: order.payment_method.clone(),
            payment_url: format!("{public_url}/pay/{}", order.platform_order_no),
            expire_time: order.expires_at,
        }
    }
}

/// The merchant's view of an order. Status travels as the numeric code merchants key their
/// reconciliation off, alongside the human-readable name. The internal `id` is what the admin
/// endpoints take as an order reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusResult {
    pub id: i64,
    pub platform_order_no: String,
    pub merchant_order_no: String,
    pub amount: String,
    pub payment_method: String,
    pub pay_status: i64,
    pub pay_status_name: String,
    pub trade_no: Option<String>,
    pub notify_status: String,
    pub notify_times: i64,
    pub created_at: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderStatusResult {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            platform_order_no: order.platform_order_no.to_string(),
            merchant_order_no: order.merchant_order_no.clone(),
            amount: order.amount.to_string(),
            payment_method: order.payment_method.clone(),
            pay_status: order.pay_status.as_code(),
            pay_status_name: order.pay_status.to_string(),
            trade_no: order.trade_no.clone(),
            notify_status: order.notify_status.to_string(),
            notify_times: order.notify_times,
            created_at: order.created_at,
            expire_time: order.expires_at,
            paid_at: order.paid_at,
        }
    }
}

/// What the cashier page renders. `payable` tells the page whether to draw a payment form or a
/// final-state banner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaySummary {
    pub platform_order_no: String,
    pub amount: String,
    pub payment_method: String,
    pub pay_status: i64,
    pub pay_status_name: String,
    pub payable: bool,
    pub expire_time: DateTime<Utc>,
}

impl PaySummary {
    pub fn new(order: &Order, payable: bool) -> Self {
        Self {
            platform_order_no: order.platform_order_no.to_string(),
            amount: order.amount.to_string(),
            payment_method: order.payment_method.clone(),
            pay_status: order.pay_status.as_code(),
            pay_status_name: order.pay_status.to_string(),
            payable,
            expire_time: order.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRef {
    pub order_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantRef {
    pub merchant_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoyaltyStatusResult {
    pub order_id: i64,
    pub royalty_status: String,
    pub royalty_type: String,
    pub royalty_amount: String,
    pub subject_amount: String,
    pub attempts: i64,
    pub terminal: bool,
    pub provider_settle_no: Option<String>,
    pub error_message: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<&OrderRoyalty> for RoyaltyStatusResult {
    fn from(row: &OrderRoyalty) -> Self {
        Self {
            order_id: row.order_id,
            royalty_status: row.royalty_status.to_string(),
            royalty_type: row.royalty_type.to_string(),
            royalty_amount: row.royalty_amount.to_string(),
            subject_amount: row.subject_amount.to_string(),
            attempts: row.attempts,
            terminal: row.terminal,
            provider_settle_no: row.provider_settle_no.clone(),
            error_message: row.error_message.clone(),
            settled_at: row.settled_at,
        }
    }
}

/// Body of the operator refund marker, naming the order to refund.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub platform_order_no: String,
}

/// Every search returns at most one page; an operator who wants more pages asks for them.
pub const DEFAULT_SEARCH_LIMIT: i64 = 100;
pub const MAX_SEARCH_LIMIT: i64 = 1000;

/// Query-string shape of the operator order search.
///
/// `pay_status` arrives as a comma-separated list because query strings have no standard encoding
/// for repeated keys that urlencoded deserializers agree on. Amount bounds use the same decimal
/// notation as the merchant API, e.g. `min_amount=0.50`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderSearchQuery {
    pub merchant_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub platform_order_no: Option<String>,
    pub merchant_order_no: Option<String>,
    pub trade_no: Option<String>,
    pub pay_status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl OrderSearchQuery {
    pub fn into_filter(self) -> Result<OrderQueryFilter, ServerError> {
        let pay_status = match self.pay_status {
            Some(csv) => {
                let statuses = csv
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PayStatus::from_str)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ServerError::ValidationError(e.to_string()))?;
                if statuses.is_empty() {
                    None
                } else {
                    Some(statuses)
                }
            },
            None => None,
        };
        let min_amount = self.min_amount.as_deref().map(parse_amount_bound).transpose()?;
        let max_amount = self.max_amount.as_deref().map(parse_amount_bound).transpose()?;
        let limit = match self.limit {
            Some(l) if l <= 0 => return Err(ServerError::ValidationError("limit must be positive".to_string())),
            Some(l) => l.min(MAX_SEARCH_LIMIT),
            None => DEFAULT_SEARCH_LIMIT,
        };
        let offset = match self.offset {
            Some(o) if o < 0 => return Err(ServerError::ValidationError("offset cannot be negative".to_string())),
            other => other.unwrap_or(0),
        };
        Ok(OrderQueryFilter {
            merchant_id: self.merchant_id,
            agent_id: self.agent_id,
            platform_order_no: self.platform_order_no.map(Into::into),
            merchant_order_no: self.merchant_order_no,
            trade_no: self.trade_no,
            pay_status,
            notify_status: None,
            since: self.since,
            until: self.until,
            min_amount,
            max_amount,
            limit: Some(limit),
            offset: Some(offset),
        })
    }
}

fn parse_amount_bound(s: &str) -> Result<Money, ServerError> {
    s.parse::<Money>().map_err(|e| ServerError::ValidationError(e.to_string()))
}
