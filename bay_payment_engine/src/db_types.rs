use std::{fmt::Display, str::FromStr};

use bpg_common::{signature::SignAlgo, Money};
use chrono::{DateTime, Duration, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

//--------------------------------------        OrderNo        -------------------------------------------------------

/// A lightweight wrapper around the platform order number, e.g. `BY72024060112000012AB34CD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
pub struct OrderNo(pub String);

impl FromStr for OrderNo {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderNo {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderNo {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OrderNo {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------       PayStatus       -------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum PayStatus {
    /// The order has been created, but the cashier page has not been opened yet.
    #[default]
    Created,
    /// The cashier page has been rendered at least once.
    Opened,
    /// The provider has confirmed payment. Final for the forward payment flow.
    Paid,
    /// The order was closed without payment (expiry, merchant close). Terminal, except for a late
    /// provider confirmation, which still wins.
    Closed,
    /// The money has been returned to the buyer. Terminal, full stop.
    Refunded,
}

impl PayStatus {
    /// The numeric code used on the merchant-facing wire. These values are load-bearing for
    /// merchant integrations and must never be renumbered.
    pub fn as_code(&self) -> i64 {
        match self {
            PayStatus::Created => 0,
            PayStatus::Paid => 1,
            PayStatus::Closed => 2,
            PayStatus::Refunded => 3,
            PayStatus::Opened => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayStatus::Paid | PayStatus::Closed | PayStatus::Refunded)
    }
}

impl Display for PayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayStatus::Created => write!(f, "Created"),
            PayStatus::Opened => write!(f, "Opened"),
            PayStatus::Paid => write!(f, "Paid"),
            PayStatus::Closed => write!(f, "Closed"),
            PayStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for PayStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(Self::Created),
            "Opened" => Ok(Self::Opened),
            "Paid" => Ok(Self::Paid),
            "Closed" => Ok(Self::Closed),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid pay status: {s}"))),
        }
    }
}

impl From<String> for PayStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid pay status: {value}. But this conversion cannot fail. Defaulting to Created");
            PayStatus::Created
        })
    }
}

//--------------------------------------      NotifyStatus     -------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum NotifyStatus {
    /// No delivery attempt has been made yet.
    #[default]
    Pending,
    /// The merchant acknowledged the notification with a `SUCCESS` body.
    Success,
    /// The last delivery attempt failed. The retry worker may try again.
    Failed,
}

impl Display for NotifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyStatus::Pending => write!(f, "Pending"),
            NotifyStatus::Success => write!(f, "Success"),
            NotifyStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for NotifyStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Success" => Ok(Self::Success),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid notify status: {s}"))),
        }
    }
}

impl From<String> for NotifyStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid notify status: {value}. But this conversion cannot fail. Defaulting to Pending");
            NotifyStatus::Pending
        })
    }
}

//--------------------------------------     RoyaltyStatus     -------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum RoyaltyStatus {
    /// The settlement row exists, but no attempt has been claimed yet.
    #[default]
    Pending,
    /// A worker holds the lease on this row and is talking to the provider.
    Processing,
    /// The provider accepted the transfer.
    Success,
    /// The last attempt failed. Check the `terminal` flag to see whether automatic retries
    /// are still allowed.
    Failed,
}

impl Display for RoyaltyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoyaltyStatus::Pending => write!(f, "Pending"),
            RoyaltyStatus::Processing => write!(f, "Processing"),
            RoyaltyStatus::Success => write!(f, "Success"),
            RoyaltyStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for RoyaltyStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Processing" => Ok(Self::Processing),
            "Success" => Ok(Self::Success),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid royalty status: {s}"))),
        }
    }
}

impl From<String> for RoyaltyStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid royalty status: {value}. But this conversion cannot fail. Defaulting to Pending");
            RoyaltyStatus::Pending
        })
    }
}

//--------------------------------------      RoyaltyType      -------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Type)]
pub enum RoyaltyType {
    /// The subject keeps everything. No settlement row is ever created.
    #[default]
    None,
    /// A single payee receives `royalty_rate` basis points of the order amount.
    Single,
    /// The merchant split: the payee receives the fixed merchant share of the order amount.
    Merchant,
}

impl Display for RoyaltyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoyaltyType::None => write!(f, "None"),
            RoyaltyType::Single => write!(f, "Single"),
            RoyaltyType::Merchant => write!(f, "Merchant"),
        }
    }
}

impl FromStr for RoyaltyType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "single" => Ok(Self::Single),
            "merchant" => Ok(Self::Merchant),
            s => Err(ConversionError(format!("Invalid royalty type: {s}"))),
        }
    }
}

impl From<String> for RoyaltyType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid royalty type: {value}. But this conversion cannot fail. Defaulting to None");
            RoyaltyType::None
        })
    }
}

//--------------------------------------        Order          -------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub platform_order_no: OrderNo,
    pub merchant_order_no: String,
    /// Correlation id carried through every log line this order touches.
    pub trace_id: String,
    pub agent_id: i64,
    pub merchant_id: i64,
    pub product_id: i64,
    pub subject_id: i64,
    pub amount: Money,
    pub payment_method: String,
    pub pay_status: PayStatus,
    pub notify_status: NotifyStatus,
    pub notify_times: i64,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    /// The provider's transaction reference, set when the order is paid.
    pub trade_no: Option<String>,
    pub buyer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Order {} ({}) for merchant {}: {} [{}]",
            self.platform_order_no, self.merchant_order_no, self.merchant_id, self.amount, self.pay_status
        )
    }
}

//--------------------------------------       NewOrder        -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub platform_order_no: OrderNo,
    pub merchant_order_no: String,
    pub trace_id: String,
    pub agent_id: i64,
    pub merchant_id: i64,
    pub product_id: i64,
    pub subject_id: i64,
    pub amount: Money,
    pub payment_method: String,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    pub client_ip: Option<String>,
    /// The moment after which the cashier page may no longer be opened.
    pub expires_at: DateTime<Utc>,
}

//--------------------------------------       Merchant        -------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Merchant {
    pub id: i64,
    pub agent_id: i64,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub sign_algo: String,
    pub status: i64,
    pub notify_url: Option<String>,
    pub return_url: Option<String>,
    /// Comma-separated list of allowed caller IPs. Empty or NULL means any.
    pub ip_whitelist: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    pub fn is_enabled(&self) -> bool {
        self.status == 1
    }

    pub fn signature_algo(&self) -> SignAlgo {
        self.sign_algo.parse().unwrap_or_else(|_| {
            error!("Merchant {} has an unknown sign_algo '{}'. Using md5.", self.id, self.sign_algo);
            SignAlgo::default()
        })
    }

    pub fn allows_ip(&self, ip: &str) -> bool {
        match self.ip_whitelist.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(list) => list.split(',').any(|entry| entry.trim() == ip),
        }
    }
}

//--------------------------------------        Subject        -------------------------------------------------------
/// A provider-side merchant account that orders are routed through.
#[derive(Debug, Clone, FromRow)]
pub struct Subject {
    pub id: i64,
    pub agent_id: i64,
    pub name: String,
    pub provider_account: String,
    pub status: i64,
    /// Smallest order amount this subject accepts. Zero means unbounded.
    pub amount_min: Money,
    /// Largest order amount this subject accepts. Zero means unbounded.
    pub amount_max: Money,
    pub royalty_type: RoyaltyType,
    /// Royalty share in basis points. Only meaningful for `RoyaltyType::Single`.
    pub royalty_rate: i64,
    pub payee_account: Option<String>,
    pub payee_name: Option<String>,
    pub payee_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    pub fn is_enabled(&self) -> bool {
        self.status == 1
    }

    pub fn accepts_amount(&self, amount: Money) -> bool {
        let above_min = self.amount_min.value() == 0 || amount >= self.amount_min;
        let below_max = self.amount_max.value() == 0 || amount <= self.amount_max;
        above_min && below_max
    }
}

//--------------------------------------        Product        -------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub agent_id: i64,
    pub code: String,
    pub name: String,
    pub payment_method: String,
    pub status: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_enabled(&self) -> bool {
        self.status == 1
    }
}

//--------------------------------------     OrderRoyalty      -------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderRoyalty {
    pub id: i64,
    pub order_id: i64,
    pub royalty_status: RoyaltyStatus,
    pub royalty_type: RoyaltyType,
    pub royalty_rate: i64,
    pub royalty_amount: Money,
    pub subject_amount: Money,
    pub payee_account: Option<String>,
    pub payee_name: Option<String>,
    pub payee_user_id: Option<String>,
    pub attempts: i64,
    /// When set, automatic retries stop and an operator has to intervene.
    pub terminal: bool,
    pub provider_settle_no: Option<String>,
    pub provider_result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

//--------------------------------------    NewOrderRoyalty    -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrderRoyalty {
    pub order_id: i64,
    pub royalty_type: RoyaltyType,
    pub royalty_rate: i64,
    pub royalty_amount: Money,
    pub subject_amount: Money,
    pub payee_account: Option<String>,
    pub payee_name: Option<String>,
    pub payee_user_id: Option<String>,
}

//--------------------------------------    RoyaltyMessage     -------------------------------------------------------
/// The unit of work on the settlement queue. Serialized as JSON onto the fast-store list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoyaltyMessage {
    pub order_id: i64,
    pub operator_ip: Option<String>,
    pub operator_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// How many times this message has been popped and requeued.
    #[serde(default)]
    pub attempts: u32,
    /// Messages popped before this instant are pushed back unprocessed.
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

impl RoyaltyMessage {
    pub fn new(order_id: i64) -> Self {
        Self { order_id, operator_ip: None, operator_agent: None, timestamp: Utc::now(), attempts: 0, not_before: None }
    }

    pub fn with_operator(order_id: i64, ip: Option<String>, agent: Option<String>) -> Self {
        Self { operator_ip: ip, operator_agent: agent, ..Self::new(order_id) }
    }

    /// A copy of this message, delayed by `delay` and with the attempt counter bumped.
    pub fn requeued(&self, delay: Duration) -> Self {
        let mut msg = self.clone();
        msg.attempts += 1;
        msg.not_before = Some(Utc::now() + delay);
        msg
    }

    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map(|t| t > now).unwrap_or(false)
    }
}

//-------------------------------------- PaymentConfirmation   -------------------------------------------------------
/// What a verified provider callback boils down to.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub platform_order_no: OrderNo,
    pub trade_no: String,
    pub amount: Money,
    pub paid_at: DateTime<Utc>,
    pub buyer_id: Option<String>,
}

//-------------------------------------- SettlementRequest     -------------------------------------------------------
/// Everything the provider needs to move the royalty share to the payee.
#[derive(Debug, Clone)]
pub struct SettlementRequest {
    pub order_id: i64,
    pub platform_order_no: OrderNo,
    pub trade_no: String,
    pub subject_id: i64,
    pub royalty_amount: Money,
    pub payee_account: String,
    pub payee_name: String,
    pub payee_user_id: Option<String>,
}

/// The provider's answer to a successful settlement call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub settle_no: String,
    /// The raw provider response, kept verbatim for audit.
    pub raw_result: String,
}
