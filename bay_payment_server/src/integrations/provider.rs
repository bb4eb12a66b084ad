use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bay_payment_engine::{
    db_types::{OrderNo, SettlementReceipt, SettlementRequest},
    traits::{PaymentProvider, ProviderError, ProviderOrderStatus},
};
use bpg_common::{signature::EXCLUDED_FIELDS, Money, Secret};
use chrono::{NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use log::{debug, trace, warn};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;

use crate::{config::ProviderConfig, errors::ServerError};

type HmacSha256 = Hmac<Sha256>;

/// Trade states the provider reports for an order.
const TRADE_PAID: [&str; 2] = ["TRADE_SUCCESS", "TRADE_FINISHED"];
const TRADE_PENDING: &str = "WAIT_BUYER_PAY";
const TRADE_CLOSED: &str = "TRADE_CLOSED";

/// The provider's code for "everything went through".
const CODE_OK: &str = "10000";
/// The provider's sub-code for an order it has never seen.
const TRADE_NOT_EXIST: &str = "ACQ.TRADE_NOT_EXIST";

/// The upstream gateway client. All calls are POSTed forms carrying `partner_id` and an
/// HMAC-SHA256 `sign` over the sorted parameters; answers are flat JSON in the provider's
/// `code`/`sub_code` convention.
///
/// Callback verification uses the same MAC in reverse, so a callback only verifies when it was
/// signed with this partner's secret.
#[derive(Clone)]
pub struct ProviderClient {
    config: ProviderConfig,
    client: Arc<Client>,
}

/// The provider's answer envelope. Fields beyond the error block only arrive on specific calls.
#[derive(Debug, Clone, Deserialize)]
struct GatewayAnswer {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    sub_code: String,
    #[serde(default)]
    sub_msg: String,
    #[serde(default)]
    trade_status: Option<String>,
    #[serde(default)]
    trade_no: Option<String>,
    #[serde(default)]
    total_amount: Option<String>,
    #[serde(default)]
    gmt_payment: Option<String>,
    #[serde(default)]
    buyer_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    settle_no: Option<String>,
}

impl GatewayAnswer {
    fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }

    fn rejection(&self) -> ProviderError {
        let code = if self.sub_code.is_empty() { self.code.clone() } else { self.sub_code.clone() };
        let message = if self.sub_msg.is_empty() { self.msg.clone() } else { self.sub_msg.clone() };
        ProviderError::Terminal { code, message }
    }
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ServerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent("Bay-Payment-Gateway/1.0")
            .build()
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    fn secret(&self) -> &Secret<String> {
        &self.config.secret
    }

    /// Sorted `key=value&` pairs with empty values and excluded fields dropped. The provider
    /// channel MACs this string instead of appending the secret to it.
    fn mac_payload(params: &[(String, String)]) -> String {
        let sorted: BTreeMap<&str, &str> = params
            .iter()
            .filter(|(k, v)| !EXCLUDED_FIELDS.contains(&k.as_str()) && !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut result = String::new();
        for (k, v) in sorted {
            result.push_str(k);
            result.push('=');
            result.push_str(v);
            result.push('&');
        }
        result.pop();
        result
    }

    fn mac_hex(&self, payload: &str) -> Result<String, ProviderError> {
        let mut mac = HmacSha256::new_from_slice(self.secret().reveal().as_bytes())
            .map_err(|e| ProviderError::Transient(format!("MAC key rejected: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode_upper(mac.finalize().into_bytes()))
    }

    /// Signs and POSTs one call, classifying transport and decode trouble as `Transient`.
    /// Returns the decoded answer alongside the verbatim body for audit trails.
    async fn call(&self, path: &str, mut form: Vec<(String, String)>) -> Result<(GatewayAnswer, String), ProviderError> {
        form.push(("partner_id".to_string(), self.config.partner_id.clone()));
        let sign = self.mac_hex(&Self::mac_payload(&form))?;
        form.push(("sign".to_string(), sign));
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        trace!("🛍️️ Calling provider {url}");
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("{url}: {e}")))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Transient(format!("{url} answered HTTP {status}")));
        }
        let body = response.text().await.map_err(|e| ProviderError::Transient(format!("{url}: {e}")))?;
        let answer = serde_json::from_str::<GatewayAnswer>(&body)
            .map_err(|e| ProviderError::Transient(format!("{url}: unreadable answer: {e}")))?;
        Ok((answer, body))
    }
}

impl PaymentProvider for ProviderClient {
    fn verify_callback(&self, params: &HashMap<String, String>) -> bool {
        let given = match params.get(bpg_common::signature::SIGN_FIELD) {
            Some(s) if !s.is_empty() => s,
            _ => return false,
        };
        let Ok(given) = hex::decode(given) else {
            return false;
        };
        let pairs: Vec<(String, String)> = params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let payload = Self::mac_payload(&pairs);
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret().reveal().as_bytes()) else {
            return false;
        };
        mac.update(payload.as_bytes());
        mac.verify_slice(&given).is_ok()
    }

    async fn query_order(&self, order_no: &OrderNo) -> Result<ProviderOrderStatus, ProviderError> {
        let form = vec![("out_trade_no".to_string(), order_no.to_string())];
        let (answer, _) = self.call("/gateway/trade/query", form).await?;
        if !answer.is_ok() {
            if answer.sub_code == TRADE_NOT_EXIST {
                debug!("🛍️️ Provider has never seen order {order_no}");
                return Ok(ProviderOrderStatus::NotFound);
            }
            warn!("🛍️️ Provider rejected the query for {order_no}: {} / {}", answer.sub_code, answer.sub_msg);
            return Err(answer.rejection());
        }
        let trade_status = answer.trade_status.as_deref().unwrap_or_default();
        if TRADE_PAID.contains(&trade_status) {
            let trade_no = answer
                .trade_no
                .clone()
                .ok_or_else(|| ProviderError::Transient(format!("paid answer for {order_no} carried no trade_no")))?;
            let amount = answer
                .total_amount
                .as_deref()
                .and_then(|a| a.parse::<Money>().ok())
                .ok_or_else(|| ProviderError::Transient(format!("unreadable total_amount for {order_no}")))?;
            let paid_at = answer
                .gmt_payment
                .as_deref()
                .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
                .map(|t| Utc.from_utc_datetime(&t))
                .unwrap_or_else(Utc::now);
            return Ok(ProviderOrderStatus::Paid { trade_no, amount, paid_at, buyer_id: answer.buyer_id });
        }
        match trade_status {
            TRADE_PENDING => Ok(ProviderOrderStatus::Pending),
            TRADE_CLOSED => Ok(ProviderOrderStatus::Closed),
            other => Err(ProviderError::Transient(format!("unexpected trade status '{other}' for {order_no}"))),
        }
    }

    async fn settle_royalty(&self, request: &SettlementRequest) -> Result<SettlementReceipt, ProviderError> {
        let payee_type = payee_identity_type(&request.payee_account, request.payee_user_id.as_deref());
        let identity = match payee_type {
            "ALIPAY_USER_ID" => {
                request.payee_user_id.clone().unwrap_or_else(|| request.payee_account.clone())
            },
            _ => request.payee_account.clone(),
        };
        let form = vec![
            // One settlement attempt per order may ever move money, so the transfer reference is
            // derived from the order and nothing else. Provider-side dedup then backstops ours.
            ("out_biz_no".to_string(), format!("{}-ROY", request.platform_order_no)),
            ("out_trade_no".to_string(), request.platform_order_no.to_string()),
            ("trade_no".to_string(), request.trade_no.clone()),
            ("settle_amount".to_string(), request.royalty_amount.to_string()),
            ("payee_identity".to_string(), identity),
            ("payee_identity_type".to_string(), payee_type.to_string()),
            ("payee_name".to_string(), request.payee_name.clone()),
            ("remark".to_string(), format!("Royalty for order {}", request.platform_order_no)),
        ];
        let (answer, raw_result) = self.call("/gateway/fund/transfer", form).await?;
        if !answer.is_ok() {
            warn!(
                "👛️ Provider rejected the settlement for order {}: {} / {}",
                request.platform_order_no, answer.sub_code, answer.sub_msg
            );
            return Err(answer.rejection());
        }
        match answer.status.as_deref() {
            Some("SUCCESS") => {
                let settle_no = answer.settle_no.clone().unwrap_or_default();
                debug!("👛️ Settlement for order {} accepted as {settle_no}", request.platform_order_no);
                Ok(SettlementReceipt { settle_no, raw_result })
            },
            Some("DEALING") => {
                Err(ProviderError::Transient(format!("settlement for {} still processing", request.platform_order_no)))
            },
            other => Err(ProviderError::Terminal {
                code: format!("SETTLE_{}", other.unwrap_or("NO_STATUS")),
                message: format!("provider answered OK but settlement state is {other:?}"),
            }),
        }
    }
}

/// User-id style payee accounts (the provider's 2088-prefixed 16-digit ids) settle by id,
/// everything else by logon name.
fn payee_identity_type(payee_account: &str, payee_user_id: Option<&str>) -> &'static str {
    if payee_user_id.is_some_and(|id| !id.is_empty()) {
        return "ALIPAY_USER_ID";
    }
    let re = Regex::new(r"^2088\d{12}$");
    match re {
        Ok(re) if re.is_match(payee_account) => "ALIPAY_USER_ID",
        _ => "ALIPAY_LOGON_ID",
    }
}
