use std::collections::HashMap;

use bpg_common::Money;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{OrderNo, SettlementReceipt, SettlementRequest};

/// Provider error codes that mean the subject account can never settle again. Further orders
/// routed through such a subject would only pile up stuck royalties, so the settlement path
/// disables the subject when it sees one of these.
pub const SUBJECT_DISABLE_ERROR_CODES: [&str; 19] = [
    // Account restrictions
    "BLOCK_USER_FORBBIDEN_RECIEVE",
    "BLOCK_USER_FORBBIDEN_SEND",
    "NO_ACCOUNT_USER_FORBBIDEN_RECIEVE",
    "ACQ.USER_ACCOUNT_HAD_FREEZEN",
    "USER_RISK_FREEZE",
    "JUDICIAL_FREEZE",
    // Amount limits
    "EXCEED_LIMIT_DM_AMOUNT",
    "EXCEED_LIMIT_DM_MAX_AMOUNT",
    "EXCEED_LIMIT_MM_AMOUNT",
    "EXCEED_LIMIT_MM_MAX_AMOUNT",
    "PERM_PAY_CUSTOMER_DAILY_QUOTA_ORG_BALANCE_LIMIT",
    // Payment instrument
    "MONEY_PAY_CLOSED",
    "NO_AVAILABLE_PAYMENT_TOOLS",
    "PAYCARD_UNABLE_PAYMENT",
    // Permissions
    "PERMIT_CHECK_PERM_IDENTITY_THEFT",
    "PERMIT_CHECK_PERM_LIMITED",
    "PERMIT_NON_BANK_LIMIT_PAYEE",
    // Account state
    "PAYER_STATUS_ERROR",
    "SECURITY_CHECK_FAILED",
];

/// The upstream payment network, as far as the engine is concerned.
///
/// The production implementation is a thin signed HTTP client in the server crate; tests use a
/// scripted fake. Wire details (certificates, field layouts) never leak past this trait.
#[allow(async_fn_in_trait)]
pub trait PaymentProvider: Clone {
    /// Verifies the authenticity of a raw provider callback. No network round trip.
    fn verify_callback(&self, params: &HashMap<String, String>) -> bool;

    /// Asks the provider what it thinks the state of an order is. Used by the reconcile-then-close
    /// path, so an error here must abort the close rather than default to "unpaid".
    async fn query_order(&self, order_no: &OrderNo) -> Result<ProviderOrderStatus, ProviderError>;

    /// Executes a royalty transfer to the payee.
    async fn settle_royalty(&self, request: &SettlementRequest) -> Result<SettlementReceipt, ProviderError>;
}

#[derive(Debug, Clone)]
pub enum ProviderOrderStatus {
    Paid { trade_no: String, amount: Money, paid_at: DateTime<Utc>, buyer_id: Option<String> },
    Pending,
    Closed,
    NotFound,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network trouble, timeouts, 5xx answers. Worth retrying.
    #[error("Provider call failed: {0}")]
    Transient(String),
    /// The provider understood the request and said no. Retrying the same request will fail the
    /// same way.
    #[error("Provider rejected the request with code {code}: {message}")]
    Terminal { code: String, message: String },
}

impl ProviderError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderError::Terminal { .. })
    }

    /// The offending error code, when this rejection is one that disables the subject.
    ///
    /// Matches on the exact code first, then falls back to scanning the message, since some
    /// provider gateways tunnel the real code inside a wrapper message.
    pub fn disabling_code(&self) -> Option<&'static str> {
        let ProviderError::Terminal { code, message } = self else {
            return None;
        };
        let msg = message.to_uppercase();
        SUBJECT_DISABLE_ERROR_CODES.iter().find(|c| code == *c || msg.contains(&c.to_uppercase())).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_errors_never_disable() {
        let err = ProviderError::Transient("connection reset".into());
        assert!(err.disabling_code().is_none());
        assert!(!err.is_terminal());
    }

    #[test]
    fn disabling_code_matches_exact_code() {
        let err = ProviderError::Terminal { code: "JUDICIAL_FREEZE".into(), message: "frozen".into() };
        assert_eq!(err.disabling_code(), Some("JUDICIAL_FREEZE"));
    }

    #[test]
    fn disabling_code_scans_the_message() {
        let err = ProviderError::Terminal {
            code: "ACQ.SYSTEM_ERROR".into(),
            message: "sub error [paycard_unable_payment] from upstream".into(),
        };
        assert_eq!(err.disabling_code(), Some("PAYCARD_UNABLE_PAYMENT"));
    }

    #[test]
    fn ordinary_rejections_do_not_disable() {
        let err = ProviderError::Terminal { code: "INVALID_PARAMETER".into(), message: "bad request".into() };
        assert!(err.disabling_code().is_none());
        assert!(err.is_terminal());
    }
}
