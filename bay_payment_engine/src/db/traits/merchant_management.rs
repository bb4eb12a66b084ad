use bpg_common::Money;
use thiserror::Error;

use crate::db_types::{Merchant, Product, Subject};

/// Lookup methods for the merchant, product and subject tables.
///
/// These are read-mostly. The single mutation, [`MerchantManagement::disable_subject`], exists for
/// the settlement path: some provider rejections mean the subject account can never settle again,
/// and routing further orders through it would only create more stuck money.
#[allow(async_fn_in_trait)]
pub trait MerchantManagement: Clone {
    async fn fetch_merchant_by_api_key(&self, api_key: &str) -> Result<Option<Merchant>, MerchantApiError>;

    async fn fetch_merchant(&self, merchant_id: i64) -> Result<Option<Merchant>, MerchantApiError>;

    /// Resolves a product by (agent, code), enabled products only.
    async fn fetch_enabled_product(&self, agent_id: i64, code: &str) -> Result<Option<Product>, MerchantApiError>;

    async fn fetch_subject(&self, subject_id: i64) -> Result<Option<Subject>, MerchantApiError>;

    /// Picks a random enabled subject for the agent whose amount limits admit `amount`.
    async fn pick_subject_for_payment(&self, agent_id: i64, amount: Money)
        -> Result<Option<Subject>, MerchantApiError>;

    async fn disable_subject(&self, subject_id: i64) -> Result<(), MerchantApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum MerchantApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("The requested subject {0} does not exist")]
    SubjectNotFound(i64),
}

impl From<sqlx::Error> for MerchantApiError {
    fn from(e: sqlx::Error) -> Self {
        MerchantApiError::DatabaseError(e.to_string())
    }
}
