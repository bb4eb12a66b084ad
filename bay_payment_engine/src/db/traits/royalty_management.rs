use chrono::Duration;
use thiserror::Error;

use crate::{
    db_types::{NewOrderRoyalty, Order, OrderRoyalty, SettlementReceipt},
    traits::{FastStoreError, MerchantApiError, PaymentGatewayError},
};

/// Storage contract for the settlement rows.
///
/// There is at most one row per order, created lazily at the first settlement attempt. The
/// [`RoyaltyManagement::claim_royalty`] conditional update is the lease that serializes workers:
/// whoever flips the row to `Processing` owns the provider call.
#[allow(async_fn_in_trait)]
pub trait RoyaltyManagement: Clone {
    async fn fetch_royalty_for_order(&self, order_id: i64) -> Result<Option<OrderRoyalty>, RoyaltyApiError>;

    /// Inserts a fresh `Pending` row. A second insert for the same order returns
    /// [`RoyaltyApiError::RoyaltyAlreadyExists`].
    async fn insert_royalty(&self, royalty: NewOrderRoyalty) -> Result<OrderRoyalty, RoyaltyApiError>;

    /// The settlement lease. Atomically moves `Pending`/`Failed` (non-terminal) to `Processing`
    /// and bumps the attempt counter. Returns `None` when there is nothing to claim: no row,
    /// another worker holds the lease, the row is terminal, or it already succeeded.
    async fn claim_royalty(&self, order_id: i64) -> Result<Option<OrderRoyalty>, RoyaltyApiError>;

    /// Records a provider acceptance on the claimed row.
    async fn complete_royalty_success(
        &self,
        order_id: i64,
        receipt: &SettlementReceipt,
    ) -> Result<OrderRoyalty, RoyaltyApiError>;

    /// Records a failed attempt on the claimed row. `terminal` stops automatic retries.
    async fn complete_royalty_failure(
        &self,
        order_id: i64,
        error_message: &str,
        terminal: bool,
    ) -> Result<OrderRoyalty, RoyaltyApiError>;

    /// Deletes a `Failed` row so the operator retry path can start over. Returns whether a row
    /// was actually deleted.
    async fn delete_failed_royalty(&self, order_id: i64) -> Result<bool, RoyaltyApiError>;

    /// Rows stuck in `Processing` longer than `older_than` are flipped back to `Failed` so the
    /// backstop can reclaim them. This only happens when a worker died mid-settlement.
    async fn release_stale_royalties(&self, older_than: Duration) -> Result<Vec<OrderRoyalty>, RoyaltyApiError>;

    /// Paid orders at least `min_age` old that still lack a successful (or terminally failed)
    /// settlement. The backstop scanner feeds these back into the queue.
    async fn fetch_orders_needing_settlement(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<Order>, RoyaltyApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum RoyaltyApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("A settlement row already exists for order {0}")]
    RoyaltyAlreadyExists(i64),
    #[error("No settlement row exists for order {0}")]
    RoyaltyNotFound(i64),
    #[error("The settlement split is invalid. {0}")]
    InvalidSplit(String),
    #[error("Settlement for order {0} cannot be retried: {1}")]
    RetryNotAllowed(i64, String),
    #[error("The order (internal id {0}) does not exist")]
    OrderNotFound(i64),
    #[error("Fast store error: {0}")]
    StoreError(String),
    #[error("Queue message could not be parsed. {0}")]
    BadQueueMessage(String),
}

impl From<sqlx::Error> for RoyaltyApiError {
    fn from(e: sqlx::Error) -> Self {
        RoyaltyApiError::DatabaseError(e.to_string())
    }
}

impl From<FastStoreError> for RoyaltyApiError {
    fn from(e: FastStoreError) -> Self {
        RoyaltyApiError::StoreError(e.to_string())
    }
}

impl From<MerchantApiError> for RoyaltyApiError {
    fn from(e: MerchantApiError) -> Self {
        match e {
            MerchantApiError::DatabaseError(e) => RoyaltyApiError::DatabaseError(e),
            MerchantApiError::SubjectNotFound(id) => RoyaltyApiError::InvalidSplit(format!("subject {id} not found")),
        }
    }
}

impl From<PaymentGatewayError> for RoyaltyApiError {
    fn from(e: PaymentGatewayError) -> Self {
        match e {
            PaymentGatewayError::OrderIdNotFound(id) => RoyaltyApiError::OrderNotFound(id),
            e => RoyaltyApiError::DatabaseError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for RoyaltyApiError {
    fn from(e: serde_json::Error) -> Self {
        RoyaltyApiError::BadQueueMessage(e.to_string())
    }
}
