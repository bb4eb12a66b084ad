use thiserror::Error;

use crate::{
    db_types::{NewOrder, NotifyStatus, Order, OrderNo, PaymentConfirmation},
    order_objects::OrderQueryFilter,
    traits::{MerchantApiError, MerchantManagement, RoyaltyManagement},
};

/// This trait defines the highest level of behaviour for backends supporting the payment engine.
///
/// It owns the order table. Every `pay_status` transition in the system goes through one of the
/// methods below, each of which runs as a single transaction that re-reads the row, applies the
/// transition table and writes the new state. Callers never mutate order state any other way.
#[allow(async_fn_in_trait)]
pub trait PaymentGatewayDatabase: Clone + MerchantManagement + RoyaltyManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores a new order in a single atomic transaction.
    ///
    /// The order lands in `Created` state. A colliding (merchant, merchant order no) pair returns
    /// [`PaymentGatewayError::DuplicateMerchantOrder`] and a colliding platform order number
    /// returns [`PaymentGatewayError::OrderNoCollision`], so the caller can distinguish a merchant
    /// replay from an exhausted number fence.
    async fn insert_order(&self, order: NewOrder) -> Result<Order, PaymentGatewayError>;

    /// Whether an order with this platform order number exists. Used as the durable fallback for
    /// the order-number fence when the fast store is down.
    async fn order_no_exists(&self, order_no: &OrderNo) -> Result<bool, PaymentGatewayError>;

    async fn fetch_order_by_order_no(&self, order_no: &OrderNo) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_order_by_merchant_order(
        &self,
        merchant_id: i64,
        merchant_order_no: &str,
    ) -> Result<Option<Order>, PaymentGatewayError>;

    async fn fetch_order_by_id(&self, id: i64) -> Result<Option<Order>, PaymentGatewayError>;

    /// Marks the first render of the cashier page: `Created` → `Opened`.
    ///
    /// An order that is already `Opened` returns [`PaymentGatewayError::OrderModificationNoOp`].
    /// Terminal states are rejected with [`PaymentGatewayError::OrderModificationForbidden`].
    async fn mark_order_opened(&self, order_no: &OrderNo) -> Result<Order, PaymentGatewayError>;

    /// Applies a verified provider confirmation: `Created`/`Opened`/`Closed` → `Paid`.
    ///
    /// `Closed` is deliberately allowed. A late provider confirmation beats a stale local close,
    /// because the money has actually moved.
    ///
    /// Returns the order and a flag indicating whether this call performed the transition. An
    /// order that is already `Paid` returns `(order, false)` so that redelivered webhooks are
    /// acknowledged without side effects. `Refunded` orders reject the confirmation with
    /// [`PaymentGatewayError::OrderModificationForbidden`].
    async fn mark_order_paid(&self, confirmation: &PaymentConfirmation) -> Result<(Order, bool), PaymentGatewayError>;

    /// Closes an order without payment: `Created`/`Opened` → `Closed`.
    ///
    /// Callers must have confirmed with the provider that no payment occurred before calling this.
    /// An order that is already `Closed` returns [`PaymentGatewayError::OrderModificationNoOp`].
    async fn close_order(&self, order_no: &OrderNo) -> Result<Order, PaymentGatewayError>;

    /// Operator-initiated refund marker: `Paid` → `Refunded`.
    async fn mark_order_refunded(&self, order_no: &OrderNo) -> Result<Order, PaymentGatewayError>;

    /// Records the outcome of one notification attempt: sets `notify_status`, increments
    /// `notify_times` and stamps `notified_at` on success.
    async fn update_notify_result(&self, order_id: i64, status: NotifyStatus) -> Result<Order, PaymentGatewayError>;

    /// Closes all `Created`/`Opened` orders whose expiry has passed. Returns the orders that were
    /// closed by this call.
    async fn expire_due_orders(&self) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Paid orders whose merchant has not acknowledged the notification yet, capped at
    /// `max_times` attempts. Fodder for the retry worker.
    async fn fetch_orders_for_notify_retry(
        &self,
        max_times: i64,
        limit: i64,
    ) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Dynamic order search for the operator API.
    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, PaymentGatewayError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), PaymentGatewayError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum PaymentGatewayError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("Cannot insert order, since merchant order no {0} already exists")]
    DuplicateMerchantOrder(String),
    #[error("Cannot insert order, since platform order number {0} is already taken")]
    OrderNoCollision(OrderNo),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderNo),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("The requested order change would result in a no-op.")]
    OrderModificationNoOp,
    #[error("The requested order change is forbidden. {0}")]
    OrderModificationForbidden(String),
    #[error("{0}")]
    MerchantError(#[from] MerchantApiError),
}

impl From<sqlx::Error> for PaymentGatewayError {
    fn from(e: sqlx::Error) -> Self {
        PaymentGatewayError::DatabaseError(e.to_string())
    }
}
