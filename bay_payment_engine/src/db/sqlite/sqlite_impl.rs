//! `SqliteDatabase` is a concrete implementation of a Bay payment engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module. Each mutating method is a single transaction; the low-level SQL lives in [`super::db`].
use std::fmt::Debug;

use bpg_common::Money;
use chrono::Duration;
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, merchants, new_pool, orders, royalties};
use crate::{
    db_types::{
        Merchant,
        NewOrder,
        NewOrderRoyalty,
        NotifyStatus,
        Order,
        OrderNo,
        OrderRoyalty,
        PaymentConfirmation,
        Product,
        SettlementReceipt,
        Subject,
    },
    order_objects::OrderQueryFilter,
    traits::{
        MerchantApiError,
        MerchantManagement,
        PaymentGatewayDatabase,
        PaymentGatewayError,
        RoyaltyApiError,
        RoyaltyManagement,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database pool using the URL from the `BPG_DATABASE_URL` environment variable.
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PaymentGatewayDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{}] inserted with id {}", order.platform_order_no, order.id);
        Ok(order)
    }

    async fn order_no_exists(&self, order_no: &OrderNo) -> Result<bool, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::order_no_exists(order_no, &mut conn).await
    }

    async fn fetch_order_by_order_no(&self, order_no: &OrderNo) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_no(order_no, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_merchant_order(
        &self,
        merchant_id: i64,
        merchant_order_no: &str,
    ) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_merchant_order(merchant_id, merchant_order_no, &mut conn).await?;
        Ok(order)
    }

    async fn fetch_order_by_id(&self, id: i64) -> Result<Option<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_id(id, &mut conn).await?;
        Ok(order)
    }

    async fn mark_order_opened(&self, order_no: &OrderNo) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::mark_opened(order_no, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{order_no}] is now Opened");
        Ok(order)
    }

    async fn mark_order_paid(&self, confirmation: &PaymentConfirmation) -> Result<(Order, bool), PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let (order, newly_paid) = orders::mark_paid(confirmation, &mut tx).await?;
        tx.commit().await?;
        if newly_paid {
            debug!("🗃️ Order [{}] is now Paid (trade {})", order.platform_order_no, confirmation.trade_no);
        }
        Ok((order, newly_paid))
    }

    async fn close_order(&self, order_no: &OrderNo) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::close(order_no, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{order_no}] is now Closed");
        Ok(order)
    }

    async fn mark_order_refunded(&self, order_no: &OrderNo) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::mark_refunded(order_no, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{order_no}] is now Refunded");
        Ok(order)
    }

    async fn update_notify_result(&self, order_id: i64, status: NotifyStatus) -> Result<Order, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::update_notify_result(order_id, status, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn expire_due_orders(&self) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut tx = self.pool.begin().await?;
        let orders = orders::expire_due(&mut tx).await?;
        tx.commit().await?;
        Ok(orders)
    }

    async fn fetch_orders_for_notify_retry(
        &self,
        max_times: i64,
        limit: i64,
    ) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_for_notify_retry(max_times, limit, &mut conn).await
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, PaymentGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::search_orders(query, &mut conn).await?;
        Ok(orders)
    }
}

impl MerchantManagement for SqliteDatabase {
    async fn fetch_merchant_by_api_key(&self, api_key: &str) -> Result<Option<Merchant>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        merchants::fetch_merchant_by_api_key(api_key, &mut conn).await
    }

    async fn fetch_merchant(&self, merchant_id: i64) -> Result<Option<Merchant>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        merchants::fetch_merchant(merchant_id, &mut conn).await
    }

    async fn fetch_enabled_product(&self, agent_id: i64, code: &str) -> Result<Option<Product>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        merchants::fetch_enabled_product(agent_id, code, &mut conn).await
    }

    async fn fetch_subject(&self, subject_id: i64) -> Result<Option<Subject>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        merchants::fetch_subject(subject_id, &mut conn).await
    }

    async fn pick_subject_for_payment(
        &self,
        agent_id: i64,
        amount: Money,
    ) -> Result<Option<Subject>, MerchantApiError> {
        let mut conn = self.pool.acquire().await?;
        merchants::pick_subject_for_payment(agent_id, amount, &mut conn).await
    }

    async fn disable_subject(&self, subject_id: i64) -> Result<(), MerchantApiError> {
        let mut tx = self.pool.begin().await?;
        merchants::disable_subject(subject_id, &mut tx).await?;
        tx.commit().await?;
        warn!("🗃️ Subject {subject_id} disabled");
        Ok(())
    }
}

impl RoyaltyManagement for SqliteDatabase {
    async fn fetch_royalty_for_order(&self, order_id: i64) -> Result<Option<OrderRoyalty>, RoyaltyApiError> {
        let mut conn = self.pool.acquire().await?;
        let royalty = royalties::fetch_for_order(order_id, &mut conn).await?;
        Ok(royalty)
    }

    async fn insert_royalty(&self, royalty: NewOrderRoyalty) -> Result<OrderRoyalty, RoyaltyApiError> {
        let mut tx = self.pool.begin().await?;
        let royalty = royalties::insert(royalty, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Settlement row created for order {}", royalty.order_id);
        Ok(royalty)
    }

    async fn claim_royalty(&self, order_id: i64) -> Result<Option<OrderRoyalty>, RoyaltyApiError> {
        let mut tx = self.pool.begin().await?;
        let claimed = royalties::claim(order_id, &mut tx).await?;
        tx.commit().await?;
        Ok(claimed)
    }

    async fn complete_royalty_success(
        &self,
        order_id: i64,
        receipt: &SettlementReceipt,
    ) -> Result<OrderRoyalty, RoyaltyApiError> {
        let mut tx = self.pool.begin().await?;
        let royalty = royalties::complete_success(order_id, receipt, &mut tx).await?;
        tx.commit().await?;
        Ok(royalty)
    }

    async fn complete_royalty_failure(
        &self,
        order_id: i64,
        error_message: &str,
        terminal: bool,
    ) -> Result<OrderRoyalty, RoyaltyApiError> {
        let mut tx = self.pool.begin().await?;
        let royalty = royalties::complete_failure(order_id, error_message, terminal, &mut tx).await?;
        tx.commit().await?;
        Ok(royalty)
    }

    async fn delete_failed_royalty(&self, order_id: i64) -> Result<bool, RoyaltyApiError> {
        let mut tx = self.pool.begin().await?;
        let deleted = royalties::delete_failed(order_id, &mut tx).await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn release_stale_royalties(&self, older_than: Duration) -> Result<Vec<OrderRoyalty>, RoyaltyApiError> {
        let mut tx = self.pool.begin().await?;
        let released = royalties::release_stale(older_than, &mut tx).await?;
        tx.commit().await?;
        Ok(released)
    }

    async fn fetch_orders_needing_settlement(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<Order>, RoyaltyApiError> {
        let mut conn = self.pool.acquire().await?;
        royalties::orders_needing_settlement(min_age, limit, &mut conn).await
    }
}
