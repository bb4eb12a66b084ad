use chrono::Duration;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrderRoyalty, Order, OrderRoyalty, SettlementReceipt},
    traits::RoyaltyApiError,
};

pub async fn fetch_for_order(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<OrderRoyalty>, sqlx::Error> {
    let royalty =
        sqlx::query_as("SELECT * FROM order_royalties WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(royalty)
}

pub async fn insert(royalty: NewOrderRoyalty, conn: &mut SqliteConnection) -> Result<OrderRoyalty, RoyaltyApiError> {
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO order_royalties (
                order_id,
                royalty_type,
                royalty_rate,
                royalty_amount,
                subject_amount,
                payee_account,
                payee_name,
                payee_user_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(royalty.order_id)
    .bind(royalty.royalty_type.to_string())
    .bind(royalty.royalty_rate)
    .bind(royalty.royalty_amount)
    .bind(royalty.subject_amount)
    .bind(&royalty.payee_account)
    .bind(&royalty.payee_name)
    .bind(&royalty.payee_user_id)
    .fetch_one(conn)
    .await;
    match inserted {
        Ok(r) => Ok(r),
        Err(sqlx::Error::Database(de)) if de.is_unique_violation() => {
            Err(RoyaltyApiError::RoyaltyAlreadyExists(royalty.order_id))
        },
        Err(e) => Err(e.into()),
    }
}

/// The settlement lease. At most one caller wins the `Pending`/`Failed` → `Processing` update.
pub(crate) async fn claim(order_id: i64, conn: &mut SqliteConnection) -> Result<Option<OrderRoyalty>, RoyaltyApiError> {
    let claimed = sqlx::query_as(
        "UPDATE order_royalties SET royalty_status = 'Processing', attempts = attempts + 1, updated_at = \
         CURRENT_TIMESTAMP WHERE order_id = $1 AND royalty_status IN ('Pending', 'Failed') AND terminal = 0 \
         RETURNING *;",
    )
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(claimed)
}

pub(crate) async fn complete_success(
    order_id: i64,
    receipt: &SettlementReceipt,
    conn: &mut SqliteConnection,
) -> Result<OrderRoyalty, RoyaltyApiError> {
    let updated: Option<OrderRoyalty> = sqlx::query_as(
        "UPDATE order_royalties SET royalty_status = 'Success', provider_settle_no = $1, provider_result = $2, \
         error_message = NULL, settled_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP WHERE order_id = $3 \
         RETURNING *;",
    )
    .bind(&receipt.settle_no)
    .bind(&receipt.raw_result)
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(RoyaltyApiError::RoyaltyNotFound(order_id))
}

pub(crate) async fn complete_failure(
    order_id: i64,
    error_message: &str,
    terminal: bool,
    conn: &mut SqliteConnection,
) -> Result<OrderRoyalty, RoyaltyApiError> {
    let updated: Option<OrderRoyalty> = sqlx::query_as(
        "UPDATE order_royalties SET royalty_status = 'Failed', error_message = $1, terminal = $2, updated_at = \
         CURRENT_TIMESTAMP WHERE order_id = $3 RETURNING *;",
    )
    .bind(error_message)
    .bind(terminal)
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or(RoyaltyApiError::RoyaltyNotFound(order_id))
}

/// Deletes a `Failed` row so the operator can start the settlement over. Returns whether a row
/// was deleted; a row in any other state is left alone.
pub(crate) async fn delete_failed(order_id: i64, conn: &mut SqliteConnection) -> Result<bool, RoyaltyApiError> {
    let deleted: Option<(i64,)> =
        sqlx::query_as("DELETE FROM order_royalties WHERE order_id = $1 AND royalty_status = 'Failed' RETURNING id;")
            .bind(order_id)
            .fetch_optional(conn)
            .await?;
    Ok(deleted.is_some())
}

/// Rows stuck in `Processing` are leases held by workers that died mid-settlement. Flip them back
/// to `Failed` so the backstop can reclaim them.
pub(crate) async fn release_stale(
    older_than: Duration,
    conn: &mut SqliteConnection,
) -> Result<Vec<OrderRoyalty>, RoyaltyApiError> {
    let rows = sqlx::query_as(
        format!(
            "UPDATE order_royalties SET royalty_status = 'Failed', error_message = 'settlement lease expired', \
             updated_at = CURRENT_TIMESTAMP WHERE royalty_status = 'Processing' AND \
             (unixepoch(CURRENT_TIMESTAMP) - unixepoch(updated_at)) > {} RETURNING *;",
            older_than.num_seconds()
        )
        .as_str(),
    )
    .fetch_all(conn)
    .await?;
    if !rows.is_empty() {
        debug!("🗃️ Released {} stale settlement lease(s)", rows.len());
    }
    Ok(rows)
}

/// Paid orders old enough that their settlement should have happened by now, but has not.
/// Orders routed to a subject that keeps the full amount never owe a settlement and are not
/// candidates.
pub async fn orders_needing_settlement(
    min_age: Duration,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, RoyaltyApiError> {
    let rows = sqlx::query_as(
        format!(
            "SELECT o.* FROM orders o JOIN subjects s ON s.id = o.subject_id LEFT JOIN order_royalties r ON \
             r.order_id = o.id WHERE o.pay_status = 'Paid' AND s.royalty_type <> 'None' AND \
             (unixepoch(CURRENT_TIMESTAMP) - unixepoch(o.paid_at)) >= {} AND (r.id IS NULL OR (r.royalty_status \
             IN ('Pending', 'Failed') AND r.terminal = 0)) ORDER BY o.paid_at ASC LIMIT {limit};",
            min_age.num_seconds()
        )
        .as_str(),
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
