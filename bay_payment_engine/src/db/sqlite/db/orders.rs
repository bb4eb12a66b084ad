use log::trace;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewOrder, NotifyStatus, Order, OrderNo, PayStatus, PaymentConfirmation},
    order_objects::OrderQueryFilter,
    traits::PaymentGatewayError,
};

/// Inserts a new order into the database using the given connection. This is not atomic. You can embed this call
/// inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
///
/// The two unique constraints are mapped to distinct errors so callers can tell a merchant replay
/// (same merchant order no) from a platform order number collision.
pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, PaymentGatewayError> {
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO orders (
                platform_order_no,
                merchant_order_no,
                trace_id,
                agent_id,
                merchant_id,
                product_id,
                subject_id,
                amount,
                payment_method,
                notify_url,
                return_url,
                client_ip,
                expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *;
        "#,
    )
    .bind(order.platform_order_no.as_str())
    .bind(&order.merchant_order_no)
    .bind(&order.trace_id)
    .bind(order.agent_id)
    .bind(order.merchant_id)
    .bind(order.product_id)
    .bind(order.subject_id)
    .bind(order.amount)
    .bind(&order.payment_method)
    .bind(&order.notify_url)
    .bind(&order.return_url)
    .bind(&order.client_ip)
    .bind(order.expires_at)
    .fetch_one(conn)
    .await;
    match inserted {
        Ok(o) => Ok(o),
        Err(sqlx::Error::Database(de)) if de.is_unique_violation() => {
            if de.message().contains("platform_order_no") {
                Err(PaymentGatewayError::OrderNoCollision(order.platform_order_no))
            } else {
                Err(PaymentGatewayError::DuplicateMerchantOrder(order.merchant_order_no))
            }
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_order_by_order_no(
    order_no: &OrderNo,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE platform_order_no = $1")
        .bind(order_no.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_order_by_merchant_order(
    merchant_id: i64,
    merchant_order_no: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE merchant_id = $1 AND merchant_order_no = $2")
        .bind(merchant_id)
        .bind(merchant_order_no)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

/// Checks whether an order with the given platform order number already exists.
pub async fn order_no_exists(order_no: &OrderNo, conn: &mut SqliteConnection) -> Result<bool, PaymentGatewayError> {
    let order = fetch_order_by_order_no(order_no, conn).await?;
    Ok(order.is_some())
}

/// `Created` → `Opened`. The guard on `pay_status` makes concurrent opens race-free; the loser of
/// the race falls through to the re-read and gets a no-op.
pub(crate) async fn mark_opened(order_no: &OrderNo, conn: &mut SqliteConnection) -> Result<Order, PaymentGatewayError> {
    let updated: Option<Order> = sqlx::query_as(
        "UPDATE orders SET pay_status = 'Opened', updated_at = CURRENT_TIMESTAMP WHERE platform_order_no = $1 AND \
         pay_status = 'Created' RETURNING *;",
    )
    .bind(order_no.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(o) => Ok(o),
        None => {
            let order = fetch_order_by_order_no(order_no, conn)
                .await?
                .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_no.clone()))?;
            match order.pay_status {
                PayStatus::Opened => Err(PaymentGatewayError::OrderModificationNoOp),
                status => Err(PaymentGatewayError::OrderModificationForbidden(format!(
                    "cannot open an order in state {status}"
                ))),
            }
        },
    }
}

/// `Created`/`Opened`/`Closed` → `Paid`. Returns the order and whether this call performed the
/// transition. `Refunded` refuses the confirmation; money that has been returned stays returned.
pub(crate) async fn mark_paid(
    confirmation: &PaymentConfirmation,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), PaymentGatewayError> {
    let updated: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                pay_status = 'Paid',
                trade_no = $1,
                buyer_id = $2,
                paid_at = $3,
                updated_at = CURRENT_TIMESTAMP
            WHERE platform_order_no = $4 AND pay_status IN ('Created', 'Opened', 'Closed')
            RETURNING *;
        "#,
    )
    .bind(&confirmation.trade_no)
    .bind(&confirmation.buyer_id)
    .bind(confirmation.paid_at)
    .bind(confirmation.platform_order_no.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(o) => Ok((o, true)),
        None => {
            let order = fetch_order_by_order_no(&confirmation.platform_order_no, conn)
                .await?
                .ok_or_else(|| PaymentGatewayError::OrderNotFound(confirmation.platform_order_no.clone()))?;
            match order.pay_status {
                PayStatus::Paid => Ok((order, false)),
                PayStatus::Refunded => Err(PaymentGatewayError::OrderModificationForbidden(
                    "the order has been refunded; a payment confirmation cannot reopen it".to_string(),
                )),
                status => Err(PaymentGatewayError::OrderModificationForbidden(format!(
                    "cannot pay an order in state {status}"
                ))),
            }
        },
    }
}

/// `Created`/`Opened` → `Closed`.
pub(crate) async fn close(order_no: &OrderNo, conn: &mut SqliteConnection) -> Result<Order, PaymentGatewayError> {
    let updated: Option<Order> = sqlx::query_as(
        "UPDATE orders SET pay_status = 'Closed', closed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP \
         WHERE platform_order_no = $1 AND pay_status IN ('Created', 'Opened') RETURNING *;",
    )
    .bind(order_no.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(o) => Ok(o),
        None => {
            let order = fetch_order_by_order_no(order_no, conn)
                .await?
                .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_no.clone()))?;
            match order.pay_status {
                PayStatus::Closed => Err(PaymentGatewayError::OrderModificationNoOp),
                status => Err(PaymentGatewayError::OrderModificationForbidden(format!(
                    "cannot close an order in state {status}"
                ))),
            }
        },
    }
}

/// `Paid` → `Refunded`. Operator initiated.
pub(crate) async fn mark_refunded(
    order_no: &OrderNo,
    conn: &mut SqliteConnection,
) -> Result<Order, PaymentGatewayError> {
    let updated: Option<Order> = sqlx::query_as(
        "UPDATE orders SET pay_status = 'Refunded', updated_at = CURRENT_TIMESTAMP WHERE platform_order_no = $1 AND \
         pay_status = 'Paid' RETURNING *;",
    )
    .bind(order_no.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    match updated {
        Some(o) => Ok(o),
        None => {
            let order = fetch_order_by_order_no(order_no, conn)
                .await?
                .ok_or_else(|| PaymentGatewayError::OrderNotFound(order_no.clone()))?;
            match order.pay_status {
                PayStatus::Refunded => Err(PaymentGatewayError::OrderModificationNoOp),
                status => Err(PaymentGatewayError::OrderModificationForbidden(format!(
                    "cannot refund an order in state {status}"
                ))),
            }
        },
    }
}

/// Records one notification attempt. Every call bumps `notify_times`; success also stamps
/// `notified_at`.
pub(crate) async fn update_notify_result(
    order_id: i64,
    status: NotifyStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, PaymentGatewayError> {
    let sql = match status {
        NotifyStatus::Success => {
            "UPDATE orders SET notify_status = $1, notify_times = notify_times + 1, notified_at = CURRENT_TIMESTAMP, \
             updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *;"
        },
        _ => {
            "UPDATE orders SET notify_status = $1, notify_times = notify_times + 1, updated_at = CURRENT_TIMESTAMP \
             WHERE id = $2 RETURNING *;"
        },
    };
    let result: Option<Order> =
        sqlx::query_as(sql).bind(status.to_string()).bind(order_id).fetch_optional(conn).await?;
    result.ok_or(PaymentGatewayError::OrderIdNotFound(order_id))
}

/// Closes every `Created`/`Opened` order whose expiry has passed, returning the closed orders.
/// The `unixepoch` comparison keeps this immune to the two timestamp formats SQLite mixes
/// (CURRENT_TIMESTAMP vs bound RFC 3339 values).
pub(crate) async fn expire_due(conn: &mut SqliteConnection) -> Result<Vec<Order>, PaymentGatewayError> {
    let rows = sqlx::query_as(
        "UPDATE orders SET pay_status = 'Closed', closed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP \
         WHERE pay_status IN ('Created', 'Opened') AND unixepoch(expires_at) <= unixepoch(CURRENT_TIMESTAMP) \
         RETURNING *;",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Paid orders whose merchant has not acknowledged the notification, with attempts to spare.
pub(crate) async fn fetch_for_notify_retry(
    max_times: i64,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, PaymentGatewayError> {
    let rows = sqlx::query_as(
        "SELECT * FROM orders WHERE pay_status = 'Paid' AND notify_status <> 'Success' AND notify_times < $1 AND \
         notify_url IS NOT NULL AND notify_url <> '' ORDER BY id ASC LIMIT $2;",
    )
    .bind(max_times)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`
///
/// Resulting orders are ordered by `created_at` in ascending order
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(merchant_id) = query.merchant_id {
        where_clause.push("merchant_id = ");
        where_clause.push_bind_unseparated(merchant_id);
    }
    if let Some(agent_id) = query.agent_id {
        where_clause.push("agent_id = ");
        where_clause.push_bind_unseparated(agent_id);
    }
    if let Some(order_no) = query.platform_order_no {
        where_clause.push("platform_order_no = ");
        where_clause.push_bind_unseparated(order_no.to_string());
    }
    if let Some(mon) = query.merchant_order_no {
        where_clause.push("merchant_order_no = ");
        where_clause.push_bind_unseparated(mon);
    }
    if let Some(trade_no) = query.trade_no {
        where_clause.push("trade_no = ");
        where_clause.push_bind_unseparated(trade_no);
    }
    if query.pay_status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.pay_status.as_ref().into_iter().flatten().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("pay_status IN ({status_clause})"));
    }
    if let Some(notify_status) = query.notify_status {
        where_clause.push("notify_status = ");
        where_clause.push_bind_unseparated(notify_status.to_string());
    }
    if let Some(since) = query.since {
        where_clause.push("created_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("created_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    if let Some(min) = query.min_amount {
        where_clause.push("amount >= ");
        where_clause.push_bind_unseparated(min);
    }
    if let Some(max) = query.max_amount {
        where_clause.push("amount <= ");
        where_clause.push_bind_unseparated(max);
    }
    builder.push(" ORDER BY created_at ASC");
    if query.limit.is_some() || query.offset.is_some() {
        // Sqlite wants a LIMIT before it accepts an OFFSET; -1 means unbounded.
        builder.push(" LIMIT ");
        builder.push_bind(query.limit.unwrap_or(-1));
        if let Some(offset) = query.offset {
            builder.push(" OFFSET ");
            builder.push_bind(offset);
        }
    }

    trace!("🗃️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("🗃️ Result of search_orders: {:?}", orders.len());
    Ok(orders)
}
