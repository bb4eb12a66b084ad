use bpg_common::Money;
use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Merchant, Product, Subject},
    traits::MerchantApiError,
};

pub async fn fetch_merchant_by_api_key(
    api_key: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Merchant>, MerchantApiError> {
    let merchant =
        sqlx::query_as("SELECT * FROM merchants WHERE api_key = $1").bind(api_key).fetch_optional(conn).await?;
    Ok(merchant)
}

pub async fn fetch_merchant(merchant_id: i64, conn: &mut SqliteConnection) -> Result<Option<Merchant>, MerchantApiError> {
    let merchant =
        sqlx::query_as("SELECT * FROM merchants WHERE id = $1").bind(merchant_id).fetch_optional(conn).await?;
    Ok(merchant)
}

pub async fn fetch_enabled_product(
    agent_id: i64,
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Product>, MerchantApiError> {
    let product = sqlx::query_as("SELECT * FROM products WHERE agent_id = $1 AND code = $2 AND status = 1")
        .bind(agent_id)
        .bind(code)
        .fetch_optional(conn)
        .await?;
    Ok(product)
}

pub async fn fetch_subject(subject_id: i64, conn: &mut SqliteConnection) -> Result<Option<Subject>, MerchantApiError> {
    let subject = sqlx::query_as("SELECT * FROM subjects WHERE id = $1").bind(subject_id).fetch_optional(conn).await?;
    Ok(subject)
}

/// Picks a random enabled subject for the agent whose limits admit the amount. `ORDER BY RANDOM()`
/// spreads load across the agent's provider accounts.
pub async fn pick_subject_for_payment(
    agent_id: i64,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Option<Subject>, MerchantApiError> {
    let subject = sqlx::query_as(
        "SELECT * FROM subjects WHERE agent_id = $1 AND status = 1 AND (amount_min = 0 OR amount_min <= $2) AND \
         (amount_max = 0 OR amount_max >= $2) ORDER BY RANDOM() LIMIT 1",
    )
    .bind(agent_id)
    .bind(amount)
    .fetch_optional(conn)
    .await?;
    Ok(subject)
}

pub(crate) async fn disable_subject(subject_id: i64, conn: &mut SqliteConnection) -> Result<(), MerchantApiError> {
    let result = sqlx::query("UPDATE subjects SET status = 0, updated_at = CURRENT_TIMESTAMP WHERE id = $1")
        .bind(subject_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(MerchantApiError::SubjectNotFound(subject_id));
    }
    debug!("🗃️ Subject {subject_id} has been disabled");
    Ok(())
}
