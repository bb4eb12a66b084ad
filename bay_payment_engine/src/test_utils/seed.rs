use sqlx::SqlitePool;

use crate::db_types::{Merchant, Product, Subject};

pub const TEST_AGENT_ID: i64 = 7;
pub const TEST_API_KEY: &str = "key_live_a1b2c3d4";
pub const TEST_API_SECRET: &str = "9f86d081884c7d659a2feaa0c55ad015";
pub const BARE_API_KEY: &str = "key_live_09870987";
pub const BARE_API_SECRET: &str = "b4b147bc522828731f1a016bfa72c073";
pub const TEST_PRODUCT_CODE: &str = "alipay_qr";

/// A ready-made tenancy covering the common test setups.
pub struct SeededTenancy {
    /// Enabled, md5 signing, notify and return URLs on file, no IP whitelist.
    pub merchant: Merchant,
    /// Enabled, but with no notify URL on file.
    pub bare_merchant: Merchant,
    pub product: Product,
    /// `Single` royalty at 2.5%, payee on file.
    pub single_subject: Subject,
    /// `Merchant` royalty, payee on file.
    pub merchant_subject: Subject,
    /// No royalty due.
    pub plain_subject: Subject,
}

/// Populates one agent's worth of merchants, products and subjects.
pub async fn seed_tenancy(pool: &SqlitePool) -> SeededTenancy {
    let merchant = insert_merchant(pool, "Test Merchant", TEST_API_KEY, TEST_API_SECRET, Some("https://merchant.test/notify")).await;
    let bare_merchant = insert_merchant(pool, "Bare Merchant", BARE_API_KEY, BARE_API_SECRET, None).await;
    let product: Product = sqlx::query_as(
        "INSERT INTO products (agent_id, code, name, payment_method) VALUES ($1, $2, 'Alipay QR', 'alipay_qr') \
         RETURNING *;",
    )
    .bind(TEST_AGENT_ID)
    .bind(TEST_PRODUCT_CODE)
    .fetch_one(pool)
    .await
    .expect("Error seeding product");
    let single_subject = insert_subject(pool, "Single 2.5%", "Single", 250).await;
    let merchant_subject = insert_subject(pool, "Merchant share", "Merchant", 0).await;
    let plain_subject = insert_subject(pool, "No royalty", "None", 0).await;
    SeededTenancy { merchant, bare_merchant, product, single_subject, merchant_subject, plain_subject }
}

pub async fn insert_merchant(
    pool: &SqlitePool,
    name: &str,
    api_key: &str,
    api_secret: &str,
    notify_url: Option<&str>,
) -> Merchant {
    sqlx::query_as(
        "INSERT INTO merchants (agent_id, name, api_key, api_secret, notify_url, return_url) VALUES ($1, $2, $3, \
         $4, $5, 'https://merchant.test/return') RETURNING *;",
    )
    .bind(TEST_AGENT_ID)
    .bind(name)
    .bind(api_key)
    .bind(api_secret)
    .bind(notify_url)
    .fetch_one(pool)
    .await
    .expect("Error seeding merchant")
}

pub async fn insert_subject(pool: &SqlitePool, name: &str, royalty_type: &str, royalty_rate: i64) -> Subject {
    sqlx::query_as(
        "INSERT INTO subjects (agent_id, name, provider_account, royalty_type, royalty_rate, payee_account, \
         payee_name) VALUES ($1, $2, '2088000000000001', $3, $4, 'payee@subject.test', 'Subject Payee') RETURNING *;",
    )
    .bind(TEST_AGENT_ID)
    .bind(name)
    .bind(royalty_type)
    .bind(royalty_rate)
    .fetch_one(pool)
    .await
    .expect("Error seeding subject")
}
