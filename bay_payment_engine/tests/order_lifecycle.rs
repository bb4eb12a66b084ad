//! End-to-end exercises for the order state machine against a real Sqlite database, with the fast
//! store and the provider replaced by test doubles.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use bay_payment_engine::{
    db_types::{OrderNo, PayStatus},
    events::EventProducers,
    order_objects::{CloseOutcome, CreateOrderRequest, OpenOutcome, WebhookOutcome},
    royalty_api::ROYALTY_QUEUE_KEY,
    test_utils::{
        prepare_env::prepare_test_env,
        random_db_path,
        seed::{TEST_API_KEY, TEST_API_SECRET, TEST_PRODUCT_CODE},
        seed_tenancy,
        MemoryFastStore,
        ScriptedProvider,
        SeededTenancy,
    },
    traits::{FastStore, PaymentGatewayDatabase, PaymentGatewayError, ProviderError, ProviderOrderStatus},
    OrderFlowApi,
    OrderFlowError,
    SqliteDatabase,
};
use bpg_common::signature::{self, SignAlgo, SIGN_FIELD};
use chrono::{Duration, TimeZone, Utc};

async fn setup() -> (SqliteDatabase, MemoryFastStore, SeededTenancy) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let seeded = seed_tenancy(db.pool()).await;
    (db, MemoryFastStore::new(), seeded)
}

fn signed_request(api_key: &str, secret: &str, extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = extra.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    params.insert("api_key".to_string(), api_key.to_string());
    let sig = signature::sign(&params, secret, SignAlgo::Md5);
    params.insert(SIGN_FIELD.to_string(), sig);
    params
}

fn order_request(merchant_order_no: &str, amount: &str, subject_id: Option<i64>) -> CreateOrderRequest {
    CreateOrderRequest {
        merchant_order_no: merchant_order_no.to_string(),
        product_code: TEST_PRODUCT_CODE.to_string(),
        amount: amount.parse().unwrap(),
        subject_id,
        notify_url: None,
        return_url: None,
        client_ip: None,
    }
}

fn paid_callback(order_no: &OrderNo, trade_no: &str, amount: &str) -> HashMap<String, String> {
    [
        ("out_trade_no", order_no.as_str()),
        ("trade_no", trade_no),
        ("trade_status", "TRADE_SUCCESS"),
        ("total_amount", amount),
        ("gmt_payment", "2024-06-01 12:30:45"),
        ("buyer_id", "2088101117955611"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[tokio::test]
async fn create_open_pay_walkthrough() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db.clone(), store.clone(), EventProducers::default());
    let provider = ScriptedProvider::new();

    let params = signed_request(TEST_API_KEY, TEST_API_SECRET, &[("merchant_order_no", "SHOP-1001")]);
    let merchant = api.authenticate(&params, Some("203.0.113.9")).await.unwrap();
    assert_eq!(merchant.id, seeded.merchant.id);

    let order = api
        .create_order(&merchant, order_request("SHOP-1001", "12.50", Some(seeded.plain_subject.id)))
        .await
        .unwrap();
    assert_eq!(order.pay_status, PayStatus::Created);
    assert!(order.platform_order_no.as_str().starts_with("BY7"), "agent id 7 missing from {}", order.platform_order_no);
    assert_eq!(order.notify_url.as_deref(), Some("https://merchant.test/notify"));
    assert_eq!(order.amount, "12.50".parse().unwrap());

    let opened = api.open_order(&order.platform_order_no).await.unwrap();
    assert!(matches!(opened, OpenOutcome::Opened(_)));
    let again = api.open_order(&order.platform_order_no).await.unwrap();
    assert!(matches!(again, OpenOutcome::AlreadyOpen(_)));

    let callback = paid_callback(&order.platform_order_no, "2024060122001452", "12.50");
    let outcome =
        api.handle_payment_confirmation(&provider, &callback, Some("47.89.1.2"), Some("AlipayNotify")).await.unwrap();
    let WebhookOutcome::MarkedPaid(paid) = outcome else {
        panic!("expected MarkedPaid, got {outcome:?}");
    };
    assert_eq!(paid.pay_status, PayStatus::Paid);
    assert_eq!(paid.trade_no.as_deref(), Some("2024060122001452"));
    assert_eq!(paid.paid_at, Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 45).unwrap()));
    assert_eq!(store.queue_len(ROYALTY_QUEUE_KEY).await.unwrap(), 1);

    // The provider redelivers. The order is acknowledged and nothing is queued twice.
    let replay = api.handle_payment_confirmation(&provider, &callback, None, None).await.unwrap();
    assert!(matches!(replay, WebhookOutcome::AlreadyPaid(_)));
    assert_eq!(store.queue_len(ROYALTY_QUEUE_KEY).await.unwrap(), 1);
}

#[tokio::test]
async fn authentication_failures_are_uniform() {
    let (db, store, _seeded) = setup().await;
    let api = OrderFlowApi::new(db, store, EventProducers::default());

    let params = signed_request("key_live_nope", TEST_API_SECRET, &[]);
    assert!(matches!(api.authenticate(&params, None).await, Err(OrderFlowError::InvalidCredentials)));

    let params = signed_request(TEST_API_KEY, "wrong-secret", &[]);
    assert!(matches!(api.authenticate(&params, None).await, Err(OrderFlowError::InvalidCredentials)));

    let mut params = signed_request(TEST_API_KEY, TEST_API_SECRET, &[("amount", "1.00")]);
    params.insert("amount".to_string(), "9999.00".to_string());
    assert!(matches!(api.authenticate(&params, None).await, Err(OrderFlowError::InvalidCredentials)));

    assert!(matches!(api.authenticate(&HashMap::new(), None).await, Err(OrderFlowError::InvalidCredentials)));
}

#[tokio::test]
async fn ip_whitelists_are_enforced() {
    let (db, store, seeded) = setup().await;
    sqlx::query("UPDATE merchants SET ip_whitelist = '10.1.2.3, 10.1.2.4' WHERE id = $1")
        .bind(seeded.merchant.id)
        .execute(db.pool())
        .await
        .unwrap();
    let api = OrderFlowApi::new(db, store, EventProducers::default());
    let params = signed_request(TEST_API_KEY, TEST_API_SECRET, &[]);
    assert!(api.authenticate(&params, Some("10.1.2.4")).await.is_ok());
    assert!(matches!(api.authenticate(&params, Some("203.0.113.9")).await, Err(OrderFlowError::InvalidCredentials)));
    assert!(matches!(api.authenticate(&params, None).await, Err(OrderFlowError::InvalidCredentials)));
}

#[tokio::test]
async fn create_order_validates_its_inputs() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db.clone(), store, EventProducers::default());

    let err = api.create_order(&seeded.merchant, order_request("  ", "1.00", None)).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::Validation(_)), "blank merchant_order_no: {err}");

    let err = api.create_order(&seeded.merchant, order_request("SHOP-V1", "0.00", None)).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::Validation(_)), "zero amount: {err}");

    let mut req = order_request("SHOP-V2", "1.00", None);
    req.product_code = "no_such_product".to_string();
    let err = api.create_order(&seeded.merchant, req).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::Validation(_)), "unknown product: {err}");

    let err = api.create_order(&seeded.merchant, order_request("SHOP-V3", "1.00", Some(424242))).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::Validation(_)), "unknown subject: {err}");

    // A subject whose amount window excludes the payment is rejected too.
    sqlx::query("UPDATE subjects SET amount_min = 1000 WHERE id = $1")
        .bind(seeded.single_subject.id)
        .execute(db.pool())
        .await
        .unwrap();
    let err = api
        .create_order(&seeded.merchant, order_request("SHOP-V4", "5.00", Some(seeded.single_subject.id)))
        .await
        .unwrap_err();
    assert!(matches!(err, OrderFlowError::Validation(_)), "amount below subject minimum: {err}");
}

#[tokio::test]
async fn merchant_order_numbers_are_unique_per_merchant() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db, store, EventProducers::default());
    api.create_order(&seeded.merchant, order_request("SHOP-7", "5.00", None)).await.unwrap();
    let err = api.create_order(&seeded.merchant, order_request("SHOP-7", "5.00", None)).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::DatabaseError(PaymentGatewayError::DuplicateMerchantOrder(_))));
    // A different merchant may reuse the same number.
    api.create_order(&seeded.bare_merchant, order_request("SHOP-7", "5.00", None)).await.unwrap();
}

#[tokio::test]
async fn expired_orders_are_closed_at_the_door() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db, store, EventProducers::default()).with_order_lifetime(Duration::zero());
    let order = api.create_order(&seeded.merchant, order_request("SHOP-EXP", "3.00", None)).await.unwrap();
    let outcome = api.open_order(&order.platform_order_no).await.unwrap();
    let OpenOutcome::Expired(closed) = outcome else {
        panic!("expected Expired, got {outcome:?}");
    };
    assert_eq!(closed.pay_status, PayStatus::Closed);
    assert!(closed.closed_at.is_some());
}

#[tokio::test]
async fn the_expiry_sweep_closes_due_orders() {
    let (db, store, seeded) = setup().await;
    let expiring = OrderFlowApi::new(db.clone(), store.clone(), EventProducers::default())
        .with_order_lifetime(Duration::zero());
    let durable = OrderFlowApi::new(db.clone(), store, EventProducers::default());

    let o1 = expiring.create_order(&seeded.merchant, order_request("SHOP-E1", "1.00", None)).await.unwrap();
    let o2 = expiring.create_order(&seeded.merchant, order_request("SHOP-E2", "2.00", None)).await.unwrap();
    let keeper = durable.create_order(&seeded.merchant, order_request("SHOP-E3", "3.00", None)).await.unwrap();

    let expired = durable.expire_due_orders().await.unwrap();
    let expired_nos: HashSet<_> = expired.iter().map(|o| o.platform_order_no.clone()).collect();
    assert_eq!(expired.len(), 2);
    assert!(expired_nos.contains(&o1.platform_order_no));
    assert!(expired_nos.contains(&o2.platform_order_no));
    assert!(expired.iter().all(|o| o.pay_status == PayStatus::Closed));

    let keeper = db.fetch_order_by_order_no(&keeper.platform_order_no).await.unwrap().unwrap();
    assert_eq!(keeper.pay_status, PayStatus::Created);
}

#[tokio::test]
async fn close_is_reconciled_with_the_provider() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db, store, EventProducers::default());
    let provider = ScriptedProvider::new();

    let order = api.create_order(&seeded.merchant, order_request("SHOP-C1", "4.00", None)).await.unwrap();
    // The provider has no record of a payment, so the close goes through.
    let close = api.close_order(&provider, &seeded.merchant, None, Some("SHOP-C1")).await.unwrap();
    assert!(matches!(close, CloseOutcome::Closed(_)));
    let again = api.close_order(&provider, &seeded.merchant, None, Some("SHOP-C1")).await.unwrap();
    assert!(matches!(again, CloseOutcome::AlreadyClosed(_)));

    // A late provider confirmation still beats the local close. The money moved.
    let callback = paid_callback(&order.platform_order_no, "T-LATE", "4.00");
    let outcome = api.handle_payment_confirmation(&provider, &callback, None, None).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::MarkedPaid(_)));
}

#[tokio::test]
async fn close_finds_the_payment_the_webhook_missed() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db, store.clone(), EventProducers::default());
    let provider = ScriptedProvider::new();

    let order = api.create_order(&seeded.merchant, order_request("SHOP-C2", "8.00", None)).await.unwrap();
    provider.script_order_status(
        &order.platform_order_no,
        ProviderOrderStatus::Paid {
            trade_no: "T-RECON".to_string(),
            amount: order.amount,
            paid_at: Utc::now(),
            buyer_id: None,
        },
    );

    let outcome = api.close_order(&provider, &seeded.merchant, Some(&order.platform_order_no), None).await.unwrap();
    let CloseOutcome::PaidInstead(paid) = outcome else {
        panic!("expected PaidInstead, got {outcome:?}");
    };
    assert_eq!(paid.pay_status, PayStatus::Paid);
    assert_eq!(paid.trade_no.as_deref(), Some("T-RECON"));
    assert_eq!(store.queue_len(ROYALTY_QUEUE_KEY).await.unwrap(), 1);

    let again = api.close_order(&provider, &seeded.merchant, Some(&order.platform_order_no), None).await.unwrap();
    assert!(matches!(again, CloseOutcome::AlreadyPaid(_)));
}

#[tokio::test]
async fn provider_outage_aborts_the_close() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db.clone(), store, EventProducers::default());
    let provider = ScriptedProvider::new();

    let order = api.create_order(&seeded.merchant, order_request("SHOP-C3", "6.00", None)).await.unwrap();
    provider.script_order_failure(&order.platform_order_no, ProviderError::Transient("gateway timeout".to_string()));

    let err = api.close_order(&provider, &seeded.merchant, Some(&order.platform_order_no), None).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::ProviderError(_)));
    // Nothing moved. The order can be closed once the provider answers again.
    let order = db.fetch_order_by_order_no(&order.platform_order_no).await.unwrap().unwrap();
    assert_eq!(order.pay_status, PayStatus::Created);
}

#[tokio::test]
async fn refunds_are_terminal() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db.clone(), store, EventProducers::default());
    let provider = ScriptedProvider::new();

    let order = api.create_order(&seeded.merchant, order_request("SHOP-R1", "9.00", None)).await.unwrap();
    let callback = paid_callback(&order.platform_order_no, "T-REFUND", "9.00");
    api.handle_payment_confirmation(&provider, &callback, None, None).await.unwrap();

    let refunded = api.mark_order_refunded(&order.platform_order_no).await.unwrap();
    assert_eq!(refunded.pay_status, PayStatus::Refunded);

    // A redelivered confirmation cannot reopen a refunded order.
    let err = api.handle_payment_confirmation(&provider, &callback, None, None).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::DatabaseError(PaymentGatewayError::OrderModificationForbidden(_))));
    let order = db.fetch_order_by_order_no(&order.platform_order_no).await.unwrap().unwrap();
    assert_eq!(order.pay_status, PayStatus::Refunded);

    // Neither can a close.
    let err = api.close_order(&provider, &seeded.merchant, Some(&order.platform_order_no), None).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::DatabaseError(PaymentGatewayError::OrderModificationForbidden(_))));

    // And an unpaid order cannot be refunded.
    let fresh = api.create_order(&seeded.merchant, order_request("SHOP-R2", "9.00", None)).await.unwrap();
    assert!(api.mark_order_refunded(&fresh.platform_order_no).await.is_err());
}

#[tokio::test]
async fn orders_are_scoped_to_their_merchant() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db, store, EventProducers::default());

    let order = api.create_order(&seeded.merchant, order_request("SHOP-S1", "2.00", None)).await.unwrap();

    let found = api.query_order(&seeded.merchant, None, Some("SHOP-S1")).await.unwrap();
    assert_eq!(found.id, order.id);
    let found = api.query_order(&seeded.merchant, Some(&order.platform_order_no), None).await.unwrap();
    assert_eq!(found.id, order.id);

    // Another merchant sees nothing, even with the right platform order number.
    let err = api.query_order(&seeded.bare_merchant, Some(&order.platform_order_no), None).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::DatabaseError(PaymentGatewayError::OrderNotFound(_))));

    // No reference at all is a request problem, not a lookup miss.
    let err = api.query_order(&seeded.merchant, None, None).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::Validation(_)));
}

#[tokio::test]
async fn concurrent_creates_never_share_an_order_number() {
    let (db, store, seeded) = setup().await;
    let api = Arc::new(OrderFlowApi::new(db, store, EventProducers::default()));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let api = Arc::clone(&api);
            let merchant = seeded.merchant.clone();
            tokio::spawn(async move {
                api.create_order(&merchant, order_request(&format!("SHOP-RACE-{i}"), "1.00", None)).await
            })
        })
        .collect();

    let mut numbers = HashSet::new();
    for task in tasks {
        let order = task.await.unwrap().expect("create failed");
        assert!(numbers.insert(order.platform_order_no.as_str().to_string()));
    }
    assert_eq!(numbers.len(), 16);
}

#[tokio::test]
async fn order_creation_survives_a_fast_store_outage() {
    let (db, store, seeded) = setup().await;
    let api = OrderFlowApi::new(db, store.clone(), EventProducers::default());

    store.go_offline();
    // The issuer falls back to the durable uniqueness check.
    let order = api.create_order(&seeded.merchant, order_request("SHOP-OUT", "2.50", None)).await.unwrap();
    assert!(order.platform_order_no.as_str().starts_with("BY"));
}
