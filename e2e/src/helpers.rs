//! The world the scenarios run in: a real server on a local port, plus handles to everything
//! behind it so tests can script the provider, inspect deliveries, and drive the settlement
//! worker tick by tick.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use actix_web::dev::ServerHandle;
use bay_payment_engine::{
    db_types::Order,
    events::EventProducers,
    test_utils::{
        prepare_test_env,
        random_db_path,
        seed::{TEST_API_KEY, TEST_API_SECRET, TEST_PRODUCT_CODE},
        seed_tenancy,
        MemoryFastStore,
        RecordingTransport,
        ScriptedProvider,
        SeededTenancy,
    },
    traits::PaymentGatewayDatabase,
    NotifyApi,
    NotifyConfig,
    RoyaltyApi,
    RoyaltyConfig,
    RoyaltyTickOutcome,
    SqliteDatabase,
};
use bay_payment_server::{
    config::{AdminConfig, ServerConfig},
    middleware::ADMIN_TOKEN_HEADER,
    server::{create_server_instance, start_event_pipeline},
};
use bpg_common::{signature, Secret};
use chrono::Utc;
use log::*;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;

pub const OPERATOR_TOKEN: &str = "e2e-operator-token";

/// One gateway instance, fully assembled and listening.
///
/// The server runs the production wiring ([`create_server_instance`] plus the paid-notification
/// event pipeline); only the edges are swapped for doubles. The background workers are not
/// started, so a test decides when a settlement tick happens via [`BpgWorld::settle_next`].
pub struct BpgWorld {
    pub config: ServerConfig,
    pub db: SqliteDatabase,
    pub store: MemoryFastStore,
    pub provider: ScriptedProvider,
    pub transport: RecordingTransport,
    pub tenancy: SeededTenancy,
    server_handle: ServerHandle,
}

impl BpgWorld {
    pub async fn start() -> Self {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error connecting to the test database");
        let tenancy = seed_tenancy(db.pool()).await;
        let store = MemoryFastStore::new();
        let provider = ScriptedProvider::new();
        let transport = RecordingTransport::new();

        let mut config = ServerConfig::new("127.0.0.1", 20000 + rand::random::<u16>() % 10_000);
        config.public_url = format!("http://{}:{}", config.host, config.port);
        config.database_url = url;
        config.admin = AdminConfig { token: Secret::new(OPERATOR_TOKEN.to_string()), whitelist: None };

        let producers =
            start_event_pipeline(db.clone(), store.clone(), transport.clone(), NotifyConfig::default()).await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let srv_config = config.clone();
        let (srv_db, srv_store) = (db.clone(), store.clone());
        let (srv_transport, srv_provider) = (transport.clone(), provider.clone());
        tokio::spawn(async move {
            let srv = create_server_instance(srv_config, srv_db, srv_store, producers, srv_transport, srv_provider)
                .expect("Error creating the server instance");
            let _ = tx.send(srv.handle());
            match srv.await {
                Ok(()) => info!("🌍️ Server shut down"),
                Err(e) => warn!("🌍️ Server error: {e}"),
            }
        });
        let server_handle = rx.await.expect("The server did not start");
        info!("🌍️ Server listening on {}:{}", config.host, config.port);
        Self { config, db, store, provider, transport, tenancy, server_handle }
    }

    pub async fn stop(self) {
        self.server_handle.stop(true).await;
    }

    pub async fn request<F>(&self, method: Method, path: &str, build: F) -> (StatusCode, String)
    where F: FnOnce(RequestBuilder) -> RequestBuilder {
        let url = format!("http://{}:{}{path}", self.config.host, self.config.port);
        debug!("🌍️ {method} {url}");
        let req = build(Client::new().request(method, url));
        let res = req.send().await.expect("Error sending the request");
        let status = res.status();
        let body = res.text().await.expect("Error reading the response body");
        (status, body)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, String) {
        self.request(Method::GET, path, |req| req).await
    }

    pub async fn post_form(&self, path: &str, form: &HashMap<String, String>) -> (StatusCode, String) {
        self.request(Method::POST, path, |req| req.form(form)).await
    }

    pub async fn admin_post(&self, path: &str, body: Value) -> (StatusCode, String) {
        self.request(Method::POST, path, |req| req.header(ADMIN_TOKEN_HEADER, OPERATOR_TOKEN).json(&body)).await
    }

    pub async fn admin_get(&self, path: &str) -> (StatusCode, String) {
        self.request(Method::GET, path, |req| req.header(ADMIN_TOKEN_HEADER, OPERATOR_TOKEN)).await
    }

    /// Creates an order through the public API and returns the `data` object of the response.
    pub async fn create_order(&self, form: HashMap<String, String>) -> Value {
        let (status, body) = self.post_form("/api/v1/order/create", &signed_form(form)).await;
        assert_eq!(status.as_u16(), 200, "Create failed: {body}");
        let res = json_body(&body);
        assert_eq!(res["code"], 0, "Create was rejected: {body}");
        res["data"].clone()
    }

    pub async fn query_order(&self, merchant_order_no: &str) -> Value {
        let mut params = HashMap::new();
        params.insert("merchant_order_no".to_string(), merchant_order_no.to_string());
        let (status, body) = self.post_form("/api/v1/order/query", &signed_form(params)).await;
        assert_eq!(status.as_u16(), 200, "Query failed: {body}");
        let res = json_body(&body);
        assert_eq!(res["code"], 0, "Query was rejected: {body}");
        res["data"].clone()
    }

    /// Plays a provider confirmation into the callback endpoint and returns the raw body
    /// (`success` or `fail`).
    pub async fn send_callback(&self, form: &HashMap<String, String>) -> String {
        let (status, body) = self.post_form("/api/v1/notify/payment", form).await;
        assert_eq!(status.as_u16(), 200, "The callback endpoint must always answer 200");
        body
    }

    pub fn notify_api(&self, config: NotifyConfig) -> NotifyApi<SqliteDatabase, MemoryFastStore> {
        NotifyApi::new(self.db.clone(), self.store.clone(), EventProducers::default(), config)
    }

    pub fn royalty_api(&self) -> RoyaltyApi<SqliteDatabase, MemoryFastStore> {
        RoyaltyApi::new(self.db.clone(), self.store.clone(), EventProducers::default(), RoyaltyConfig::default())
    }

    /// One settlement worker tick against the scripted provider.
    pub async fn settle_next(&self) -> RoyaltyTickOutcome {
        self.royalty_api().process_next(&self.provider).await.expect("Settlement tick failed")
    }

    pub async fn order_by_id(&self, order_id: i64) -> Order {
        self.db
            .fetch_order_by_id(order_id)
            .await
            .expect("Error fetching the order")
            .expect("The order does not exist")
    }
}

/// Polls `cond` until it holds or the timeout runs out. The paid notification rides the event
/// pipeline, so tests use this to wait for it instead of racing the handler.
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    cond()
}

/// Signs `params` as the seeded merchant (md5 credentials).
pub fn signed_form(params: HashMap<String, String>) -> HashMap<String, String> {
    sign_as(params, TEST_API_KEY, TEST_API_SECRET)
}

pub fn sign_as(mut params: HashMap<String, String>, api_key: &str, secret: &str) -> HashMap<String, String> {
    params.insert("api_key".to_string(), api_key.to_string());
    let sign = signature::sign(&params, secret, signature::SignAlgo::Md5);
    params.insert(signature::SIGN_FIELD.to_string(), sign);
    params
}

pub fn order_form(merchant_order_no: &str, amount: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    params.insert("merchant_order_no".to_string(), merchant_order_no.to_string());
    params.insert("product_code".to_string(), TEST_PRODUCT_CODE.to_string());
    params.insert("amount".to_string(), amount.to_string());
    params
}

/// The field set the provider posts when a buyer pays.
pub fn callback_form(platform_order_no: &str, trade_no: &str, amount: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    params.insert("out_trade_no".to_string(), platform_order_no.to_string());
    params.insert("trade_no".to_string(), trade_no.to_string());
    params.insert("total_amount".to_string(), amount.to_string());
    params.insert("trade_status".to_string(), "TRADE_SUCCESS".to_string());
    params.insert("gmt_payment".to_string(), Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());
    params.insert("buyer_id".to_string(), "2088000000009999".to_string());
    params
}

pub fn json_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("The response body is not JSON ({e}): {body}"))
}
