use std::collections::HashMap;

use actix_web::{
    body::MessageBody,
    http::StatusCode,
    test,
    test::TestRequest,
    web,
    web::ServiceConfig,
    App,
};
use anyhow::anyhow;
use bay_payment_engine::{
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
    NotifyApi,
    NotifyConfig,
    OrderFlowApi,
    RoyaltyApi,
    RoyaltyConfig,
    SqliteDatabase,
};
use bpg_common::{
    signature::{self, SignAlgo},
    Secret,
};
use serde_json::Value;

use crate::{
    config::{AdminConfig, ServerConfig},
    middleware::{AdminMiddlewareFactory, ADMIN_TOKEN_HEADER},
    routes::{
        ClearCircuitRoute,
        CloseOrderRoute,
        CreateOrderRoute,
        EnqueueRoyaltyRoute,
        OpenOrderRoute,
        PaymentCallbackRoute,
        QueryOrderRoute,
        RefundOrderRoute,
        ResendNotificationRoute,
        RetryRoyaltyRoute,
        RoyaltyStatusRoute,
        SearchOrdersRoute,
    },
};

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// A fresh database, seeded tenancy and in-process fast store, plus the config the handlers read.
pub struct TestGateway {
    pub db: SqliteDatabase,
    pub store: MemoryFastStore,
    pub tenancy: SeededTenancy,
    pub config: ServerConfig,
}

pub async fn new_gateway() -> TestGateway {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error connecting to the test database");
    let tenancy = seed_tenancy(db.pool()).await;
    let store = MemoryFastStore::new();
    let mut config = ServerConfig::default();
    config.public_url = "https://pay.test".to_string();
    config.admin = AdminConfig { token: Secret::new(OPERATOR_TOKEN.to_string()), whitelist: None };
    TestGateway { db, store, tenancy, config }
}

impl TestGateway {
    pub fn order_api(&self) -> OrderFlowApi<SqliteDatabase, MemoryFastStore> {
        OrderFlowApi::new(self.db.clone(), self.store.clone(), EventProducers::default())
    }

    pub fn notify_api(&self) -> NotifyApi<SqliteDatabase, MemoryFastStore> {
        NotifyApi::new(self.db.clone(), self.store.clone(), EventProducers::default(), NotifyConfig::default())
    }

    pub fn royalty_api(&self) -> RoyaltyApi<SqliteDatabase, MemoryFastStore> {
        RoyaltyApi::new(self.db.clone(), self.store.clone(), EventProducers::default(), RoyaltyConfig::default())
    }

    /// The merchant, cashier and callback routes, mounted the way the real server mounts them.
    pub fn merchant_routes(&self, provider: &ScriptedProvider) -> impl FnOnce(&mut ServiceConfig) + '_ {
        let provider = provider.clone();
        move |cfg: &mut ServiceConfig| {
            cfg.app_data(web::Data::new(self.order_api()))
                .app_data(web::Data::new(self.config.clone()))
                .app_data(web::Data::new(provider))
                .service(CreateOrderRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(QueryOrderRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(CloseOrderRoute::<SqliteDatabase, MemoryFastStore, ScriptedProvider>::new())
                .service(PaymentCallbackRoute::<SqliteDatabase, MemoryFastStore, ScriptedProvider>::new())
                .service(OpenOrderRoute::<SqliteDatabase, MemoryFastStore>::new());
        }
    }

    /// The admin scope behind the operator token middleware, as `/admin/...`.
    pub fn admin_routes(&self, transport: &RecordingTransport) -> impl FnOnce(&mut ServiceConfig) + '_ {
        let transport = transport.clone();
        move |cfg: &mut ServiceConfig| {
            let scope = web::scope("/admin")
                .wrap(AdminMiddlewareFactory::new(
                    self.config.admin.token.clone(),
                    self.config.admin.whitelist.clone(),
                    false,
                    false,
                ))
                .service(ResendNotificationRoute::<SqliteDatabase, MemoryFastStore, RecordingTransport>::new())
                .service(ClearCircuitRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(RetryRoyaltyRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(EnqueueRoyaltyRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(RoyaltyStatusRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(RefundOrderRoute::<SqliteDatabase, MemoryFastStore>::new())
                .service(SearchOrdersRoute::<SqliteDatabase, MemoryFastStore>::new());
            cfg.app_data(web::Data::new(self.order_api()))
                .app_data(web::Data::new(self.notify_api()))
                .app_data(web::Data::new(self.royalty_api()))
                .app_data(web::Data::new(self.config.clone()))
                .app_data(web::Data::new(transport))
                .service(scope);
        }
    }
}

/// Signs `params` with the seeded merchant's md5 credentials.
pub fn signed_form(mut params: HashMap<String, String>) -> HashMap<String, String> {
    params.insert("api_key".to_string(), TEST_API_KEY.to_string());
    let sign = signature::sign(&params, TEST_API_SECRET, SignAlgo::Md5);
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

pub async fn post_form<F: FnOnce(&mut ServiceConfig)>(
    path: &str,
    form: &HashMap<String, String>,
    configure: F,
) -> anyhow::Result<(StatusCode, String)> {
    let req = TestRequest::post().uri(path).set_form(form).to_request();
    let service = test::init_service(App::new().configure(configure)).await;
    let (_, res) = test::try_call_service(&service, req).await.map_err(|e| anyhow!("{e}"))?.into_parts();
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
    Ok((status, body))
}

pub async fn get_path<F: FnOnce(&mut ServiceConfig)>(
    path: &str,
    token: Option<&str>,
    configure: F,
) -> anyhow::Result<(StatusCode, String)> {
    let mut req = TestRequest::get().uri(path);
    if let Some(token) = token {
        req = req.insert_header((ADMIN_TOKEN_HEADER, token));
    }
    let req = req.to_request();
    let service = test::init_service(App::new().configure(configure)).await;
    let (_, res) = test::try_call_service(&service, req).await.map_err(|e| anyhow!("{e}"))?.into_parts();
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
    Ok((status, body))
}

pub async fn admin_post<F: FnOnce(&mut ServiceConfig)>(
    path: &str,
    body: Value,
    token: Option<&str>,
    configure: F,
) -> anyhow::Result<(StatusCode, String)> {
    let mut req = TestRequest::post().uri(path).set_json(&body);
    if let Some(token) = token {
        req = req.insert_header((ADMIN_TOKEN_HEADER, token));
    }
    let req = req.to_request();
    let service = test::init_service(App::new().configure(configure)).await;
    let (_, res) = test::try_call_service(&service, req).await.map_err(|e| anyhow!("{e}"))?.into_parts();
    let status = res.status();
    let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
    Ok((status, body))
}

pub fn json_body(body: &str) -> Value {
    serde_json::from_str(body).expect("The response body is not JSON")
}
