//! Server assembly: event wiring, background workers and the actix application itself.
//!
//! The paid notification rides the event channel rather than the webhook request path, so a slow
//! merchant endpoint cannot stretch the provider callback. The alert channel is created first and
//! its producer is grafted onto every API instance, including the one inside the paid hook, so
//! breaker trips and settlement failures reach the operator log no matter where they happen.
//!
//! [`create_server_instance`] and [`start_event_pipeline`] are generic over the fast store, the
//! provider and the notify transport. Production runs them on Redis and reqwest; the end-to-end
//! tests run the identical assembly on in-process doubles.

use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use bay_payment_engine::{
    events::{EventHandler, EventHandlers, EventHooks, EventProducers, Handler, OperatorAlertEvent, OrderPaidEvent},
    traits::{FastStore, NotifyTransport, PaymentProvider},
    NotifyApi,
    NotifyConfig,
    OrderFlowApi,
    RedisStore,
    RoyaltyApi,
    SqliteDatabase,
};
use futures::FutureExt;
use log::*;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    integrations::{HttpNotifier, ProviderClient},
    middleware::AdminMiddlewareFactory,
    routes::{
        health,
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
    workers::{start_backstop_worker, start_expiry_worker, start_notify_worker, start_royalty_worker},
};

/// Event channel depth before publishers start waiting.
const EVENT_BUFFER_SIZE: usize = 25;
const EXPIRY_INTERVAL_SECS: u64 = 60;
const NOTIFY_RETRY_INTERVAL_SECS: u64 = 180;
const ROYALTY_POLL_SECS: u64 = 1;
const BACKSTOP_INTERVAL_SECS: u64 = 600;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let store = RedisStore::connect(&config.redis_url)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let notifier = HttpNotifier::new(&config.notify)?;
    let provider = ProviderClient::new(config.provider.clone())?;

    let producers = start_event_pipeline(db.clone(), store.clone(), notifier.clone(), config.notify_policy.clone()).await;
    start_expiry_worker(db.clone(), store.clone(), producers.clone(), config.order_lifetime, EXPIRY_INTERVAL_SECS);
    start_notify_worker(
        db.clone(),
        store.clone(),
        producers.clone(),
        config.notify_policy.clone(),
        notifier.clone(),
        NOTIFY_RETRY_INTERVAL_SECS,
    );
    start_royalty_worker(
        db.clone(),
        store.clone(),
        producers.clone(),
        config.royalty_policy.clone(),
        provider.clone(),
        ROYALTY_POLL_SECS,
    );
    start_backstop_worker(db.clone(), store.clone(), producers.clone(), config.royalty_policy.clone(), BACKSTOP_INTERVAL_SECS);

    let srv = create_server_instance(config, db, store, producers, notifier, provider)?;
    srv.await?;
    Ok(())
}

/// Builds and starts the event handlers and returns the producer set every API instance gets.
///
/// Two-phase wiring: the alert handler exists before the paid hook is built, so the `NotifyApi`
/// inside that hook can raise operator alerts, and a second alert subscription goes to the
/// request-path producers afterwards.
pub async fn start_event_pipeline<S, T>(db: SqliteDatabase, store: S, notifier: T, config: NotifyConfig) -> EventProducers
where
    S: FastStore + Send + Sync + 'static,
    T: NotifyTransport + Send + Sync + 'static,
{
    let alert_handler = EventHandler::new(EVENT_BUFFER_SIZE, alert_hook());
    let mut hook_producers = EventProducers::default();
    hook_producers.alert_producer.push(alert_handler.subscribe());
    let hook_api = Arc::new(NotifyApi::new(db, store, hook_producers, config));
    let mut hooks = EventHooks::default();
    hooks.on_order_paid(move |ev: OrderPaidEvent| {
        let api = Arc::clone(&hook_api);
        let transport = notifier.clone();
        async move {
            let order = ev.order;
            if let Err(e) = api.notify_order_paid(&transport, &order, false).await {
                error!(
                    "📬️ [{}] Paid notification for order [{}] was not dispatched: {e}",
                    order.trace_id, order.platform_order_no
                );
            }
        }
        .boxed()
    });
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let mut producers = handlers.producers();
    producers.alert_producer.push(alert_handler.subscribe());
    handlers.start_handlers().await;
    tokio::spawn(alert_handler.start_handler());
    producers
}

/// Everything an operator wants to know about, at error level so it survives quiet log configs.
fn alert_hook() -> Handler<OperatorAlertEvent> {
    Arc::new(|ev: OperatorAlertEvent| {
        async move {
            error!("🚨️ {}", ev.alert);
        }
        .boxed()
    })
}

pub fn create_server_instance<S, P, T>(
    config: ServerConfig,
    db: SqliteDatabase,
    store: S,
    producers: EventProducers,
    notifier: T,
    provider: P,
) -> Result<Server, ServerError>
where
    S: FastStore + Send + Sync + 'static,
    P: PaymentProvider + Send + Sync + 'static,
    T: NotifyTransport + Send + Sync + 'static,
{
    let host = config.host.clone();
    let port = config.port;
    info!("🚀️ Web server starting on {host}:{port}");
    let srv = HttpServer::new(move || {
        let order_api = OrderFlowApi::new(db.clone(), store.clone(), producers.clone())
            .with_order_lifetime(config.order_lifetime);
        let notify_api = NotifyApi::new(db.clone(), store.clone(), producers.clone(), config.notify_policy.clone());
        let royalty_api = RoyaltyApi::new(db.clone(), store.clone(), producers.clone(), config.royalty_policy.clone());
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bpg::access_log"))
            .app_data(web::Data::new(order_api))
            .app_data(web::Data::new(notify_api))
            .app_data(web::Data::new(royalty_api))
            .app_data(web::Data::new(provider.clone()))
            .app_data(web::Data::new(notifier.clone()))
            .app_data(web::Data::new(config.clone()));
        let merchant_scope = web::scope("/api/v1")
            .service(CreateOrderRoute::<SqliteDatabase, S>::new())
            .service(QueryOrderRoute::<SqliteDatabase, S>::new())
            .service(CloseOrderRoute::<SqliteDatabase, S, P>::new())
            .service(PaymentCallbackRoute::<SqliteDatabase, S, P>::new());
        let admin_scope = web::scope("/api/v1/admin")
            .wrap(AdminMiddlewareFactory::new(
                config.admin.token.clone(),
                config.admin.whitelist.clone(),
                config.use_x_forwarded_for,
                config.use_forwarded,
            ))
            .service(ResendNotificationRoute::<SqliteDatabase, S, T>::new())
            .service(ClearCircuitRoute::<SqliteDatabase, S>::new())
            .service(RetryRoyaltyRoute::<SqliteDatabase, S>::new())
            .service(EnqueueRoyaltyRoute::<SqliteDatabase, S>::new())
            .service(RoyaltyStatusRoute::<SqliteDatabase, S>::new())
            .service(RefundOrderRoute::<SqliteDatabase, S>::new())
            .service(SearchOrdersRoute::<SqliteDatabase, S>::new());
        app.service(health)
            .service(merchant_scope)
            .service(admin_scope)
            .service(OpenOrderRoute::<SqliteDatabase, S>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}
