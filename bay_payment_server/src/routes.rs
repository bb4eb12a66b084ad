//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! The merchant API speaks urlencoded forms, because the request signature is computed over the
//! raw parameter set, and answers with the [`ApiResponse`] JSON envelope. The provider callback
//! route answers with the provider's bare `success`/`fail` tokens and never with an error status.
//! Admin routes speak plain JSON and run behind the operator token middleware.

use std::collections::HashMap;

use actix_web::{get, http::header, web, HttpRequest, HttpResponse, Responder};
use bay_payment_engine::{
    db_types::OrderNo,
    order_objects::{CloseOutcome, CreateOrderRequest, OpenOutcome, WebhookOutcome},
    traits::{FastStore, NotifyTransport, PaymentGatewayDatabase, PaymentProvider},
    NotifyApi,
    NotifyDispatchResult,
    NotifySkipReason,
    OrderFlowApi,
    RoyaltyApi,
};
use bpg_common::Money;
use log::*;
use serde_json::json;

use crate::{
    config::ServerConfig,
    data_objects::{
        ApiResponse,
        MerchantRef,
        OrderCreatedResult,
        OrderRef,
        OrderSearchQuery,
        OrderStatusResult,
        PaySummary,
        RefundRequest,
        RoyaltyStatusResult,
    },
    errors::ServerError,
    helpers::remote_ip_string,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Merchant API  ----------------------------------------------------
route!(create_order => Post "/order/create" impl PaymentGatewayDatabase, FastStore);
/// Route handler for the create order endpoint.
///
/// The request is a signed urlencoded form. Authentication resolves the merchant behind the
/// `api_key`/`sign` pair; every failure answers with the same uniform 401 so callers cannot probe
/// which check failed. On success the order lands in `Created` and the answer carries the payment
/// URL the merchant should redirect the buyer to.
pub async fn create_order<B: PaymentGatewayDatabase, F: FastStore>(
    req: HttpRequest,
    form: web::Form<HashMap<String, String>>,
    api: web::Data<OrderFlowApi<B, F>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received create order request");
    let params = form.into_inner();
    let ip = remote_ip_string(&req, config.use_x_forwarded_for, config.use_forwarded);
    let merchant = api.authenticate(&params, ip.as_deref()).await?;
    let request = build_create_request(&params, ip)?;
    let order = api.create_order(&merchant, request).await?;
    info!("💻️ [{}] Created order [{}] for merchant {}", order.trace_id, order.platform_order_no, merchant.id);
    Ok(HttpResponse::Ok().json(ApiResponse::success(OrderCreatedResult::new(&order, &config.public_url))))
}

fn build_create_request(
    params: &HashMap<String, String>,
    client_ip: Option<String>,
) -> Result<CreateOrderRequest, ServerError> {
    let amount = params
        .get("amount")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServerError::ValidationError("amount is required".to_string()))?
        .parse::<Money>()
        .map_err(|e| ServerError::ValidationError(e.to_string()))?;
    let subject_id = match params.get("subject_id").filter(|s| !s.is_empty()) {
        Some(s) => {
            let id = s
                .parse::<i64>()
                .map_err(|_| ServerError::ValidationError("subject_id must be an integer".to_string()))?;
            Some(id)
        },
        None => None,
    };
    Ok(CreateOrderRequest {
        merchant_order_no: params.get("merchant_order_no").cloned().unwrap_or_default(),
        product_code: params.get("product_code").cloned().unwrap_or_default(),
        amount,
        subject_id,
        notify_url: params.get("notify_url").filter(|s| !s.is_empty()).cloned(),
        return_url: params.get("return_url").filter(|s| !s.is_empty()).cloned(),
        client_ip,
    })
}

route!(query_order => Post "/order/query" impl PaymentGatewayDatabase, FastStore);
pub async fn query_order<B: PaymentGatewayDatabase, F: FastStore>(
    req: HttpRequest,
    form: web::Form<HashMap<String, String>>,
    api: web::Data<OrderFlowApi<B, F>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received query order request");
    let params = form.into_inner();
    let ip = remote_ip_string(&req, config.use_x_forwarded_for, config.use_forwarded);
    let merchant = api.authenticate(&params, ip.as_deref()).await?;
    let (platform_no, merchant_no) = order_reference(&params);
    let order = api.query_order(&merchant, platform_no.as_ref(), merchant_no).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(OrderStatusResult::from(&order))))
}

route!(close_order => Post "/order/close" impl PaymentGatewayDatabase, FastStore, PaymentProvider);
/// Route handler for the reconcile-then-close endpoint.
///
/// The provider is asked for the order's real state before anything is closed, so a payment the
/// webhook missed is landed instead of being shut out. A provider outage aborts the close.
pub async fn close_order<B: PaymentGatewayDatabase, F: FastStore, P: PaymentProvider>(
    req: HttpRequest,
    form: web::Form<HashMap<String, String>>,
    api: web::Data<OrderFlowApi<B, F>>,
    provider: web::Data<P>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received close order request");
    let params = form.into_inner();
    let ip = remote_ip_string(&req, config.use_x_forwarded_for, config.use_forwarded);
    let merchant = api.authenticate(&params, ip.as_deref()).await?;
    let (platform_no, merchant_no) = order_reference(&params);
    let outcome = api.close_order(provider.get_ref(), &merchant, platform_no.as_ref(), merchant_no).await?;
    let (message, order) = match &outcome {
        CloseOutcome::Closed(o) => ("order closed", o),
        CloseOutcome::AlreadyClosed(o) => ("order already closed", o),
        CloseOutcome::PaidInstead(o) | CloseOutcome::AlreadyPaid(o) => ("order already paid", o),
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success_with(message, OrderStatusResult::from(order))))
}

fn order_reference(params: &HashMap<String, String>) -> (Option<OrderNo>, Option<&str>) {
    let platform_no =
        params.get("platform_order_no").filter(|s| !s.is_empty()).map(|s| OrderNo::from(s.as_str()));
    let merchant_no = params.get("merchant_order_no").filter(|s| !s.is_empty()).map(|s| s.as_str());
    (platform_no, merchant_no)
}

//----------------------------------------------   Cashier page  ----------------------------------------------------
route!(open_order => Get "/pay/{order_no}" impl PaymentGatewayDatabase, FastStore);
/// The first render of the payment page marks the order `Opened`. An expired order is closed at
/// the door instead; the page gets the summary either way and decides from `payable` whether to
/// draw a payment form or a final-state banner.
pub async fn open_order<B: PaymentGatewayDatabase, F: FastStore>(
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B, F>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::from(path.into_inner());
    trace!("💻️ Cashier page hook for order [{order_no}]");
    let outcome = api.open_order(&order_no).await?;
    let (order, payable) = match &outcome {
        OpenOutcome::Opened(o) | OpenOutcome::AlreadyOpen(o) => (o, true),
        OpenOutcome::Expired(o) | OpenOutcome::NotPayable(o) => (o, false),
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success(PaySummary::new(order, payable))))
}

//----------------------------------------------   Provider callback  -------------------------------------------------
route!(payment_callback => Post "/notify/payment" impl PaymentGatewayDatabase, FastStore, PaymentProvider);
/// Route handler for asynchronous payment confirmations from the provider.
///
/// Always answers HTTP 200 with the provider's `success`/`fail` tokens, so redelivery is driven
/// by the provider's retry policy rather than by transport errors. A failure here never carries
/// detail back to the caller; the reasons land in the logs.
pub async fn payment_callback<B: PaymentGatewayDatabase, F: FastStore, P: PaymentProvider>(
    req: HttpRequest,
    form: web::Form<HashMap<String, String>>,
    api: web::Data<OrderFlowApi<B, F>>,
    provider: web::Data<P>,
    config: web::Data<ServerConfig>,
) -> HttpResponse {
    trace!("💻️ Received provider payment callback");
    let params = form.into_inner();
    let ip = remote_ip_string(&req, config.use_x_forwarded_for, config.use_forwarded);
    let agent = user_agent(&req);
    match api.handle_payment_confirmation(provider.get_ref(), &params, ip.as_deref(), agent.as_deref()).await {
        Ok(WebhookOutcome::MarkedPaid(order)) => {
            info!("💻️ [{}] Callback marked order [{}] paid", order.trace_id, order.platform_order_no);
            HttpResponse::Ok().body("success")
        },
        Ok(WebhookOutcome::AlreadyPaid(order)) => {
            debug!("💻️ [{}] Redelivered callback for paid order [{}]", order.trace_id, order.platform_order_no);
            HttpResponse::Ok().body("success")
        },
        Ok(WebhookOutcome::Ignored) => {
            debug!("💻️ Callback carried a trade status we do not act on. Acknowledged it.");
            HttpResponse::Ok().body("success")
        },
        Err(e) => {
            warn!("💻️ Provider callback was not applied: {e}");
            HttpResponse::Ok().body("fail")
        },
    }
}

//----------------------------------------------   Admin: notifications  ----------------------------------------------
route!(resend_notification => Post "/notify/resend" impl PaymentGatewayDatabase, FastStore, NotifyTransport);
pub async fn resend_notification<B: PaymentGatewayDatabase, F: FastStore, T: NotifyTransport>(
    body: web::Json<OrderRef>,
    api: web::Data<NotifyApi<B, F>>,
    transport: web::Data<T>,
) -> Result<HttpResponse, ServerError> {
    let order_id = body.order_id;
    debug!("💻️ POST notification resend for order id {order_id}");
    let result = api.resend(transport.get_ref(), order_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with(describe_dispatch(&result), json!({ "order_id": order_id }))))
}

fn describe_dispatch(result: &NotifyDispatchResult) -> String {
    match result {
        NotifyDispatchResult::Delivered => "delivered".to_string(),
        NotifyDispatchResult::TimedOut => "the merchant endpoint did not answer".to_string(),
        NotifyDispatchResult::Rejected => "the merchant endpoint answered without acknowledging".to_string(),
        NotifyDispatchResult::Skipped(NotifySkipReason::NoUrl) => "the order has no notify url".to_string(),
        NotifyDispatchResult::Skipped(NotifySkipReason::AttemptCapReached) => {
            "skipped: the attempt cap was reached".to_string()
        },
        NotifyDispatchResult::Skipped(NotifySkipReason::CircuitOpen(until)) => {
            format!("skipped: the circuit is open until {until}")
        },
    }
}

route!(clear_circuit => Post "/notify/clear_circuit" impl PaymentGatewayDatabase, FastStore);
pub async fn clear_circuit<B: PaymentGatewayDatabase, F: FastStore>(
    body: web::Json<MerchantRef>,
    api: web::Data<NotifyApi<B, F>>,
) -> Result<HttpResponse, ServerError> {
    let merchant_id = body.merchant_id;
    info!("💻️ POST clear notification circuit for merchant {merchant_id}");
    api.clear_circuit(merchant_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with("circuit cleared", json!({ "merchant_id": merchant_id }))))
}

//----------------------------------------------   Admin: royalties  ----------------------------------------------
route!(retry_royalty => Post "/royalty/retry" impl PaymentGatewayDatabase, FastStore);
pub async fn retry_royalty<B: PaymentGatewayDatabase, F: FastStore>(
    req: HttpRequest,
    body: web::Json<OrderRef>,
    api: web::Data<RoyaltyApi<B, F>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    let order_id = body.order_id;
    info!("💻️ POST settlement retry for order id {order_id}");
    let ip = remote_ip_string(&req, config.use_x_forwarded_for, config.use_forwarded);
    api.retry(order_id, ip, user_agent(&req)).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with("settlement queued", json!({ "order_id": order_id }))))
}

route!(enqueue_royalty => Post "/royalty/enqueue" impl PaymentGatewayDatabase, FastStore);
pub async fn enqueue_royalty<B: PaymentGatewayDatabase, F: FastStore>(
    req: HttpRequest,
    body: web::Json<OrderRef>,
    api: web::Data<RoyaltyApi<B, F>>,
    config: web::Data<ServerConfig>,
) -> Result<HttpResponse, ServerError> {
    let order_id = body.order_id;
    info!("💻️ POST manual settlement for order id {order_id}");
    let ip = remote_ip_string(&req, config.use_x_forwarded_for, config.use_forwarded);
    api.enqueue_for_order(order_id, ip, user_agent(&req)).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with("settlement queued", json!({ "order_id": order_id }))))
}

route!(royalty_status => Get "/royalty/{order_id}" impl PaymentGatewayDatabase, FastStore);
pub async fn royalty_status<B: PaymentGatewayDatabase, F: FastStore>(
    path: web::Path<i64>,
    api: web::Data<RoyaltyApi<B, F>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET settlement status for order id {order_id}");
    let row = api.royalty_status(order_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(RoyaltyStatusResult::from(&row))))
}

//----------------------------------------------   Admin: orders  ----------------------------------------------
route!(refund_order => Post "/order/refund" impl PaymentGatewayDatabase, FastStore);
pub async fn refund_order<B: PaymentGatewayDatabase, F: FastStore>(
    body: web::Json<RefundRequest>,
    api: web::Data<OrderFlowApi<B, F>>,
) -> Result<HttpResponse, ServerError> {
    let order_no = OrderNo::from(body.platform_order_no.as_str());
    info!("💻️ POST refund marker for order [{order_no}]");
    let order = api.mark_order_refunded(&order_no).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with("order refunded", OrderStatusResult::from(&order))))
}

route!(search_orders => Get "/orders" impl PaymentGatewayDatabase, FastStore);
pub async fn search_orders<B: PaymentGatewayDatabase, F: FastStore>(
    query: web::Query<OrderSearchQuery>,
    api: web::Data<OrderFlowApi<B, F>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ GET order search");
    let filter = query.into_inner().into_filter()?;
    let orders = api.search_orders(filter).await?;
    let results = orders.iter().map(OrderStatusResult::from).collect::<Vec<_>>();
    Ok(HttpResponse::Ok().json(ApiResponse::success(results)))
}

fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers().get(header::USER_AGENT).and_then(|v| v.to_str().ok()).map(String::from)
}
