use actix_web::{http::StatusCode, test, test::TestRequest, App};
use bay_payment_engine::{
    db_types::{Order, PaymentConfirmation},
    order_objects::CreateOrderRequest,
    royalty_api::ROYALTY_QUEUE_KEY,
    test_utils::{seed::TEST_PRODUCT_CODE, RecordingTransport},
    traits::PaymentGatewayDatabase,
};
use bpg_common::Secret;
use chrono::Utc;
use serde_json::json;

use super::helpers::{admin_post, get_path, json_body, new_gateway, TestGateway, OPERATOR_TOKEN};
use crate::middleware::ADMIN_TOKEN_HEADER;

async fn created_order(gw: &TestGateway, merchant_order_no: &str, subject_id: Option<i64>) -> Order {
    created_order_of(gw, merchant_order_no, subject_id, "80.00").await
}

async fn created_order_of(gw: &TestGateway, merchant_order_no: &str, subject_id: Option<i64>, amount: &str) -> Order {
    let request = CreateOrderRequest {
        merchant_order_no: merchant_order_no.to_string(),
        product_code: TEST_PRODUCT_CODE.to_string(),
        amount: amount.parse().unwrap(),
        subject_id,
        notify_url: None,
        return_url: None,
        client_ip: None,
    };
    gw.order_api().create_order(&gw.tenancy.merchant, request).await.expect("Error creating order")
}

async fn paid_order(gw: &TestGateway, merchant_order_no: &str, subject_id: Option<i64>) -> Order {
    let order = created_order(gw, merchant_order_no, subject_id).await;
    let confirmation = PaymentConfirmation {
        platform_order_no: order.platform_order_no.clone(),
        trade_no: format!("T-{merchant_order_no}"),
        amount: order.amount,
        paid_at: Utc::now(),
        buyer_id: None,
    };
    let (order, newly_paid) = gw.db.mark_order_paid(&confirmation).await.expect("Error marking the order paid");
    assert!(newly_paid);
    order
}

#[actix_web::test]
async fn admin_requests_need_the_operator_token() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let err = admin_post("/admin/notify/clear_circuit", json!({ "merchant_id": 1 }), None, gw.admin_routes(&transport))
        .await
        .expect_err("The request should have been rejected");
    assert_eq!(err.to_string(), "No operator token found.");
}

#[actix_web::test]
async fn a_wrong_operator_token_is_rejected() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let err = admin_post(
        "/admin/notify/clear_circuit",
        json!({ "merchant_id": 1 }),
        Some("not-the-token"),
        gw.admin_routes(&transport),
    )
    .await
    .expect_err("The request should have been rejected");
    assert_eq!(err.to_string(), "Invalid operator token.");
}

#[actix_web::test]
async fn an_unconfigured_token_locks_the_admin_scope() {
    let mut gw = new_gateway().await;
    gw.config.admin.token = Secret::new(String::new());
    let transport = RecordingTransport::new();
    let err = admin_post(
        "/admin/notify/clear_circuit",
        json!({ "merchant_id": 1 }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect_err("The request should have been rejected");
    assert_eq!(err.to_string(), "Admin access is not configured.");
}

#[actix_web::test]
async fn the_ip_whitelist_gates_admin_requests() {
    let mut gw = new_gateway().await;
    gw.config.admin.whitelist = Some(vec!["192.0.2.7".parse().unwrap()]);
    let transport = RecordingTransport::new();

    // No discernible peer address at all: rejected.
    let err = admin_post(
        "/admin/notify/clear_circuit",
        json!({ "merchant_id": 1 }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect_err("The request should have been rejected");
    assert_eq!(err.to_string(), "Access denied.");

    // A whitelisted peer gets through the middleware and reaches the handler.
    let service = test::init_service(App::new().configure(gw.admin_routes(&transport))).await;
    let req = TestRequest::post()
        .uri("/admin/notify/clear_circuit")
        .peer_addr("192.0.2.7:40000".parse().unwrap())
        .insert_header((ADMIN_TOKEN_HEADER, OPERATOR_TOKEN))
        .set_json(json!({ "merchant_id": gw.tenancy.merchant.id }))
        .to_request();
    let res = test::try_call_service(&service, req).await.expect("The request should have been allowed");
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn resend_dispatches_a_notification() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let order = paid_order(&gw, "A-5001", None).await;

    let (status, body) = admin_post(
        "/admin/notify/resend",
        json!({ "order_id": order.id }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["code"], 0);
    assert_eq!(v["message"], "delivered");
    assert_eq!(transport.delivery_count(), 1);
    assert_eq!(transport.deliveries()[0].0, "https://merchant.test/notify");
}

#[actix_web::test]
async fn resend_for_an_unknown_order_is_not_found() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let (status, body) =
        admin_post("/admin/notify/resend", json!({ "order_id": 99999 }), Some(OPERATOR_TOKEN), gw.admin_routes(&transport))
            .await
            .expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["code"], 1);
}

#[actix_web::test]
async fn clear_circuit_answers_ok() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let (status, body) = admin_post(
        "/admin/notify/clear_circuit",
        json!({ "merchant_id": gw.tenancy.merchant.id }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["message"], "circuit cleared");
}

#[actix_web::test]
async fn a_manual_settlement_can_be_queued() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let order = paid_order(&gw, "A-5002", Some(gw.tenancy.single_subject.id)).await;

    let (status, body) = admin_post(
        "/admin/royalty/enqueue",
        json!({ "order_id": order.id }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["message"], "settlement queued");
    assert_eq!(gw.store.queue_snapshot(ROYALTY_QUEUE_KEY).len(), 1);
}

#[actix_web::test]
async fn retry_needs_a_failed_settlement() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let order = paid_order(&gw, "A-5003", Some(gw.tenancy.single_subject.id)).await;

    let (status, body) = admin_post(
        "/admin/royalty/retry",
        json!({ "order_id": order.id }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["code"], 1);
}

#[actix_web::test]
async fn royalty_status_for_an_unsettled_order_is_not_found() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let (status, body) =
        get_path("/admin/royalty/424242", Some(OPERATOR_TOKEN), gw.admin_routes(&transport)).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["code"], 1);
}

#[actix_web::test]
async fn refund_marks_a_paid_order() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let order = paid_order(&gw, "A-5004", None).await;

    let (status, body) = admin_post(
        "/admin/order/refund",
        json!({ "platform_order_no": order.platform_order_no.as_str() }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["message"], "order refunded");
    assert_eq!(v["data"]["pay_status"], 3);
    assert_eq!(v["data"]["pay_status_name"], "Refunded");
}

#[actix_web::test]
async fn an_unpaid_order_cannot_be_refunded() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let order = created_order(&gw, "A-5005", None).await;

    let (status, body) = admin_post(
        "/admin/order/refund",
        json!({ "platform_order_no": order.platform_order_no.as_str() }),
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(&body)["code"], 1);
}

#[actix_web::test]
async fn search_filters_orders() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let _open = created_order(&gw, "A-5006", None).await;
    let _paid = paid_order(&gw, "A-5007", None).await;

    let (status, body) =
        get_path("/admin/orders", Some(OPERATOR_TOKEN), gw.admin_routes(&transport)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["data"].as_array().unwrap().len(), 2);

    let (_, body) = get_path("/admin/orders?pay_status=Paid", Some(OPERATOR_TOKEN), gw.admin_routes(&transport))
        .await
        .expect("Request failed");
    let v = json_body(&body);
    let rows = v["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["merchant_order_no"], "A-5007");
    assert_eq!(rows[0]["pay_status"], 1);

    let (_, body) = get_path("/admin/orders?merchant_order_no=A-5006", Some(OPERATOR_TOKEN), gw.admin_routes(&transport))
        .await
        .expect("Request failed");
    assert_eq!(json_body(&body)["data"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn search_bounds_by_amount_and_pages() {
    let gw = new_gateway().await;
    let transport = RecordingTransport::new();
    let _small = created_order_of(&gw, "A-5008", None, "10.00").await;
    let _medium = created_order_of(&gw, "A-5009", None, "50.00").await;
    let _large = created_order_of(&gw, "A-5010", None, "90.00").await;

    let (status, body) = get_path(
        "/admin/orders?min_amount=20.00&max_amount=60.00",
        Some(OPERATOR_TOKEN),
        gw.admin_routes(&transport),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    let rows = v["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["merchant_order_no"], "A-5009");

    // Pages come in creation order, so limit/offset walks them oldest first.
    let (_, body) =
        get_path("/admin/orders?limit=2", Some(OPERATOR_TOKEN), gw.admin_routes(&transport)).await.expect("Request failed");
    assert_eq!(json_body(&body)["data"].as_array().unwrap().len(), 2);
    let (_, body) = get_path("/admin/orders?limit=2&offset=2", Some(OPERATOR_TOKEN), gw.admin_routes(&transport))
        .await
        .expect("Request failed");
    let v = json_body(&body);
    let rows = v["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["merchant_order_no"], "A-5010");

    let (status, body) =
        get_path("/admin/orders?min_amount=banana", Some(OPERATOR_TOKEN), gw.admin_routes(&transport))
            .await
            .expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], 1);

    let (status, _) =
        get_path("/admin/orders?limit=0", Some(OPERATOR_TOKEN), gw.admin_routes(&transport)).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
