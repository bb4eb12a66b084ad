use std::collections::HashMap;

use actix_web::http::StatusCode;
use bay_payment_engine::test_utils::ScriptedProvider;

use super::helpers::{json_body, new_gateway, order_form, post_form, signed_form, TestGateway};

async fn created_order_no(gw: &TestGateway, provider: &ScriptedProvider, merchant_order_no: &str) -> String {
    let form = signed_form(order_form(merchant_order_no, "25.00"));
    let (_, body) = post_form("/order/create", &form, gw.merchant_routes(provider)).await.expect("Request failed");
    json_body(&body)["data"]["platform_order_no"].as_str().expect("No platform order number").to_string()
}

fn confirmation(order_no: &str, trade_no: &str, amount: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    params.insert("out_trade_no".to_string(), order_no.to_string());
    params.insert("trade_no".to_string(), trade_no.to_string());
    params.insert("trade_status".to_string(), "TRADE_SUCCESS".to_string());
    params.insert("total_amount".to_string(), amount.to_string());
    params.insert("gmt_payment".to_string(), "2024-06-01 12:30:45".to_string());
    params.insert("sign".to_string(), "AA00".to_string());
    params
}

#[actix_web::test]
async fn a_verified_callback_marks_the_order_paid() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let order_no = created_order_no(&gw, &provider, "M-3001").await;

    let params = confirmation(&order_no, "T-301", "25.00");
    let (status, body) =
        post_form("/notify/payment", &params, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "success");

    let mut query = HashMap::new();
    query.insert("merchant_order_no".to_string(), "M-3001".to_string());
    let query = signed_form(query);
    let (_, body) = post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    let v = json_body(&body);
    assert_eq!(v["data"]["pay_status"], 1);
    assert_eq!(v["data"]["pay_status_name"], "Paid");
    assert_eq!(v["data"]["trade_no"], "T-301");
}

#[actix_web::test]
async fn a_replayed_callback_is_acknowledged_without_side_effects() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let order_no = created_order_no(&gw, &provider, "M-3002").await;

    let params = confirmation(&order_no, "T-302", "25.00");
    let (_, body) = post_form("/notify/payment", &params, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(body, "success");
    let (status, body) =
        post_form("/notify/payment", &params, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "success");

    let mut query = HashMap::new();
    query.insert("merchant_order_no".to_string(), "M-3002".to_string());
    let query = signed_form(query);
    let (_, body) = post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(json_body(&body)["data"]["pay_status"], 1);
}

#[actix_web::test]
async fn an_unverifiable_callback_answers_fail() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let order_no = created_order_no(&gw, &provider, "M-3003").await;
    provider.reject_callbacks();

    let params = confirmation(&order_no, "T-303", "25.00");
    let (status, body) =
        post_form("/notify/payment", &params, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "fail");
}

#[actix_web::test]
async fn a_pending_status_is_acknowledged_and_ignored() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let order_no = created_order_no(&gw, &provider, "M-3004").await;

    let mut params = confirmation(&order_no, "T-304", "25.00");
    params.insert("trade_status".to_string(), "WAIT_BUYER_PAY".to_string());
    let (_, body) = post_form("/notify/payment", &params, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(body, "success");

    let mut query = HashMap::new();
    query.insert("merchant_order_no".to_string(), "M-3004".to_string());
    let query = signed_form(query);
    let (_, body) = post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(json_body(&body)["data"]["pay_status"], 0);
}

#[actix_web::test]
async fn an_amount_mismatch_answers_fail() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let order_no = created_order_no(&gw, &provider, "M-3005").await;

    let params = confirmation(&order_no, "T-305", "999.00");
    let (_, body) = post_form("/notify/payment", &params, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(body, "fail");

    let mut query = HashMap::new();
    query.insert("merchant_order_no".to_string(), "M-3005".to_string());
    let query = signed_form(query);
    let (_, body) = post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(json_body(&body)["data"]["pay_status"], 0);
}
