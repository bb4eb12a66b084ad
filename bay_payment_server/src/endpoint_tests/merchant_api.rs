use std::collections::HashMap;

use actix_web::http::StatusCode;
use bay_payment_engine::{
    db_types::OrderNo,
    test_utils::{
        seed::{BARE_API_KEY, BARE_API_SECRET},
        ScriptedProvider,
    },
    traits::ProviderOrderStatus,
};
use bpg_common::signature::{self, SignAlgo};
use chrono::Utc;

use super::helpers::{json_body, new_gateway, order_form, post_form, signed_form};

#[actix_web::test]
async fn create_order_issues_a_payable_order() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-1001", "25.00"));
    let (status, body) =
        post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["code"], 0);
    let order_no = v["data"]["platform_order_no"].as_str().expect("No platform order number in the response");
    assert!(order_no.starts_with("BY"));
    assert_eq!(v["data"]["merchant_order_no"], "M-1001");
    assert_eq!(v["data"]["amount"], "25.00");
    assert_eq!(v["data"]["payment_url"], format!("https://pay.test/pay/{order_no}"));
}

#[actix_web::test]
async fn create_rejects_a_tampered_signature() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let mut form = signed_form(order_form("M-1002", "25.00"));
    form.insert("amount".to_string(), "1.00".to_string());
    let (status, body) =
        post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let v = json_body(&body);
    assert_eq!(v["code"], 1);
    assert_eq!(v["message"], "Invalid api key or merchant disabled");
}

#[actix_web::test]
async fn create_rejects_an_unknown_api_key() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let mut form = order_form("M-1003", "25.00");
    form.insert("api_key".to_string(), "key_live_00000000".to_string());
    form.insert("sign".to_string(), "0".repeat(32));
    let (status, body) =
        post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["message"], "Invalid api key or merchant disabled");
}

#[actix_web::test]
async fn create_requires_an_amount() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let mut form = order_form("M-1004", "25.00");
    form.remove("amount");
    let form = signed_form(form);
    let (status, body) =
        post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v = json_body(&body);
    assert_eq!(v["code"], 1);
    assert_eq!(v["message"], "amount is required");
}

#[actix_web::test]
async fn a_reused_merchant_order_no_conflicts() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-1005", "25.00"));
    let (status, _) = post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let (status, body) =
        post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body)["code"], 1);
}

#[actix_web::test]
async fn query_round_trips_an_order() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-1006", "42.50"));
    let (_, body) = post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    let order_no = json_body(&body)["data"]["platform_order_no"].as_str().unwrap().to_string();

    let mut query = HashMap::new();
    query.insert("merchant_order_no".to_string(), "M-1006".to_string());
    let query = signed_form(query);
    let (status, body) =
        post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["data"]["platform_order_no"], order_no.as_str());
    assert_eq!(v["data"]["amount"], "42.50");
    assert_eq!(v["data"]["pay_status"], 0);
    assert_eq!(v["data"]["pay_status_name"], "Created");
    assert!(v["data"]["id"].as_i64().unwrap() > 0);
}

#[actix_web::test]
async fn query_for_an_unknown_order_is_not_found() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let mut query = HashMap::new();
    query.insert("merchant_order_no".to_string(), "M-0000".to_string());
    let query = signed_form(query);
    let (status, body) =
        post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["code"], 1);
}

// A merchant can never see another merchant's order, even with a valid reference.
#[actix_web::test]
async fn orders_are_scoped_to_the_authenticated_merchant() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-1007", "25.00"));
    let (_, body) = post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    let order_no = json_body(&body)["data"]["platform_order_no"].as_str().unwrap().to_string();

    let mut query = HashMap::new();
    query.insert("platform_order_no".to_string(), order_no);
    query.insert("api_key".to_string(), BARE_API_KEY.to_string());
    let sign = signature::sign(&query, BARE_API_SECRET, SignAlgo::Md5);
    query.insert("sign".to_string(), sign);
    let (status, _) = post_form("/order/query", &query, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn close_closes_an_unpaid_order() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-1008", "25.00"));
    let (_, _) = post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");

    let mut close = HashMap::new();
    close.insert("merchant_order_no".to_string(), "M-1008".to_string());
    let close = signed_form(close);
    let (status, body) =
        post_form("/order/close", &close, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["message"], "order closed");
    assert_eq!(v["data"]["pay_status"], 2);
}

#[actix_web::test]
async fn close_lands_a_payment_the_webhook_missed() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-1009", "25.00"));
    let (_, body) = post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    let order_no = OrderNo::from(json_body(&body)["data"]["platform_order_no"].as_str().unwrap());
    provider.script_order_status(&order_no, ProviderOrderStatus::Paid {
        trade_no: "T-20240601-77".to_string(),
        amount: "25.00".parse().unwrap(),
        paid_at: Utc::now(),
        buyer_id: None,
    });

    let mut close = HashMap::new();
    close.insert("merchant_order_no".to_string(), "M-1009".to_string());
    let close = signed_form(close);
    let (status, body) =
        post_form("/order/close", &close, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["message"], "order already paid");
    assert_eq!(v["data"]["pay_status"], 1);
    assert_eq!(v["data"]["trade_no"], "T-20240601-77");
}
