use actix_web::http::StatusCode;
use bay_payment_engine::{
    order_objects::CreateOrderRequest,
    test_utils::{seed::TEST_PRODUCT_CODE, ScriptedProvider},
};
use chrono::Duration;

use super::helpers::{get_path, json_body, new_gateway, order_form, post_form, signed_form};

#[actix_web::test]
async fn the_cashier_page_opens_an_order() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let form = signed_form(order_form("M-2001", "10.00"));
    let (_, body) = post_form("/order/create", &form, gw.merchant_routes(&provider)).await.expect("Request failed");
    let order_no = json_body(&body)["data"]["platform_order_no"].as_str().unwrap().to_string();

    let (status, body) =
        get_path(&format!("/pay/{order_no}"), None, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["data"]["payable"], true);
    assert_eq!(v["data"]["pay_status"], 4);
    assert_eq!(v["data"]["pay_status_name"], "Opened");

    // A refresh keeps the page payable without another state change.
    let (status, body) =
        get_path(&format!("/pay/{order_no}"), None, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["data"]["payable"], true);
}

#[actix_web::test]
async fn an_unknown_order_number_is_not_found() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let (status, body) =
        get_path("/pay/BY000000000000000000", None, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json_body(&body)["code"], 1);
}

// The order is stamped with its expiry at creation, so an order created with a zero lifetime is
// already due when the page is first opened.
#[actix_web::test]
async fn an_expired_order_is_closed_at_the_door() {
    let gw = new_gateway().await;
    let provider = ScriptedProvider::new();
    let request = CreateOrderRequest {
        merchant_order_no: "M-2002".to_string(),
        product_code: TEST_PRODUCT_CODE.to_string(),
        amount: "10.00".parse().unwrap(),
        subject_id: None,
        notify_url: None,
        return_url: None,
        client_ip: None,
    };
    let order = gw
        .order_api()
        .with_order_lifetime(Duration::zero())
        .create_order(&gw.tenancy.merchant, request)
        .await
        .expect("Error creating order");

    let path = format!("/pay/{}", order.platform_order_no);
    let (status, body) = get_path(&path, None, gw.merchant_routes(&provider)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let v = json_body(&body);
    assert_eq!(v["data"]["payable"], false);
    assert_eq!(v["data"]["pay_status"], 2);
    assert_eq!(v["data"]["pay_status_name"], "Closed");
}
