use axum::{body::Body, http::{Request, StatusCode}};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use super::harness::{TestHarness, callback_request, decode_json, json_request};

#[tokio::test]
async fn web_admin_s1_metrics_report_traffic() {
    let harness = TestHarness::setup();

    for text in ["", "4"] {
        harness
            .router
            .clone()
            .oneshot(callback_request(&[
                ("sessionId", "adm-1"),
                ("phoneNumber", "+254720400001"),
                ("text", text),
                ("serviceCode", "*384#"),
            ]))
            .await
            .expect("callback");
    }

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ussd/metrics")
                .body(Body::empty())
                .expect("metrics request"),
        )
        .await
        .expect("metrics response");
    assert_eq!(response.status(), StatusCode::OK);

    let metrics: Value = decode_json(response).await;
    assert_eq!(metrics["active_sessions"], json!(1));
    assert_eq!(metrics["transactions_last_hour"], json!(2));
    assert_eq!(metrics["errors_last_hour"], json!(0));
}

#[tokio::test]
async fn web_admin_s2_session_listing_shows_active_paths() {
    let harness = TestHarness::setup();

    for text in ["", "2", "2*3"] {
        harness
            .router
            .clone()
            .oneshot(callback_request(&[
                ("sessionId", "adm-2"),
                ("phoneNumber", "+254720400002"),
                ("text", text),
                ("serviceCode", "*384#"),
            ]))
            .await
            .expect("callback");
    }

    let response = harness
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ussd/sessions")
                .body(Body::empty())
                .expect("sessions request"),
        )
        .await
        .expect("sessions response");
    assert_eq!(response.status(), StatusCode::OK);

    let listing: Value = decode_json(response).await;
    let sessions = listing["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], json!("adm-2"));
    assert_eq!(sessions[0]["input_path"], json!("2*3"));
}

#[tokio::test]
async fn web_admin_s3_otp_send_then_register_links_the_phone() {
    let harness = TestHarness::setup();

    let send = harness
        .router
        .clone()
        .oneshot(json_request(
            "/ussd/otp/send",
            json!({"phone": "+254720400003", "user_id": 91}),
        ))
        .await
        .expect("send response");
    assert_eq!(send.status(), StatusCode::OK);

    let sent = harness.last_sms().expect("otp sms");
    let code: String = sent.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
    assert_eq!(code.len(), 4);

    let wrong = if code == "0000" { "1111" } else { "0000" };
    let rejected = harness
        .router
        .clone()
        .oneshot(json_request(
            "/ussd/register",
            json!({"phone": "+254720400003", "otp": wrong}),
        ))
        .await
        .expect("rejected response");
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let linked = harness
        .router
        .clone()
        .oneshot(json_request(
            "/ussd/register",
            json!({"phone": "+254720400003", "otp": code}),
        ))
        .await
        .expect("linked response");
    assert_eq!(linked.status(), StatusCode::OK);

    let body: Value = decode_json(linked).await;
    assert_eq!(body["status"], json!("linked"));
    assert_eq!(
        harness
            .state
            .handler
            .store()
            .linked_user_for("+254720400003")
            .expect("lookup"),
        Some(91)
    );
}

#[tokio::test]
async fn web_admin_s4_register_with_unknown_phone_is_rejected() {
    let harness = TestHarness::setup();

    let response = harness
        .router
        .clone()
        .oneshot(json_request(
            "/ussd/register",
            json!({"phone": "+254720400004", "otp": "1234"}),
        ))
        .await
        .expect("register response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = decode_json(response).await;
    assert_eq!(body["status"], json!("rejected"));
}
