use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use parking_lot::Mutex;
use qris_gateway::app::config::{Config, MerchantProfile};
use qris_gateway::error::GatewayError;
use qris_gateway::handlers;
use qris_gateway::models::api::{AUTH_TOKEN_PATH, QR_CREATE_PATH, QR_STATUS_PATH};
use qris_gateway::models::payment::PaymentStatus;
use qris_gateway::services::{
    GatewayClient, InMemoryPaymentStore, PaymentService, PaymentStore, PollPolicy, SignatureCodec,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const CLIENT_ID: &str = "merchant-client";
const CLIENT_SECRET: &str = "merchant-secret";

/// Scriptable stand-in for the bank.
struct FakeBank {
    token_calls: AtomicU32,
    create_calls: AtomicU32,
    status_calls: AtomicU32,
    bad_token_signatures: AtomicU32,
    expires_in: Mutex<Value>,
    /// One-shot replies for the create endpoint, used before the default one.
    create_replies: Mutex<VecDeque<(StatusCode, Value)>>,
    bearers: Mutex<Vec<String>>,
    status_codes: Mutex<Vec<&'static str>>,
}

impl FakeBank {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            token_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            bad_token_signatures: AtomicU32::new(0),
            expires_in: Mutex::new(json!("900")),
            create_replies: Mutex::new(VecDeque::new()),
            bearers: Mutex::new(Vec::new()),
            status_codes: Mutex::new(vec!["00"]),
        })
    }

    fn push_create_reply(&self, status: StatusCode, body: Value) {
        self.create_replies.lock().push_back((status, body));
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn token(State(bank): State<Arc<FakeBank>>, headers: HeaderMap) -> Json<Value> {
    let n = bank.token_calls.fetch_add(1, Ordering::SeqCst) + 1;

    let string_to_sign = format!(
        "{}|{}",
        header(&headers, "X-CLIENT-KEY"),
        header(&headers, "X-TIMESTAMP")
    );
    if !SignatureCodec::verify_base64(
        string_to_sign.as_bytes(),
        &header(&headers, "X-SIGNATURE"),
        CLIENT_SECRET.as_bytes(),
    ) {
        bank.bad_token_signatures.fetch_add(1, Ordering::SeqCst);
    }

    // Janela larga para os chamadores concorrentes se acumularem
    tokio::time::sleep(Duration::from_millis(100)).await;
    let expires_in = bank.expires_in.lock().clone();
    Json(json!({ "accessToken": format!("tok-{}", n), "expiresIn": expires_in }))
}

async fn create(State(bank): State<Arc<FakeBank>>, headers: HeaderMap, body: Bytes) -> Response {
    bank.create_calls.fetch_add(1, Ordering::SeqCst);
    bank.bearers.lock().push(header(&headers, "Authorization"));

    let request: Value = serde_json::from_slice(&body).unwrap_or_default();
    assert_eq!(request["amount"]["currency"], "IDR");

    if let Some((status, reply)) = bank.create_replies.lock().pop_front() {
        return (status, Json(reply)).into_response();
    }

    let reference = request["partnerReferenceNo"].as_str().unwrap_or_default();
    Json(json!({
        "qrContent": format!("00020101021226670016COM.EXAMPLE{}", reference),
        "qrId": format!("QR-{}", reference),
    }))
    .into_response()
}

async fn status(State(bank): State<Arc<FakeBank>>) -> Json<Value> {
    let call = bank.status_calls.fetch_add(1, Ordering::SeqCst) as usize;
    let code = {
        let codes = bank.status_codes.lock();
        codes.get(call).or(codes.last()).copied().unwrap_or("03")
    };
    Json(json!({
        "transactionStatusCode": code,
        "transactionDate": "2024-05-01T10:15:00+07:00",
        "referenceNo": "TRX-900",
        "amount": { "value": "10000.00" },
    }))
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn start_bank() -> (Arc<FakeBank>, SocketAddr) {
    let bank = FakeBank::new();
    let app = Router::new()
        .route(AUTH_TOKEN_PATH, post(token))
        .route(QR_CREATE_PATH, post(create))
        .route(QR_STATUS_PATH, post(status))
        .with_state(bank.clone());
    (bank, spawn(app).await)
}

fn config_for(addr: SocketAddr) -> Config {
    Config {
        base_url: Some(format!("http://{}/", addr)),
        client_id: CLIENT_ID.into(),
        client_secret: CLIENT_SECRET.into(),
        merchant: MerchantProfile {
            nmid: "ID1020304050".into(),
            name: "Toko Online".into(),
            city: "Jakarta".into(),
        },
        http_timeout_secs: 5,
        ..Config::default()
    }
}

fn service_for(addr: SocketAddr) -> (Arc<PaymentService>, Arc<InMemoryPaymentStore>) {
    let store = Arc::new(InMemoryPaymentStore::new());
    let gateway = GatewayClient::from_config(Arc::new(config_for(addr)), store.clone()).unwrap();
    (Arc::new(PaymentService::new(Arc::new(gateway))), store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_share_one_token_request() {
    let (bank, addr) = start_bank().await;
    let (service, store) = service_for(addr);

    let mut handles = Vec::new();
    for i in 0..10 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .create_payment(dec!(10000), &format!("ORDER-{}", i), None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(bank.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(bank.bad_token_signatures.load(Ordering::SeqCst), 0);
    assert_eq!(bank.create_calls.load(Ordering::SeqCst), 10);
    assert_eq!(store.len(), 10);
    assert_eq!(service.metrics().created, 10);
}

#[tokio::test]
async fn create_then_status_completes_payment() {
    let (bank, addr) = start_bank().await;
    let (service, store) = service_for(addr);

    let record = service
        .create_payment(dec!(10000), "ORDER-RT", Some("https://merchant.test/callback"))
        .await
        .unwrap();
    assert_eq!(record.qr_id, "QR-ORDER-RT");
    assert_eq!(record.status, PaymentStatus::Pending);
    assert!(record.qr_image_url.contains("create-qr-code"));

    let outcome = service.refresh_status("QR-ORDER-RT").await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.record.status, PaymentStatus::Completed);
    assert_eq!(outcome.record.transaction_id.as_deref(), Some("TRX-900"));
    assert!(outcome.record.paid_at.is_some());

    // Terminal: answered locally
    let again = service.refresh_status("QR-ORDER-RT").await.unwrap();
    assert!(!again.changed);
    assert_eq!(bank.status_calls.load(Ordering::SeqCst), 1);

    let stored = store.find_by_reference("ORDER-RT").await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn poll_stops_when_bank_reports_expiry() {
    let (bank, addr) = start_bank().await;
    *bank.status_codes.lock() = vec!["03", "03", "05"];
    let (service, _store) = service_for(addr);

    service
        .create_payment(dec!(5000), "ORDER-POLL", None)
        .await
        .unwrap();

    let record = service
        .poll(
            "QR-ORDER-POLL",
            PollPolicy::new(10, Duration::from_millis(10)),
            None,
        )
        .await
        .unwrap();

    assert_eq!(record.status, PaymentStatus::Expired);
    assert_eq!(bank.status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.metrics().expired, 1);
}

#[tokio::test]
async fn missing_qr_content_is_malformed() {
    let (bank, addr) = start_bank().await;
    bank.push_create_reply(StatusCode::OK, json!({ "qrId": "QR-002" }));
    let (service, store) = service_for(addr);

    let err = service
        .create_payment(dec!(10000), "ORDER-M", None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::MalformedResponse(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn remote_rejection_carries_status_and_body() {
    let (bank, addr) = start_bank().await;
    bank.push_create_reply(
        StatusCode::BAD_REQUEST,
        json!({ "responseMessage": "Invalid Field Format" }),
    );
    let (service, _store) = service_for(addr);

    let err = service
        .create_payment(dec!(10000), "ORDER-R", None)
        .await
        .unwrap_err();

    match err {
        GatewayError::Remote { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("Invalid Field Format"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn remote_unauthorized_forces_new_token() {
    let (bank, addr) = start_bank().await;
    bank.push_create_reply(
        StatusCode::UNAUTHORIZED,
        json!({ "responseMessage": "Access Token Invalid" }),
    );
    let (service, _store) = service_for(addr);

    let err = service
        .create_payment(dec!(10000), "ORDER-401", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Remote { status: 401, .. }));
    assert!(service
        .gateway()
        .tokens()
        .peek(&service.gateway().config().credential())
        .is_none());

    service
        .create_payment(dec!(10000), "ORDER-401", None)
        .await
        .unwrap();

    assert_eq!(bank.token_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        *bank.bearers.lock(),
        vec!["Bearer tok-1".to_string(), "Bearer tok-2".to_string()]
    );
}

#[tokio::test]
async fn out_of_range_token_lifetime_is_malformed() {
    for expires_in in [json!(i64::MAX), json!(-60), json!("0")] {
        let (bank, addr) = start_bank().await;
        *bank.expires_in.lock() = expires_in.clone();
        let (service, store) = service_for(addr);

        // Twice: the failure must not stick to the credential's cache slot
        for attempt in 1..=2u32 {
            let err = service
                .create_payment(dec!(10000), "ORDER-TTL", None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, GatewayError::MalformedResponse(_)),
                "expiresIn {} attempt {}: {:?}",
                expires_in,
                attempt,
                err
            );
            assert_eq!(bank.token_calls.load(Ordering::SeqCst), attempt);
        }

        assert_eq!(bank.create_calls.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());

        // Once the bank behaves again the same credential recovers
        *bank.expires_in.lock() = json!(900);
        service
            .create_payment(dec!(10000), "ORDER-TTL", None)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn webhook_route_verifies_and_applies() {
    let (_bank, addr) = start_bank().await;
    let (service, _store) = service_for(addr);
    service
        .create_payment(dec!(10000), "ORDER-W", None)
        .await
        .unwrap();

    let router_addr = spawn(handlers::router(service.clone())).await;
    let url = format!("http://{}/qris/webhook", router_addr);
    let client = reqwest::Client::new();

    let body = r#"{"qrId":"QR-ORDER-W","transactionStatusCode":"00","referenceNo":"TRX-1"}"#;
    let signature = SignatureCodec::sign_hex(body.as_bytes(), CLIENT_SECRET.as_bytes());

    let rejected = client
        .post(&url)
        .header("X-Signature", "00".repeat(32))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), reqwest::StatusCode::UNAUTHORIZED);

    let accepted = client
        .post(&url)
        .header("X-Signature", &signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), reqwest::StatusCode::OK);
    let reply: Value = accepted.json().await.unwrap();
    assert_eq!(reply["status"], "COMPLETED");
    assert_eq!(reply["changed"], true);

    let unknown = r#"{"qrId":"QR-404","transactionStatusCode":"00"}"#;
    let missing = client
        .post(&url)
        .header(
            "X-Signature",
            SignatureCodec::sign_hex(unknown.as_bytes(), CLIENT_SECRET.as_bytes()),
        )
        .body(unknown)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let metrics: Value = client
        .get(format!("http://{}/metrics", router_addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["completed"], 1);
    assert_eq!(metrics["webhooks_rejected"], 2);
}

#[tokio::test]
async fn create_route_rejects_bad_amounts() {
    let (bank, addr) = start_bank().await;
    let (service, _store) = service_for(addr);
    let router_addr = spawn(handlers::router(service)).await;
    let client = reqwest::Client::new();

    for amount in ["-5", "0.001"] {
        let response = client
            .post(format!("http://{}/qris", router_addr))
            .json(&json!({ "amount": amount, "reference": "ORDER-BAD" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let reply: Value = response.json().await.unwrap();
        assert_eq!(reply["success"], false);
    }
    assert_eq!(bank.create_calls.load(Ordering::SeqCst), 0);
}
