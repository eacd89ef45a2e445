//! Full engine scenarios: HTTP in, workers applying, HTTP out. Runs
//! against the in-memory stores with a mocked provider backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

use slika::adapters::memory::{InMemoryEventLedger, InMemoryTokenStore, InMemoryTransactionStore};
use slika::adapters::{FixedRateSource, LogNotifier};
use slika::config::{AllowedIps, ProviderSettings};
use slika::domain::{CardToken, EventStatus, Sealed, TokenMaterial};
use slika::ports::{EventLedger, Notifier, RateSource, TokenStore, TransactionStore};
use slika::providers::build_registry;
use slika::services::{ApplyPolicy, EventQueue, Reconciler, SessionInitiator, WebhookGateway};
use slika::{create_app, AppState};

const ADMIN_KEY: &str = "test-admin-key";

struct Harness {
    base_url: String,
    client: reqwest::Client,
    provider: mockito::ServerGuard,
    events: Arc<dyn EventLedger>,
    tokens: Arc<dyn TokenStore>,
}

async fn boot() -> Harness {
    let provider = mockito::Server::new_async().await;

    let transactions: Arc<dyn TransactionStore> = Arc::new(InMemoryTransactionStore::new());
    let events: Arc<dyn EventLedger> = Arc::new(InMemoryEventLedger::new());
    let tokens: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let rates: Arc<dyn RateSource> = Arc::new(FixedRateSource::new());

    let settings = ProviderSettings {
        name: "cardcom".to_string(),
        base_url: provider.url(),
        credentials: Sealed::new(r#"{"terminal":"1000","username":"api-user"}"#),
        webhook_secret: None,
        settlement_currency: None,
    };
    let registry = Arc::new(build_registry(&[settings], 5).unwrap());

    let (queue, receivers) = EventQueue::new(2);
    let gateway = Arc::new(WebhookGateway::new(
        Arc::clone(&registry),
        Arc::clone(&events),
        queue.clone(),
        None,
    ));
    let initiator = Arc::new(SessionInitiator::new(
        Arc::clone(&transactions),
        Arc::clone(&tokens),
        Arc::clone(&registry),
        rates,
        Arc::clone(&notifier),
        "http://gateway.test".to_string(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&transactions),
        Arc::clone(&events),
        Arc::clone(&tokens),
        Arc::clone(&registry),
        Arc::clone(&notifier),
        queue.clone(),
        ApplyPolicy {
            max_attempts: 3,
            backoff_base_ms: 10,
        },
    ));
    reconciler.spawn_workers(receivers);

    let state = AppState {
        db: None,
        transactions,
        events: Arc::clone(&events),
        tokens: Arc::clone(&tokens),
        registry,
        gateway,
        initiator,
        queue,
        admin_api_key: Some(Sealed::new(ADMIN_KEY)),
    };
    let app = create_app(state, AllowedIps::Any, 0);

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    Harness {
        base_url,
        client: reqwest::Client::new(),
        provider,
        events,
        tokens,
    }
}

fn session_payload() -> Value {
    json!({
        "provider": "cardcom",
        "amount": "100.50",
        "currency": "ILS",
        "customer_name": "Dana Levi",
        "customer_email": "dana@example.com",
        "user_ref": "user-77",
        "description": "Annual plan",
        "success_url": "https://shop.example.com/ok",
        "failure_url": "https://shop.example.com/fail",
        "request_token_creation": true
    })
}

async fn create_hosted_session(h: &mut Harness) -> String {
    let _session_mock = h
        .provider
        .mock("POST", "/Interface/LowProfile.aspx")
        .with_status(200)
        .with_body("ResponseCode=0&Description=OK&LowProfileCode=lp-1&url=https%3A%2F%2Fsecure.cardcom.example%2Fpage%2Flp-1")
        .create_async()
        .await;

    let res = h
        .client
        .post(format!("{}/sessions", h.base_url))
        .json(&session_payload())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["action"], "redirect");
    body["transaction_id"].as_str().unwrap().to_string()
}

async fn post_callback(h: &Harness, body: String) -> (StatusCode, Value) {
    let res = h
        .client
        .post(format!("{}/webhooks/cardcom", h.base_url))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await
        .unwrap();
    let status = res.status();
    let body: Value = res.json().await.unwrap();
    (status, body)
}

async fn wait_for_status(h: &Harness, tx_id: &str, expected: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let body: Value = h
            .client
            .get(format!("{}/transactions/{}", h.base_url, tx_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["transaction"]["status"] == expected {
            return body;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "transaction never reached {}, last seen: {}",
                expected, body
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn hosted_session_settles_through_callback() {
    let mut h = boot().await;
    let tx_id = create_hosted_session(&mut h).await;

    let callback = format!(
        "lowprofilecode=lp-1&OperationResponse=0&ReturnValue={}&InternalDealNumber=9001&Token=tok-7&TokenExDate=0927&Last4CardDigits=4242&CardName=Visa",
        tx_id
    );
    let (status, body) = post_callback(&h, callback.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let settled = wait_for_status(&h, &tx_id, "success").await;
    assert_eq!(settled["transaction"]["external_reference"], "9001");
    let history = settled["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["from_status"], "pending");
    assert_eq!(history[0]["to_status"], "success");
    assert!(!history[0]["event_id"].is_null());

    let tokens: Value = h
        .client
        .get(format!("{}/tokens?user_ref=user-77", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tokens["count"], 1);
    assert_eq!(tokens["tokens"][0]["last_four"], "4242");
    assert_eq!(tokens["tokens"][0]["expiry_year"], "2027");

    // A redelivery after settlement changes nothing.
    let (status, body) = post_callback(&h, callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(h.tokens.list_for_user("user-77").await.unwrap().len(), 1);

    let entry = h
        .events
        .find_by_key("cardcom", "lp-1:9001:0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.duplicate_count, 1);
}

#[tokio::test]
async fn concurrent_redeliveries_settle_exactly_once() {
    let mut h = boot().await;
    let tx_id = create_hosted_session(&mut h).await;

    let callback = format!(
        "lowprofilecode=lp-1&OperationResponse=0&ReturnValue={}&InternalDealNumber=9001&Token=tok-7&TokenExDate=0927&Last4CardDigits=4242&CardName=Visa",
        tx_id
    );
    let (a, b, c, d) = tokio::join!(
        post_callback(&h, callback.clone()),
        post_callback(&h, callback.clone()),
        post_callback(&h, callback.clone()),
        post_callback(&h, callback.clone()),
    );

    let outcomes = [a, b, c, d];
    let accepted = outcomes
        .iter()
        .filter(|(_, body)| body["status"] == "accepted")
        .count();
    let duplicates = outcomes
        .iter()
        .filter(|(_, body)| body["status"] == "duplicate")
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, 3);

    let settled = wait_for_status(&h, &tx_id, "success").await;
    assert_eq!(settled["history"].as_array().unwrap().len(), 1);
    assert_eq!(h.tokens.list_for_user("user-77").await.unwrap().len(), 1);

    let entry = h
        .events
        .find_by_key("cardcom", "lp-1:9001:0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.duplicate_count, 3);
}

#[tokio::test]
async fn declined_callback_marks_the_transaction_failed() {
    let mut h = boot().await;
    let tx_id = create_hosted_session(&mut h).await;

    let callback = format!(
        "lowprofilecode=lp-1&OperationResponse=502&Description=Insufficient+funds&ReturnValue={}&InternalDealNumber=9002",
        tx_id
    );
    let (status, _) = post_callback(&h, callback).await;
    assert_eq!(status, StatusCode::OK);

    let settled = wait_for_status(&h, &tx_id, "failed").await;
    assert_eq!(settled["transaction"]["failure_reason"], "Insufficient funds");
    assert_eq!(settled["transaction"]["external_reference"], "9002");
    assert_eq!(h.tokens.list_for_user("user-77").await.unwrap().len(), 0);
}

#[tokio::test]
async fn charge_only_settlement_ignores_token_material() {
    let mut h = boot().await;

    let _session_mock = h
        .provider
        .mock("POST", "/Interface/LowProfile.aspx")
        .with_status(200)
        .with_body("ResponseCode=0&Description=OK&LowProfileCode=lp-1&url=https%3A%2F%2Fsecure.cardcom.example%2Fpage%2Flp-1")
        .create_async()
        .await;

    let mut payload = session_payload();
    payload["request_token_creation"] = json!(false);
    let res = h
        .client
        .post(format!("{}/sessions", h.base_url))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    let tx_id = body["transaction_id"].as_str().unwrap().to_string();

    // The provider volunteers card material even though nobody asked for it.
    let callback = format!(
        "lowprofilecode=lp-1&OperationResponse=0&ReturnValue={}&InternalDealNumber=9005&Token=tok-9&TokenExDate=0927&Last4CardDigits=4242&CardName=Visa",
        tx_id
    );
    let (status, body) = post_callback(&h, callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    wait_for_status(&h, &tx_id, "success").await;
    assert!(h.tokens.list_for_user("user-77").await.unwrap().is_empty());
}

#[tokio::test]
async fn late_success_after_a_decline_is_rejected_not_corrective() {
    let mut h = boot().await;
    let tx_id = create_hosted_session(&mut h).await;

    let decline = format!(
        "lowprofilecode=lp-1&OperationResponse=502&Description=Insufficient+funds&ReturnValue={}&InternalDealNumber=9002",
        tx_id
    );
    let (status, _) = post_callback(&h, decline).await;
    assert_eq!(status, StatusCode::OK);
    wait_for_status(&h, &tx_id, "failed").await;

    // A delayed approval for the same deal is a new ledger entry, not a
    // redelivery. The state machine refuses to un-fail the transaction.
    let approval = format!(
        "lowprofilecode=lp-1&OperationResponse=0&ReturnValue={}&InternalDealNumber=9002",
        tx_id
    );
    let (status, body) = post_callback(&h, approval).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let entry = h
            .events
            .find_by_key("cardcom", "lp-1:9002:0")
            .await
            .unwrap()
            .unwrap();
        if entry.status == EventStatus::Rejected {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("approval was never rejected, last seen: {}", entry.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let settled = wait_for_status(&h, &tx_id, "failed").await;
    assert_eq!(settled["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn stored_token_step_up_resolves_through_callback() {
    let mut h = boot().await;

    let material = TokenMaterial {
        token: "tok-55".to_string(),
        brand: Some("Visa".to_string()),
        last_four: Some("4242".to_string()),
        expiry_month: Some("09".to_string()),
        expiry_year: Some("2027".to_string()),
    };
    let stored = CardToken::from_material(
        "cardcom",
        Uuid::new_v4(),
        Some("user-9".to_string()),
        "seed-key",
        &material,
    );
    h.tokens.create_if_absent(&stored).await.unwrap();

    let _charge_mock = h
        .provider
        .mock("POST", "/Interface/ChargeToken.aspx")
        .with_status(200)
        .with_body("ThreeDSecureUrl=https%3A%2F%2F3ds.cardcom.example%2Fchallenge%2F1&ResponseCode=0")
        .create_async()
        .await;

    let res = h
        .client
        .post(format!("{}/sessions", h.base_url))
        .json(&json!({
            "provider": "cardcom",
            "amount": "55.00",
            "currency": "ILS",
            "customer_name": "Dana Levi",
            "customer_email": "dana@example.com",
            "user_ref": "user-9",
            "success_url": "https://shop.example.com/ok",
            "failure_url": "https://shop.example.com/fail",
            "stored_token_id": stored.id,
            "verification_code": "123"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["action"], "step_up");
    assert_eq!(
        body["step_up_url"],
        "https://3ds.cardcom.example/challenge/1"
    );
    let tx_id = body["transaction_id"].as_str().unwrap().to_string();

    let parked = wait_for_status(&h, &tx_id, "step_up_required").await;
    assert!(parked["transaction"]["processed_at"].is_null());
    assert_eq!(
        parked["transaction"]["step_up_url"],
        "https://3ds.cardcom.example/challenge/1"
    );

    let callback = format!(
        "OperationResponse=0&ReturnValue={}&InternalDealNumber=7100",
        tx_id
    );
    let (status, _) = post_callback(&h, callback).await;
    assert_eq!(status, StatusCode::OK);

    let settled = wait_for_status(&h, &tx_id, "success").await;
    let history = settled["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["to_status"], "step_up_required");
    assert_eq!(history[1]["to_status"], "success");
}

#[tokio::test]
async fn orphaned_callback_is_relinked_by_an_operator() {
    let mut h = boot().await;
    let tx_id = create_hosted_session(&mut h).await;

    // No ReturnValue and an unknown deal number: nothing to resolve.
    let (status, body) =
        post_callback(&h, "lowprofilecode=lp-1&OperationResponse=0&InternalDealNumber=6000".to_string())
            .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let orphan_id = wait_for_orphan(&h).await;

    let res = h
        .client
        .post(format!("{}/admin/events/{}/link", h.base_url, orphan_id))
        .header("authorization", format!("Bearer {}", ADMIN_KEY))
        .json(&json!({ "transaction_id": tx_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "requeued");

    let settled = wait_for_status(&h, &tx_id, "success").await;
    assert_eq!(settled["transaction"]["external_reference"], "6000");
}

async fn wait_for_orphan(h: &Harness) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let body: Value = h
            .client
            .get(format!("{}/admin/events/orphaned", h.base_url))
            .header("authorization", format!("Bearer {}", ADMIN_KEY))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["count"] == 1 {
            return body["events"][0]["id"].as_str().unwrap().to_string();
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("no orphaned event appeared, last seen: {}", body);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
