use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use cinestream_core::http::{router, Services, ROUTES};
use cinestream_core::payment::{Checkout, GatewayResult, InitializeRequest};
use cinestream_core::store::{Category, NewContent, NewMovie, SqliteStore};
use cinestream_core::{
    AnalyticsService, BookingService, CheckoutSettings, GatewayVerdict, LogMailer,
    PaymentGateway, PlanPricing, PlaybackService, QrRenderer, SubscriptionService, UrlSigner,
};

struct ApprovingGateway;

#[async_trait]
impl PaymentGateway for ApprovingGateway {
    async fn initialize(&self, request: &InitializeRequest) -> GatewayResult<Checkout> {
        Ok(Checkout {
            checkout_url: format!("https://checkout.example.com/{}", request.tx_ref),
        })
    }

    async fn verify(&self, _tx_ref: &str) -> GatewayResult<GatewayVerdict> {
        Ok(GatewayVerdict::Success)
    }
}

struct TestApp {
    _dir: TempDir,
    store: SqliteStore,
    app: Router,
}

fn app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::builder()
        .path(dir.path().join("cinema.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    let gateway: Arc<dyn PaymentGateway> = Arc::new(ApprovingGateway);
    let mailer = Arc::new(LogMailer);
    let settings = CheckoutSettings {
        currency: "ETB".into(),
        callback_url: "http://localhost/payment/callback".into(),
        return_url: "http://localhost/payment/verify".into(),
        reference_prefix: "cine".into(),
        public_base_url: "http://localhost".into(),
    };
    let qr = QrRenderer::new(dir.path().join("qr"));
    let services = Services {
        booking: BookingService::new(
            store.clone(),
            gateway.clone(),
            mailer.clone(),
            qr.clone(),
            settings.clone(),
        ),
        subscriptions: SubscriptionService::new(
            store.clone(),
            gateway,
            mailer,
            qr,
            settings,
            PlanPricing {
                monthly_price_cents: 19_900,
                annual_price_cents: 199_900,
            },
        ),
        playback: PlaybackService::new(
            store.clone(),
            UrlSigner::new(b"http-test-secret".to_vec(), 300).unwrap(),
            "http://localhost/media",
            dir.path().join("keys"),
        ),
        analytics: AnalyticsService::new(store.clone()),
    };
    TestApp {
        app: router(Arc::new(services)),
        store,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HashMap<String, String>, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn health_and_route_table() {
    let t = app();
    let (status, body) = send_json(&t.app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
    assert!(ROUTES.iter().any(|route| route.path == "/payment/callback" && route.method == "POST"));
    assert_eq!(
        send(&t.app, get("/nowhere", None)).await.0,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn reservation_flow_over_http() {
    let t = app();
    let mut movie = NewMovie::new("Inception", Utc::now());
    movie.num_rows = 1;
    movie.seats_per_row = 2;
    let movie = t.store.create_movie(&movie).unwrap();
    let seat = t.store.find_seat_by_label(movie.id, "A1").unwrap().unwrap();
    let uri = format!("/movies/{}/seats/{}/reserve", movie.id, seat.id);
    let buyer = json!({ "name": "Alice", "email": "alice@example.com" });

    let (status, body) = send_json(&t.app, post(&uri, None, buyer.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let tx_ref = body["transaction"]["tx_ref"].as_str().unwrap().to_string();
    assert!(body["checkout_url"].as_str().unwrap().ends_with(&tx_ref));

    let (status, body) = send_json(&t.app, post(&uri, None, buyer)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, body) = send_json(
        &t.app,
        post("/payment/callback", None, json!({ "trx_ref": tx_ref })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "reservation");
    assert_eq!(body["paid"], true);
    assert_eq!(body["status"], "success");

    let (status, again) =
        send_json(&t.app, get(&format!("/payment/verify?tx_ref={tx_ref}"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again, body);

    let (status, body) = send_json(&t.app, post("/payment/callback", None, json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    let (status, body) =
        send_json(&t.app, get("/payment/verify?tx_ref=cine-9-9-000000000000", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send_json(
        &t.app,
        post(
            &format!("/movies/{}/seats/9999/reserve", movie.id),
            None,
            json!({ "name": "Bob", "email": "bob@example.com" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn playback_is_gated_by_subscription() {
    let t = app();
    let content = t
        .store
        .create_content(&NewContent::new("Inception", Category::SciFi))
        .unwrap();
    let playback_uri = format!("/streaming/{}/playback", content.id);

    assert_eq!(
        send(&t.app, get(&playback_uri, None)).await.0,
        StatusCode::UNAUTHORIZED
    );
    let (status, body) = send_json(&t.app, get(&playback_uri, Some("alice"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "authorization_failure");

    let (status, body) = send_json(
        &t.app,
        post(
            "/subscriptions",
            Some("alice"),
            json!({ "full_name": "Alice Smith", "email": "alice@example.com", "plan": "monthly" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let tx_ref = body["transaction"]["tx_ref"].as_str().unwrap().to_string();
    let (status, body) = send_json(
        &t.app,
        get(&format!("/subscriptions/verify?tx_ref={tx_ref}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body["expires_at"].is_string());

    assert_eq!(
        send(&t.app, get(&playback_uri, Some("alice"))).await.0,
        StatusCode::NOT_FOUND
    );
    t.store
        .set_output_location(content.id, &format!("hls/{}/master.m3u8", content.id))
        .unwrap();
    let (status, grant) = send_json(&t.app, get(&playback_uri, Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    let url = url::Url::parse(grant["url"].as_str().unwrap()).unwrap();
    let query = url.query().unwrap().to_string();

    let authorize = format!("/streaming/{}/authorize", content.id);
    assert_eq!(
        send(&t.app, get(&format!("{authorize}?{query}"), None)).await.0,
        StatusCode::NO_CONTENT
    );
    let tampered = query.replace("signature=", "signature=0");
    assert_eq!(
        send(&t.app, get(&format!("{authorize}?{tampered}"), None)).await.0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        send(&t.app, get(&authorize, None)).await.0,
        StatusCode::FORBIDDEN
    );
    let other = format!("/streaming/{}/authorize?{query}", content.id + 1);
    assert_eq!(send(&t.app, get(&other, None)).await.0, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn progress_mints_a_session_and_ratings_validate() {
    let t = app();
    let mut new = NewContent::new("Inception", Category::SciFi);
    new.duration_seconds = 600;
    let content = t.store.create_content(&new).unwrap();
    let progress = format!("/streaming/{}/progress", content.id);

    let (status, headers, body) = send(
        &t.app,
        post(&progress, Some("alice"), json!({ "event": "start" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let cookie = headers.get("set-cookie").cloned().unwrap();
    assert!(cookie.starts_with("cinestream_session="));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["ok"], true);

    let session = cookie.split(';').next().unwrap().to_string();
    let request = Request::post(&progress)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "alice")
        .header(header::COOKIE, &session)
        .body(Body::from(
            json!({ "event": "progress", "watched_seconds": 120 }).to_string(),
        ))
        .unwrap();
    let (status, headers, body) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!headers.contains_key("set-cookie"));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["added_seconds"], 120.0);
    assert_eq!(body["total_watch_time_minutes"], 2.0);

    let (status, body) = send_json(
        &t.app,
        post(&progress, Some("alice"), json!({ "event": "rewind" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_failure");

    let rate = format!("/streaming/{}/rate", content.id);
    let (status, body) = send_json(&t.app, post(&rate, Some("alice"), json!({ "rating": "4" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["average_rating"], 4.0);
    assert_eq!(body["total_ratings"], 1);
    for bad in [json!({ "rating": 9 }), json!({ "rating": "abc" }), json!({})] {
        let (status, _) = send_json(&t.app, post(&rate, Some("alice"), bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    let (status, headers, body) = send(&t.app, get("/analytics/export.csv", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].starts_with("text/csv"));
    assert!(headers["content-disposition"].contains("content_analytics.csv"));
    let text = String::from_utf8(body).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().starts_with("Inception,"));
}

#[tokio::test]
async fn cookieless_absolute_reports_are_not_credited() {
    let t = app();
    let mut new = NewContent::new("Inception", Category::SciFi);
    new.duration_seconds = 600;
    let content = t.store.create_content(&new).unwrap();
    let progress = format!("/streaming/{}/progress", content.id);

    for _ in 0..2 {
        let (status, headers, body) = send(
            &t.app,
            post(
                &progress,
                Some("alice"),
                json!({ "event": "progress", "watched_seconds": 300 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains_key("set-cookie"));
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["added_seconds"], 0.0);
    }
    let row = t.store.fetch_content(content.id).unwrap().unwrap();
    assert_eq!(row.total_watch_seconds, 0.0);
}
