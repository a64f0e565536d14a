use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use site_analytics::config::Config;
use site_analytics::dates;
use site_analytics::events::EventBus;
use site_analytics::store::{self, AnalyticsStore};
use site_analytics::web::{self, AppState};

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    data_file: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn test_app(admin_password: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.data_file = dir.path().join("data").join("analytics.json");
    config.admin.password = admin_password.to_string();

    let handle = store::start_write_buffer(
        config.storage.data_file.clone(),
        AnalyticsStore::default(),
        config.analytics.limits(),
    );
    let state = Arc::new(AppState::new(&config, handle, EventBus::new(64)));

    TestApp {
        router: web::router(state.clone()),
        state,
        data_file: config.storage.data_file,
        _dir: dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analytics")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn page_view(unique: bool) -> Value {
    json!({
        "action": "pageView",
        "data": { "userId": "u-1", "isUniqueVisit": unique, "referrer": "google.com" }
    })
}

#[tokio::test]
async fn page_views_then_stats_for_today() {
    let app = test_app("");
    for unique in [true, false, true] {
        let (status, body) = send(&app.router, post(page_view(unique))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
    }

    let (status, body) = send(&app.router, get("/analytics?days=1")).await;
    assert_eq!(status, StatusCode::OK);

    let today = dates::date_key(dates::today());
    assert_eq!(body["global"], json!({ "totalVisits": 3, "uniqueVisitors": 2 }));
    assert_eq!(body["allTime"], json!({ "totalVisits": 3, "uniqueVisitors": 2 }));
    assert_eq!(
        body["daily"][&today]["visits"],
        json!({ "pageViews": 3, "uniqueVisitors": 2 })
    );
    assert_eq!(body["referrers"][0]["referrer"], "google.com");
    assert_eq!(body["referrers"][0]["percentage"], json!(100.0));

    // Every accepted event is on disk before the response is sent
    let on_disk = store::load(&app.data_file).await.unwrap();
    assert_eq!(on_disk.global.total_visits, 3);
}

#[tokio::test]
async fn repeated_button_click_updates_one_global_entry() {
    let app = test_app("");
    let click = json!({
        "action": "buttonClick",
        "data": { "userId": "u-1", "buttonId": "whatsapp-hero", "buttonName": "WhatsApp", "referrer": "instagram.com" }
    });

    send(&app.router, post(click.clone())).await;
    let (_, body) = send(&app.router, get("/analytics?days=7")).await;
    assert_eq!(body["globalButtons"]["whatsapp-hero"], json!({ "count": 1, "name": "WhatsApp" }));

    send(&app.router, post(click)).await;
    let (_, body) = send(&app.router, get("/analytics?days=7")).await;
    assert_eq!(body["globalButtons"].as_object().unwrap().len(), 1);
    assert_eq!(body["globalButtons"]["whatsapp-hero"]["count"], 2);
    assert_eq!(body["buttons"][0]["totalClicks"], 2);
    assert_eq!(body["buttons"][0]["recentClicks"].as_array().unwrap().len(), 2);

    let today = dates::date_key(dates::today());
    let clicks = body["daily"][&today]["buttonClicks"].as_array().unwrap();
    assert_eq!(clicks.len(), 2);
    assert_ne!(clicks[0]["id"], clicks[1]["id"]);
    assert_eq!(clicks[0]["referrer"], "instagram.com");
}

#[tokio::test]
async fn legacy_contact_click_is_accepted() {
    let app = test_app("");
    let (status, _) = send(
        &app.router,
        post(json!({
            "action": "contactClick",
            "data": { "userId": "u-1", "buttonId": "phone", "buttonName": "Telefone", "sectionId": "hero" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.state.store.read(|s| s.global_buttons["phone"].count).await, 1);
}

#[tokio::test]
async fn bad_requests_are_rejected_with_400() {
    let app = test_app("");

    let (status, body) = send(&app.router, post(json!({ "data": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("action and data"));

    let (status, body) = send(&app.router, post(json!({ "action": "scroll", "data": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "unrecognized action: scroll");

    let (status, _) = send(&app.router, post(json!({ "action": "buttonClick", "data": { "buttonId": "" } }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let malformed = Request::builder()
        .method("POST")
        .uri("/analytics")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ nope"))
        .unwrap();
    let (status, body) = send(&app.router, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app.router, get("/analytics?days=100000")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for uri in ["/analytics?days=abc", "/analytics?days=-1"] {
        let (status, body) = send(&app.router, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["success"], false, "{uri}");
        assert!(body["message"].as_str().unwrap().contains("query string"), "{uri}");
    }

    // Nothing was recorded
    assert_eq!(app.state.store.read(|s| s.clone()).await, AnalyticsStore::default());
}

#[tokio::test]
async fn dashboard_summarizes_current_range() {
    let app = test_app("");
    for unique in [true, false, false, true] {
        send(&app.router, post(page_view(unique))).await;
    }

    let (status, body) = send(&app.router, get("/analytics/dashboard?range=30days")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["range"], "30days");
    assert_eq!(body["dates"].as_array().unwrap().len(), 30);
    assert_eq!(body["currentPeriodTotal"], 4);
    assert_eq!(body["previousPeriodTotal"], 0);
    assert_eq!(body["visitsGrowthRate"], json!(100.0));
    assert_eq!(body["conversionRate"], json!(50.0));
    assert_eq!(body["topDay"]["date"], json!(dates::date_key(dates::today())));
    assert_eq!(body["dateStats"][29]["isTopDay"], true);
    assert_eq!(body["visitChartData"][29]["value"], 4);
}

#[tokio::test]
async fn admin_endpoints_require_password() {
    let app = test_app("s3cret");

    // Ingestion stays public
    let (status, _) = send(&app.router, post(page_view(true))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, get("/analytics")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let authorized = Request::builder()
        .uri("/analytics")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, authorized).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["global"]["totalVisits"], 1);

    let (status, _) = send(&app.router, get("/analytics/dashboard?token=s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app.router, get("/analytics/dashboard?token=wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn query_token_with_reserved_characters_authenticates() {
    let app = test_app("p&ss word+%");

    let (status, _) = send(&app.router, get("/analytics/dashboard?token=p%26ss%20word%2B%25")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app.router, get("/analytics/dashboard?token=p&ss%20word%2B%25")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_clears_all_data() {
    let app = test_app("");
    send(&app.router, post(page_view(true))).await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/analytics")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app.router, get("/analytics?days=30")).await;
    assert_eq!(body["allTime"]["totalVisits"], 0);
    assert_eq!(body["daily"], json!({}));
}

#[tokio::test]
async fn recorded_events_are_broadcast() {
    let app = test_app("");
    let mut rx = app.state.event_bus.subscribe();

    send(&app.router, post(page_view(true))).await;
    let event = rx.recv().await.unwrap();
    assert_eq!(event.name(), "pageView");
}
