//! HTTP API tests -- drive the router directly against a temporary database.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use fleetmedic::api::{self, state::AppState};
use fleetmedic::config::FleetConfig;
use fleetmedic::storage;

fn app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fleetmedic.db");
    let pool = storage::open_pool(db.to_str().unwrap()).unwrap();

    let mut cfg = FleetConfig::default();
    cfg.detector.seed = Some(42);
    let state = AppState::new(pool, &cfg);
    (dir, api::router(state))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1_000_000).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app) = app();
    let (status, json) = send(&app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "ok");
    assert!(json["data"]["version"].is_string());
}

#[tokio::test]
async fn test_ingest_evaluates_and_stores() {
    let (_dir, app) = app();

    let (status, json) = send(
        &app,
        post(
            "/api/v1/telemetry",
            json!({"speed": 130, "fuel_level": "50", "temperature": 70, "latitude": 17.38, "longitude": 78.48}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    let verdict = &json["data"]["verdict"];
    assert_eq!(verdict["rule_triggered"], true);
    assert_eq!(verdict["model_evaluated"], false);
    assert_eq!(verdict["reasons"], json!(["Overspeed"]));
    assert_eq!(verdict["health_score"], 80);
    assert_eq!(verdict["severity"], "Healthy");
    assert_eq!(json["data"]["vehicle_id"], "default");
    assert_eq!(json["meta"]["history_size"], 0);

    let (status, json) = send(&app, get("/api/v1/telemetry")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["meta"]["total"], 1);
    assert_eq!(json["data"][0]["anomaly_reason"], "Overspeed");
    assert_eq!(json["data"][0]["speed"], 130.0);

    let (status, json) = send(&app, get("/api/v1/telemetry/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["severity"], "Healthy");
}

#[tokio::test]
async fn test_invalid_sample_is_rejected_and_not_stored() {
    let (_dir, app) = app();

    let (status, json) = send(
        &app,
        post(
            "/api/v1/telemetry",
            json!({"fuel_level": 50, "temperature": 70, "latitude": 0, "longitude": 0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["field"], "speed");

    let (status, json) = send(
        &app,
        post(
            "/api/v1/telemetry",
            json!({"speed": 50, "fuel_level": 150, "temperature": 70, "latitude": 0, "longitude": 0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["field"], "fuel_level");

    let (_, json) = send(&app, get("/api/v1/telemetry")).await;
    assert_eq!(json["meta"]["total"], 0);

    let (status, _) = send(&app, get("/api/v1/telemetry/latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_is_per_vehicle_and_enables_model() {
    let (_dir, app) = app();

    for i in 0..21 {
        let body = json!({
            "vehicle_id": "truck-1",
            "speed": 60 + (i % 5),
            "fuel_level": 50 + (i % 3),
            "temperature": 75 + (i % 4),
            "latitude": 0,
            "longitude": 0
        });
        let (status, json) = send(&app, post("/api/v1/telemetry", body)).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        assert_eq!(json["data"]["verdict"]["model_evaluated"], false);
    }

    let body = json!({"vehicle_id": "truck-1", "speed": 62, "fuel_level": 51, "temperature": 76, "latitude": 0, "longitude": 0});
    let (_, json) = send(&app, post("/api/v1/telemetry", body)).await;
    assert_eq!(json["meta"]["history_size"], 21);
    assert_eq!(json["data"]["verdict"]["model_evaluated"], true);

    // A different vehicle starts from an empty history.
    let body = json!({"vehicle_id": "truck-2", "speed": 62, "fuel_level": 51, "temperature": 76, "latitude": 0, "longitude": 0});
    let (_, json) = send(&app, post("/api/v1/telemetry", body)).await;
    assert_eq!(json["meta"]["history_size"], 0);

    let (_, json) = send(&app, get("/api/v1/telemetry?vehicle=truck-2")).await;
    assert_eq!(json["meta"]["total"], 1);
    let (_, json) = send(&app, get("/api/v1/telemetry?vehicle=truck-1&limit=5")).await;
    assert_eq!(json["meta"]["total"], 5);
}

#[tokio::test]
async fn test_out_of_order_timestamp_is_rejected() {
    let (_dir, app) = app();
    let sample = |ts: &str| {
        json!({"vehicle_id": "v", "speed": 50, "fuel_level": 50, "temperature": 70,
               "latitude": 0, "longitude": 0, "timestamp": ts})
    };

    let (status, _) = send(&app, post("/api/v1/telemetry", sample("2026-01-01T10:00:00Z"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, post("/api/v1/telemetry", sample("2026-01-01T10:00:00Z"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&app, post("/api/v1/telemetry", sample("2026-01-01T09:59:59Z"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().unwrap().contains("earlier"));
}

#[tokio::test]
async fn test_server_stamped_sample_never_lands_before_latest() {
    let (_dir, app) = app();
    let future = "2099-01-01T00:00:00Z";
    let body = |ts: Option<&str>| {
        let mut v = json!({"vehicle_id": "v", "speed": 50, "fuel_level": 50, "temperature": 70,
                           "latitude": 0, "longitude": 0});
        if let Some(ts) = ts {
            v["timestamp"] = json!(ts);
        }
        v
    };

    let (status, _) = send(&app, post("/api/v1/telemetry", body(Some(future)))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, post("/api/v1/telemetry", body(None))).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    let stamped: chrono::DateTime<chrono::Utc> = serde_json::from_value(json["data"]["timestamp"].clone()).unwrap();
    assert_eq!(stamped, future.parse::<chrono::DateTime<chrono::Utc>>().unwrap());

    let (_, json) = send(&app, get("/api/v1/telemetry?vehicle=v")).await;
    let stamps: Vec<chrono::DateTime<chrono::Utc>> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| serde_json::from_value(r["timestamp"].clone()).unwrap())
        .collect();
    assert_eq!(stamps.len(), 2);
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");

    // A producer timestamp behind the future one is still refused.
    let (status, _) = send(&app, post("/api/v1/telemetry", body(Some("2030-01-01T00:00:00Z")))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_wrongly_typed_field_gets_json_error_naming_it() {
    let (_dir, app) = app();

    let req = post(
        "/api/v1/telemetry",
        json!({"speed": true, "fuel_level": 50, "temperature": 70, "latitude": 0, "longitude": 0}),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = axum::body::to_bytes(response.into_body(), 1_000_000).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["field"], "speed");

    let (status, json) = send(
        &app,
        post(
            "/api/v1/telemetry",
            json!({"speed": 50, "fuel_level": {"pct": 50}, "temperature": 70, "latitude": 0, "longitude": 0}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["field"], "fuel_level");
}

#[tokio::test]
async fn test_unparseable_body_gets_json_error() {
    let (_dir, app) = app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/telemetry")
        .header("content-type", "application/json")
        .body(Body::from("{\"speed\": 1e400}"))
        .unwrap();
    let (status, json) = send(&app, req).await;
    assert!(status.is_client_error());
    assert!(json["error"].is_string(), "{json}");

    let (_, json) = send(&app, get("/api/v1/telemetry")).await;
    assert_eq!(json["meta"]["total"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_dir, app) = app();
    let response = app.clone().oneshot(get("/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
