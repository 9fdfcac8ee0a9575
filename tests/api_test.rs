//! HTTP surface tests driven through the router without a socket

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_backend() {
    let harness = Harness::new();
    let (status, body) = call(&harness.router(), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "memory");
}

#[tokio::test]
async fn test_search_endpoint() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    harness.add(&hotel, &room, vec![], vec![]).await;
    let router = harness.router();

    let request = json!({
        "city": "aden",
        "check_in": day(1),
        "check_out": day(3),
        "adults": 2
    });
    let (status, body) = call(&router, Method::POST, "/v1/search", Some(request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 1);
    assert_eq!(body["relaxation_level"], "exact");
    assert_eq!(body["items"][0]["kind"], "unit");
    assert_eq!(body["items"][0]["unit_id"], room.id.to_string());
    assert_eq!(body["items"][0]["total_price"], 200.0);
    assert_eq!(body["stage_counts"].as_array().map(Vec::len), Some(7));

    let inverted = json!({ "check_in": day(3), "check_out": day(1) });
    let (status, body) = call(&router, Method::POST, "/v1/search", Some(inverted)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["retryable"], false);

    let unknown = json!({ "dynamic_filters": { "balcony": "yes" } });
    let (status, _) = call(&router, Method::POST, "/v1/search", Some(unknown)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_events_endpoint_reindexes() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    harness.stage(&hotel, &room, vec![], vec![]);
    let router = harness.router();

    let event = json!({
        "type": "unit_created",
        "property_id": hotel.id,
        "unit_id": room.id
    });
    let (status, body) = call(&router, Method::POST, "/v1/index/events", Some(event)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event"], "unit_created");
    assert_eq!(body["outcomes"][0]["result"], "indexed");
    assert_eq!(body["outcomes"][0]["changed"], true);

    let (status, _) = call(
        &router,
        Method::POST,
        "/v1/index/events",
        Some(json!({ "type": "not_an_event" })),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_rebuild_job_lifecycle() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    harness.stage(&hotel, &unit(&hotel, "Sea Room", 100.0), vec![], vec![]);
    let router = harness.router();

    let (status, body) = call(&router, Method::POST, "/admin/index/rebuild", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let status_url = body["status_url"].as_str().unwrap().to_string();
    assert!(status_url.ends_with(body["job_id"].as_str().unwrap()));

    let mut job = Value::Null;
    for _ in 0..200 {
        let (status, body) = call(&router, Method::GET, &status_url, None).await;
        assert_eq!(status, StatusCode::OK);
        job = body;
        if job["status"] != "running" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(job["status"], "completed");
    assert_eq!(job["written"], 1);

    let missing = format!("/admin/index/jobs/{}", Uuid::new_v4());
    let (status, body) = call(&router, Method::GET, &missing, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_admin_endpoints() {
    let harness = Harness::new();
    let hotel = property("Aden", 12.8, 45.0);
    let room = unit(&hotel, "Sea Room", 100.0);
    harness.stage(&hotel, &room, vec![], vec![]);
    let router = harness.router();

    let (status, body) = call(&router, Method::GET, "/admin/index/stale", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let reindex = json!({ "property_id": hotel.id, "unit_id": room.id });
    let (status, body) = call(&router, Method::POST, "/admin/index/reindex", Some(reindex)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "indexed");

    let (status, body) = call(&router, Method::GET, "/admin/index/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"]["store"]["documents"], 1);
    assert_eq!(body["index"]["store"]["backend"], "memory");

    let (status, body) = call(&router, Method::GET, "/admin/index/failed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = call(&router, Method::POST, "/admin/index/flush", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_metrics_endpoint_serves_text() {
    let harness = Harness::new();
    let response = harness
        .router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
