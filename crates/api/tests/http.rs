use api::{config::ServiceConfig, router, state::AppState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let cfg = ServiceConfig::default();
    router(AppState::from_config(&cfg), &cfg)
}

async fn call(req: Request<Body>) -> (StatusCode, Value) {
    let resp = app().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn small_request() -> Value {
    json!({
        "period_id": 12,
        "teaching_assignments": [
            {"id": 1, "teacher_id": 5, "rombel_id": 3, "subject_id": 8, "weekly_hours": 2},
            {"id": 2, "teacher_id": 6, "rombel_id": 3, "subject_id": 9}
        ],
        "time_slots": [
            {"id": 1, "day_of_week": 1, "start_time": "07:00", "end_time": "07:45"},
            {"id": 2, "day_of_week": 1, "start_time": "07:45", "end_time": "08:30"},
            {"id": 3, "day_of_week": 2, "start_time": "07:00", "end_time": "07:45"}
        ]
    })
}

#[tokio::test]
async fn health_is_ok() {
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = call(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn generate_returns_a_feasible_schedule() {
    let (status, body) = call(post("/schedule/generate", small_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["period_id"], json!(12));
    assert_eq!(body["diagnostics"]["status"], "feasible");
    assert!(body["diagnostics"].get("stop_reason").is_none());
    assert_eq!(body["summary"]["sessions"], 3);
    assert_eq!(body["schedule"].as_array().map(Vec::len), Some(3));
    assert!(body["generated_at"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn expired_deadline_header_degrades_the_result() {
    let specs: Vec<Value> = (0..200)
        .map(|i| json!({"id": i, "teacher_id": format!("t{}", i % 9), "rombel_id": i % 11}))
        .collect();
    let slots: Vec<Value> = (0..40)
        .map(|i| json!({"id": i, "day_of_week": i / 8, "period": i % 8}))
        .collect();
    let mut req = post(
        "/schedule/generate",
        json!({"teaching_assignments": specs, "time_slots": slots}),
    );
    req.headers_mut()
        .insert("X-Deadline-Ms", "0".parse().unwrap());
    let (status, body) = call(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["diagnostics"]["status"], "degraded");
    assert_eq!(body["diagnostics"]["early_termination"], true);
    assert_eq!(body["diagnostics"]["stop_reason"], "deadline");
}

#[tokio::test]
async fn bad_deadline_header_is_rejected() {
    let mut req = post("/schedule/generate", small_request());
    req.headers_mut()
        .insert("X-Deadline-Ms", "soon".parse().unwrap());
    let (status, body) = call(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "X-Deadline-Ms");
}

#[tokio::test]
async fn validation_errors_carry_the_field() {
    let mut bad = small_request();
    bad["teaching_assignments"][1]["duration"] = json!(0);
    let (status, body) = call(post("/schedule/generate", bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["field"], "teaching_assignments[1].duration");
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let (status, body) = call(post("/schedule/generate", json!({"time_slots": 3}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "body");
}

#[tokio::test]
async fn unknown_capability_is_unprocessable() {
    let req = json!({
        "teaching_assignments": [{"id": "chem", "requires": [{"tags": ["lab"]}]}],
        "time_slots": [{"id": "x", "day_of_week": 1}]
    });
    let (status, body) = call(post("/schedule/generate", req)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "unsatisfiable_domain");
    assert_eq!(body["sessions"][0]["session_id"], "chem");
    assert_eq!(body["sessions"][0]["reason"], "unknown_capability");
}

#[tokio::test]
async fn validate_reports_without_searching() {
    let (status, body) = call(post("/schedule/validate", small_request())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["sessions"], 3);
}

#[tokio::test]
async fn explain_scores_the_given_schedule() {
    let mut req = small_request();
    req["schedule"] = json!([
        {"session_id": "1#1", "slot_id": 1, "resource_ids": [5]},
        {"session_id": "1#2", "slot_id": 1, "resource_ids": [5]},
        {"session_id": "2", "slot_id": 3, "resource_ids": [6]}
    ]);
    let (status, body) = call(post("/schedule/explain", req)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["diagnostics"]["status"], "infeasible");
    let kinds: Vec<&str> = body["diagnostics"]["violated_hard_constraints"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v["constraint"].as_str())
        .collect();
    assert!(kinds.contains(&"resource_double_booking"));
    assert!(kinds.contains(&"cohort_double_booking"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let req = Request::builder()
        .uri("/openapi.json")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/schedule/generate"].is_object());
}
