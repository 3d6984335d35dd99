// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health, GET /metrics
// - POST /api/risk-assessment (success, validation, malformed JSON)
// - POST /api/chat (success, error shape)
// - GET /api/students/{id}/... lookups

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt as _; // for `oneshot`

use student_risk_engine::ai_adapter::{DisabledClient, DynAiClient};
use student_risk_engine::analyze::reply::FALLBACK_REPLY;
use student_risk_engine::config::EngineConfig;
use student_risk_engine::metrics::Metrics;
use student_risk_engine::store::memory::MemoryStore;
use student_risk_engine::{create_router, RiskEngine};

const BODY_LIMIT: usize = 1024 * 1024;

/// Same wiring as the binary, with the model disabled and an in-memory store.
fn test_router() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ai: DynAiClient = Arc::new(DisabledClient);
    let engine = RiskEngine::new(&EngineConfig::default(), ai, Duration::from_secs(2), store.clone());
    (create_router(Arc::new(engine), &Metrics::init()), store)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("build POST")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_is_ok() {
    let (app, _) = test_router();
    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    let (app, _) = test_router();
    let resp = app.oneshot(get("/metrics")).await.expect("oneshot /metrics");
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn high_risk_student_gets_critical_assessment_and_alert() {
    let (app, store) = test_router();
    let payload = json!({
        "student_id": "stu-100",
        "gpa": 1.8,
        "attendance_rate": 55,
        "credits_completed": 40,
        "credits_enrolled": 12,
        "semester": 6,
        "recent_grades": [1.7, 2.3],
        "behavioral_indicators": {"missed_advising": true}
    });
    let resp = app
        .oneshot(post_json("/api/risk-assessment", &payload))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["risk_score"], 100);
    assert_eq!(v["risk_level"], "critical");
    assert_eq!(v["intervention_priority"], 5);
    assert_eq!(v["confidence"], 0.7);
    assert_eq!(v["model_version"], "rules-v1");
    assert_eq!(v["alert_created"], true);
    assert!(v["prediction_id"].is_string());
    assert!(v["explanation"]
        .as_str()
        .unwrap()
        .contains("rule-based scorer"));

    assert_eq!(store.alert_count().unwrap(), 1);
    assert_eq!(store.prediction_count().unwrap(), 1);
}

#[tokio::test]
async fn low_risk_student_has_protective_factors_and_no_alert() {
    let (app, store) = test_router();
    let payload = json!({
        "student_id": "stu-101",
        "gpa": 3.5,
        "attendance_rate": 90,
        "credits_completed": 95,
        "credits_enrolled": 15,
        "semester": 6
    });
    let resp = app
        .oneshot(post_json("/api/risk-assessment", &payload))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["risk_score"], 0);
    assert_eq!(v["risk_level"], "low");
    assert_eq!(v["intervention_priority"], 1);
    assert_eq!(v["alert_created"], false);
    let protective: Vec<&str> = v["protective_factors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(protective.contains(&"strong GPA"));
    assert!(protective.contains(&"consistent attendance"));
    assert_eq!(store.alert_count().unwrap(), 0);
}

#[tokio::test]
async fn out_of_range_input_is_400_with_error() {
    let (app, store) = test_router();
    let payload = json!({
        "student_id": "stu-102",
        "gpa": 4.7,
        "attendance_rate": 90,
        "credits_completed": 30,
        "credits_enrolled": 15,
        "semester": 2
    });
    let resp = app
        .oneshot(post_json("/api/risk-assessment", &payload))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = json_body(resp).await;
    assert!(v["error"].as_str().unwrap().contains("gpa"));
    assert_eq!(store.prediction_count().unwrap(), 0);
}

#[tokio::test]
async fn malformed_json_is_400_with_error() {
    let (app, _) = test_router();
    let req = Request::builder()
        .method("POST")
        .uri("/api/risk-assessment")
        .header("content-type", "application/json")
        .body(Body::from("{\"student_id\": \"x\", \"gpa\": "))
        .expect("build");
    let resp = app.oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(resp).await["error"].is_string());
}

#[tokio::test]
async fn chat_turn_returns_reply_sentiment_and_conversation() {
    let (app, store) = test_router();
    let payload = json!({
        "student_id": "stu-200",
        "message": "Midterms are coming and I'm a bit nervous.",
        "conversation_history": []
    });
    let resp = app
        .clone()
        .oneshot(post_json("/api/chat", &payload))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    // Model disabled: fallback reply and neutral sentiment.
    assert_eq!(v["response"], FALLBACK_REPLY);
    assert_eq!(v["sentiment_analysis"]["emotional_state"], "neutral");
    assert_eq!(v["sentiment_analysis"]["needs_escalation"], false);
    let conversation_id = v["conversation_id"].as_str().unwrap().to_string();

    let resp = app
        .oneshot(get("/api/students/stu-200/conversation"))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    let c = json_body(resp).await;
    assert_eq!(c["id"], conversation_id);
    assert_eq!(c["messages"].as_array().unwrap().len(), 2);
    assert_eq!(store.conversation_count().unwrap(), 1);
}

#[tokio::test]
async fn chat_errors_still_answer_with_supportive_text() {
    let (app, _) = test_router();
    let payload = json!({ "student_id": "stu-201", "message": "   " });
    let resp = app
        .clone()
        .oneshot(post_json("/api/chat", &payload))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = json_body(resp).await;
    assert_eq!(v["response"], FALLBACK_REPLY);
    assert_eq!(v["error"], true);
    assert!(v["detail"].as_str().unwrap().contains("message"));

    // Missing fields entirely.
    let resp = app
        .oneshot(post_json("/api/chat", &json!({ "message": "hi" })))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = json_body(resp).await;
    assert_eq!(v["response"], FALLBACK_REPLY);
    assert_eq!(v["error"], true);
}

#[tokio::test]
async fn lookups_list_predictions_and_alerts() {
    let (app, _) = test_router();
    let payload = json!({
        "student_id": "stu-300",
        "gpa": 1.9,
        "attendance_rate": 50,
        "credits_completed": 10,
        "credits_enrolled": 12,
        "semester": 3
    });
    for _ in 0..2 {
        let resp = app
            .clone()
            .oneshot(post_json("/api/risk-assessment", &payload))
            .await
            .expect("oneshot");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = app
        .clone()
        .oneshot(get("/api/students/stu-300/predictions?limit=1"))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    let preds = json_body(resp).await;
    assert_eq!(preds.as_array().unwrap().len(), 1);
    assert_eq!(preds[0]["model_version"], "rules-v1");
    assert_eq!(preds[0]["risk_factors"]["risk_level"], "critical");

    let resp = app
        .clone()
        .oneshot(get("/api/students/stu-300/alerts"))
        .await
        .expect("oneshot");
    let alerts = json_body(resp).await;
    assert_eq!(alerts.as_array().unwrap().len(), 2);
    assert_eq!(alerts[0]["alert_type"], "academic");
    assert_eq!(alerts[0]["severity"], "critical");
    assert_eq!(alerts[0]["resolved"], false);

    let resp = app
        .oneshot(get("/api/students/nobody/conversation"))
        .await
        .expect("oneshot");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
