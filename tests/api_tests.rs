mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use localm_server::server::{create_router, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{ready, ScriptedModel};

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn chat_request(body: Value) -> Request<Body> {
    post("/api/chat", body)
}

fn chat_body(stream: bool) -> Value {
    json!({
        "model": "coder",
        "messages": [
            {"role": "system", "content": "you write code"},
            {"role": "user", "content": "hello"}
        ],
        "stream": stream
    })
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn loaded_app(dir: &TempDir, pieces: &[&str]) -> Router {
    let model = Arc::new(ScriptedModel::new(pieces, Duration::ZERO));
    let controller = ready(dir, model).await;
    create_router(AppState::new(controller.engine().clone()))
}

fn unloaded_app(dir: &TempDir) -> Router {
    let model = Arc::new(ScriptedModel::new(&["a"], Duration::ZERO));
    let controller = common::controller(dir, model, false);
    create_router(AppState::new(controller.engine().clone()))
}

#[tokio::test]
async fn health_reports_loaded_model() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["a"]).await;

    for uri in ["/", "/api/health"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body, json!({"status": "active", "model_status": "loaded"}));
    }
}

#[tokio::test]
async fn health_is_unavailable_without_a_model() {
    let dir = TempDir::new().unwrap();
    let app = unloaded_app(&dir);

    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert_eq!(body["model_status"], "unloaded");
}

#[tokio::test]
async fn chat_returns_the_full_reply() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["fn ", "main() {}"]).await;

    let response = app.oneshot(chat_request(chat_body(false))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["model"], "coder");
    assert_eq!(body["done"], true);
    assert_eq!(body["message"]["role"], "assistant");
    assert_eq!(body["message"]["content"], "fn main() {}");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert!(body["created_at"].is_string());
    assert_eq!(body["prompt_eval_count"], 1);
    assert_eq!(body["eval_count"], 2);
}

#[tokio::test]
async fn chat_streams_server_sent_events() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["", "fn ", "main", ""]).await;

    let response = app.oneshot(chat_request(chat_body(true))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["content"], "fn ");
    assert_eq!(events[0]["done"], false);
    assert_eq!(events[1]["content"], "main");
    assert_eq!(events[1]["done"], true);
    assert_eq!(events[0]["id"], events[1]["id"]);
    assert_eq!(events[1]["model"], "coder");
}

#[tokio::test]
async fn chat_rejects_invalid_options() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["a"]).await;

    let mut body = chat_body(false);
    body["options"] = json!({"temperature": 5.0});
    let response = app.clone().oneshot(chat_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = read_json(response).await;
    assert_eq!(error["error"]["type"], "invalid_request_error");

    let mut body = chat_body(false);
    body["options"] = json!({"num_ctx": 0});
    let response = app.oneshot(chat_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_rejects_empty_history() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["a"]).await;

    let body = json!({"model": "coder", "messages": []});
    let response = app.oneshot(chat_request(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_is_unavailable_without_a_model() {
    let dir = TempDir::new().unwrap();
    let app = unloaded_app(&dir);

    let response = app.oneshot(chat_request(chat_body(false))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error = read_json(response).await;
    assert_eq!(error["error"]["type"], "service_unavailable");
}

#[tokio::test]
async fn chat_reports_generation_failure() {
    let dir = TempDir::new().unwrap();
    let mut model = ScriptedModel::new(&["a"], Duration::ZERO);
    model.fail_on = Some("hello".to_string());
    let controller = ready(&dir, Arc::new(model)).await;
    let app = create_router(AppState::new(controller.engine().clone()));

    let response = app.oneshot(chat_request(chat_body(false))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = read_json(response).await;
    assert_eq!(error["error"]["type"], "server_error");
}

#[tokio::test]
async fn generate_continues_the_raw_prompt() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["    return a + b", "\n"]).await;

    let body = json!({
        "model": "coder",
        "prompt": "def add(a, b):\n",
        "options": {"num_predict": 32, "temperature": 0.2, "stop": ["\n\n"]}
    });
    let response = app.oneshot(post("/api/generate", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["model"], "coder");
    assert_eq!(body["response"], "    return a + b\n");
    assert_eq!(body["done"], true);
    assert_eq!(body["prompt_eval_count"], 3);
    assert_eq!(body["eval_count"], 2);
    assert!(body["created_at"].is_string());
}

#[tokio::test]
async fn generate_streams_server_sent_events() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["a", "", "b"]).await;

    let body = json!({"model": "coder", "prompt": "x", "stream": true});
    let response = app.oneshot(post("/api/generate", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let events: Vec<Value> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["response"], "a");
    assert_eq!(events[0]["done"], false);
    assert_eq!(events[1]["response"], "b");
    assert_eq!(events[1]["done"], true);
}

#[tokio::test]
async fn generate_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["a"]).await;

    let response = app
        .clone()
        .oneshot(post("/api/generate", json!({"model": "coder", "prompt": ""})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json!({"model": "coder", "prompt": "x", "options": {"num_predict": -1}});
    let response = app.oneshot(post("/api/generate", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = read_json(response).await;
    assert_eq!(error["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn generate_is_unavailable_without_a_model() {
    let dir = TempDir::new().unwrap();
    let app = unloaded_app(&dir);

    let body = json!({"model": "coder", "prompt": "x"});
    let response = app.oneshot(post("/api/generate", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn complete_returns_the_completion() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["return n * fact(n - 1)"]).await;

    let body = json!({"prompt": "def fact(n):"});
    let response = app.oneshot(post("/complete", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body, json!({"completion": "return n * fact(n - 1)"}));
}

#[tokio::test]
async fn complete_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let app = loaded_app(&dir, &["a"]).await;

    let body = json!({"prompt": "x", "max_new_tokens": 0});
    let response = app.clone().oneshot(post("/complete", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(post("/complete", json!({"prompt": ""}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn complete_is_unavailable_without_a_model() {
    let dir = TempDir::new().unwrap();
    let app = unloaded_app(&dir);

    let response = app.oneshot(post("/complete", json!({"prompt": "x"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
