//! Integration tests for the study REST API.
//!
//! Each test spins up an Axum server on a random port with an in-memory
//! sheet and stub collaborators, then drives it over HTTP with reqwest.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use study_runner::config::{RetryPolicy, StudyConfig};
use study_runner::error::{LlmError, RetrievalError};
use study_runner::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use study_runner::retrieval::{DocumentRetriever, Passage};
use study_runner::store::{MemorySheet, RecordStore, UpsertRecorder};
use study_runner::study::{ChatResponder, StudyManager, StudyRouteState, study_routes};

/// Stub LLM provider for integration tests (no real API calls).
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: "Rozumiem. Co wtedy robisz?".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        })
    }
}

struct StubRetriever;

#[async_trait]
impl DocumentRetriever for StubRetriever {
    async fn retrieve(&self, _query: &str, _limit: usize) -> Result<Vec<Passage>, RetrievalError> {
        Ok(vec![Passage {
            source: "workbook.md".to_string(),
            text: "Bądź dla siebie życzliwy.".to_string(),
        }])
    }
}

struct TestServer {
    base: String,
    sheet: Arc<MemorySheet>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start(chat_unlock_after: Duration) -> Self {
        let config = StudyConfig {
            chat_unlock_after,
            store_retry: RetryPolicy::none(),
            ..StudyConfig::default()
        };
        let sheet = Arc::new(MemorySheet::new());
        let store: Arc<dyn RecordStore> = sheet.clone();
        let recorder = Arc::new(UpsertRecorder::new(store, config.store_retry));
        let responder = ChatResponder::new(Arc::new(StubLlm), Arc::new(StubRetriever), &config);
        let manager = Arc::new(StudyManager::new(recorder, responder, &config));
        let app = study_routes(StudyRouteState { manager });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting connections.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base: format!("http://127.0.0.1:{}", port),
            sheet,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn start_session(&self) -> String {
        let (status, view) = self.post("/api/sessions", json!({})).await;
        assert_eq!(status, 201);
        assert_eq!(view["screen"], "consent");
        view["id"].as_str().unwrap().to_string()
    }

    /// Stored row for `id` as header → cell.
    async fn row(&self, id: &str) -> BTreeMap<String, String> {
        let rows = self.sheet.snapshot().await;
        let headers = rows[0].clone();
        let row = rows
            .iter()
            .skip(1)
            .find(|r| r.first().map(String::as_str) == Some(id))
            .cloned()
            .unwrap();
        headers
            .into_iter()
            .zip(row.into_iter().chain(std::iter::repeat(String::new())))
            .collect()
    }
}

/// Answer every item of every section listed by the instruments endpoint.
fn answer_all(sections: &Value, rating: u8) -> Value {
    let mut answers = serde_json::Map::new();
    for section in sections.as_array().unwrap() {
        let mut items = serde_json::Map::new();
        for item in section["instrument"]["items"].as_array().unwrap() {
            items.insert(item["key"].as_str().unwrap().to_string(), json!(rating));
        }
        answers.insert(section["key"].as_str().unwrap().to_string(), Value::Object(items));
    }
    Value::Object(answers)
}

fn demographics() -> Value {
    json!({
        "age": 30,
        "gender": "Mężczyzna",
        "education": "Średnie",
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let server = TestServer::start(Duration::ZERO).await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn full_participant_run_fills_one_row() {
    let server = TestServer::start(Duration::ZERO).await;
    let (_, instruments) = server.get("/api/instruments").await;
    assert_eq!(instruments["pretest"].as_array().unwrap().len(), 3);
    assert_eq!(instruments["posttest"].as_array().unwrap().len(), 2);

    let id = server.start_session().await;
    let base = format!("/api/sessions/{}", id);

    let (status, out) = server
        .post(&format!("{base}/consent"), json!({"agreed": true}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(out["view"]["screen"], "pretest");
    assert_eq!(out["save"]["status"], "saved");
    let group = out["view"]["group"].clone();
    assert!(group == "A" || group == "B");

    let (status, out) = server
        .post(
            &format!("{base}/pretest"),
            json!({
                "demographics": demographics(),
                "answers": answer_all(&instruments["pretest"], 4),
            }),
        )
        .await;
    assert_eq!(status, 200, "{out}");
    assert_eq!(out["view"]["screen"], "chat_instruction");

    let (_, out) = server.post(&format!("{base}/chat/begin"), json!({})).await;
    assert_eq!(out["view"]["screen"], "chat");
    assert_eq!(out["view"]["conversation"].as_array().unwrap().len(), 1);

    let (status, out) = server
        .post(
            &format!("{base}/chat/messages"),
            json!({"text": "Zwykle idę na spacer"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(out["reply"], "Rozumiem. Co wtedy robisz?");
    assert_eq!(out["view"]["conversation"].as_array().unwrap().len(), 3);

    let (status, out) = server.post(&format!("{base}/chat/end"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(out["view"]["screen"], "posttest");

    let (_, out) = server
        .post(
            &format!("{base}/posttest"),
            json!({
                "answers": answer_all(&instruments["posttest"], 2),
                "reflection": "O samowspółczuciu",
            }),
        )
        .await;
    assert_eq!(out["view"]["screen"], "thankyou");
    assert_eq!(out["view"]["finished"], true);

    let (_, out) = server
        .post(
            &format!("{base}/feedback"),
            json!({"positive": "Miła rozmowa", "negative": ""}),
        )
        .await;
    assert_eq!(out["save"]["status"], "saved");
    assert_eq!(out["view"]["feedback_submitted"], true);

    let rows = server.sheet.snapshot().await;
    assert_eq!(rows.len(), 2, "header plus one participant row");

    let row = server.row(&id).await;
    assert_eq!(row["group"], group.as_str().unwrap());
    assert_eq!(row["status"], "finished_with_feedback");
    assert_eq!(row["demographics_age"], "30");
    assert_eq!(row["demographics_gender"], "Mężczyzna");
    assert_eq!(row["pre_self_compassion_SCS_1"], "4");
    assert_eq!(row["post_self_compassion_SCS_1"], "2");
    assert_eq!(row["post_reflection"], "O samowspółczuciu");
    assert_eq!(row["feedback_final_positive"], "Miła rozmowa");
    assert!(row["conversation_log"].contains("User: Zwykle idę na spacer"));
    assert!(!row["timestamp_start"].is_empty());
    assert!(!row["timestamp_feedback_submit"].is_empty());
}

#[tokio::test]
async fn repeated_finish_is_a_no_op() {
    let server = TestServer::start(Duration::ZERO).await;
    let (_, instruments) = server.get("/api/instruments").await;
    let id = server.start_session().await;
    let base = format!("/api/sessions/{}", id);

    server
        .post(&format!("{base}/consent"), json!({"agreed": true}))
        .await;
    server
        .post(
            &format!("{base}/pretest"),
            json!({
                "demographics": demographics(),
                "answers": answer_all(&instruments["pretest"], 3),
            }),
        )
        .await;
    server.post(&format!("{base}/chat/begin"), json!({})).await;
    server.post(&format!("{base}/chat/end"), json!({})).await;
    server
        .post(
            &format!("{base}/posttest"),
            json!({"answers": answer_all(&instruments["posttest"], 3)}),
        )
        .await;

    let (status, first) = server.post(&format!("{base}/finish"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(first["save"]["status"], "saved");
    let before = server.row(&id).await;

    let (status, second) = server.post(&format!("{base}/finish"), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(second["save"]["status"], "skipped");
    let (_, third) = server
        .post(&format!("{base}/feedback"), json!({"positive": "za późno"}))
        .await;
    assert_eq!(third["save"]["status"], "skipped");

    assert_eq!(server.row(&id).await, before);
    assert_eq!(before["status"], "finished_without_feedback");
}

#[tokio::test]
async fn invalid_input_and_order_are_rejected() {
    let server = TestServer::start(Duration::from_secs(600)).await;
    let id = server.start_session().await;
    let base = format!("/api/sessions/{}", id);

    let (status, body) = server
        .post(&format!("{base}/consent"), json!({"agreed": false}))
        .await;
    assert_eq!(status, 422);
    assert_eq!(body["issues"][0]["field"], "agreed");

    let (status, _) = server.post(&format!("{base}/chat/end"), json!({})).await;
    assert_eq!(status, 409);

    server
        .post(&format!("{base}/consent"), json!({"agreed": true}))
        .await;
    let (status, body) = server
        .post(
            &format!("{base}/pretest"),
            json!({"demographics": {"age": 12}, "answers": {}}),
        )
        .await;
    assert_eq!(status, 422);
    let fields: Vec<&str> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["field"].as_str())
        .collect();
    assert!(fields.contains(&"demographics.age"));

    // Nothing beyond the consent milestone was written.
    let row = server.row(&id).await;
    assert_eq!(row["status"], "consent_given");
    assert!(row.get("demographics_age").is_none_or(|v| v.is_empty()));
}

#[tokio::test]
async fn chat_cannot_end_before_unlock() {
    let server = TestServer::start(Duration::from_secs(600)).await;
    let (_, instruments) = server.get("/api/instruments").await;
    let id = server.start_session().await;
    let base = format!("/api/sessions/{}", id);

    server
        .post(&format!("{base}/consent"), json!({"agreed": true}))
        .await;
    server
        .post(
            &format!("{base}/pretest"),
            json!({
                "demographics": demographics(),
                "answers": answer_all(&instruments["pretest"], 3),
            }),
        )
        .await;
    let (_, out) = server.post(&format!("{base}/chat/begin"), json!({})).await;
    assert_eq!(out["view"]["chat"]["can_end_chat"], false);

    let (status, body) = server.post(&format!("{base}/chat/end"), json!({})).await;
    assert_eq!(status, 409);
    assert!(body["remaining_secs"].as_u64().unwrap() > 590);

    let (_, view) = server.get(&base).await;
    assert_eq!(view["screen"], "chat");
}

#[tokio::test]
async fn unknown_and_malformed_session_ids() {
    let server = TestServer::start(Duration::ZERO).await;

    let (status, _) = server
        .get(&format!("/api/sessions/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, 404);

    let (status, _) = server.get("/api/sessions/not-a-uuid").await;
    assert_eq!(status, 400);

    let id = server.start_session().await;
    let resp = server
        .client
        .delete(format!("{}/api/sessions/{}", server.base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 204);
    let (status, _) = server.get(&format!("/api/sessions/{}", id)).await;
    assert_eq!(status, 404);
}
