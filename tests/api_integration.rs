//! Integration tests for the agent HTTP API.
//!
//! Most tests drive the router in-process with `oneshot`; one smoke test runs
//! a real server on a random port and talks to it over reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::Timelike;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;
use uuid::Uuid;

use planner_agent::agent::Orchestrator;
use planner_agent::agent::intent::Intent;
use planner_agent::api::{self, AppState};
use planner_agent::config::{Environment, OrchestratorConfig, ProcessorConfig, ServerConfig};
use planner_agent::error::LlmError;
use planner_agent::jobs::{Job, JobInput, JobProcessor};
use planner_agent::llm::{ChatMessage, ChatOptions, ChatResponse, LlmProvider};
use planner_agent::nodes::{Category, Node, NodeType};
use planner_agent::store::{Database, LibSqlBackend};
use planner_agent::workers::WorkerRegistry;

const SECRET: &str = "s3cret";

/// Answers classification prompts from keywords in the request text.
struct KeywordLlm;

#[async_trait]
impl LlmProvider for KeywordLlm {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        _options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let reply = if prompt.contains("dentist") {
            json!({
                "intent": "SCHEDULE_REQUEST",
                "confidence": 0.9,
                "entities": {"title": "Dentist", "day": "friday"}
            })
        } else if prompt.contains("CS101") {
            json!({
                "intent": "COURSE_TASK",
                "confidence": 0.93,
                "entities": {"title": "CS101 homework", "course": "CS101"}
            })
        } else if prompt.contains("milk") {
            json!({
                "intent": "QUICK_TODO",
                "confidence": 0.88,
                "entities": {"title": "Buy milk"}
            })
        } else {
            json!({"intent": "QUICK_TODO", "confidence": 0.4, "entities": {}})
        };
        Ok(ChatResponse {
            message: ChatMessage::assistant(reply.to_string()),
        })
    }
}

struct TestApp {
    router: Router,
    db: Arc<dyn Database>,
}

async fn test_app(environment: Environment) -> TestApp {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let llm: Arc<dyn LlmProvider> = Arc::new(KeywordLlm);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&db),
        Arc::clone(&llm),
        OrchestratorConfig::default(),
    ));
    let processor = Arc::new(JobProcessor::new(
        Arc::clone(&db),
        Some(llm),
        Arc::new(WorkerRegistry::new()),
        ProcessorConfig::default(),
    ));
    let config = ServerConfig {
        environment,
        internal_secret: Some(SecretString::from(SECRET)),
        ..ServerConfig::default()
    };
    let router = api::router(AppState {
        db: Arc::clone(&db),
        orchestrator,
        processor,
        config: Arc::new(config),
    });
    TestApp { router, db }
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn interact(app: &TestApp, user: &str, body: Value) -> (StatusCode, Value) {
    send(app, request("POST", "/agent/interact", Some(user), Some(body))).await
}

/// A job of `user` that has already failed permanently.
async fn failed_job(db: &Arc<dyn Database>, user: &str) -> Uuid {
    let input = JobInput {
        user_input: "broken".into(),
        ..Default::default()
    };
    let job = Job::new(user, None, Intent::QuickTodo, &input, 3);
    db.insert_job(&job).await.unwrap();
    let claimed = db
        .claim_next_job(job.worker_type, "task-test")
        .await
        .unwrap()
        .unwrap();
    assert!(db.start_job(claimed.id, "task-test").await.unwrap());
    assert!(db.fail_job(claimed.id, "task-test", "boom").await.unwrap());
    claimed.id
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app(Environment::Development).await;
    let (status, body) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_user_header_is_unauthorized() {
    let app = test_app(Environment::Development).await;
    let (status, body) = send(
        &app,
        request("POST", "/agent/interact", None, Some(json!({"input": "hi"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("x-user-id"));
}

#[tokio::test]
async fn interact_validation_errors_are_bad_request() {
    let app = test_app(Environment::Development).await;

    let (status, _) = interact(&app, "u1", json!({"input": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = interact(&app, "u1", json!({"input": "x".repeat(4001)})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = interact(&app, "u1", json!({"input": "hi", "threadId": "nope"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn foreign_thread_is_rejected() {
    let app = test_app(Environment::Development).await;
    let (_, body) = interact(&app, "u1", json!({"input": "buy milk"})).await;
    let thread_id = body["threadId"].as_str().unwrap().to_string();

    let (status, body) = interact(&app, "u2", json!({"input": "buy milk", "threadId": thread_id})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn course_request_creates_course_task() {
    let app = test_app(Environment::Development).await;
    let course = Node::new("u1", NodeType::Container, "CS101").with_category(Category::Course);
    app.db.insert_node(&course).await.unwrap();

    let (status, body) = interact(&app, "u1", json!({"input": "CS101 homework due Friday"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PROCESSING");
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, job) = send(&app, request("GET", &format!("/agent/jobs/{job_id}"), Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["intent"], "COURSE_TASK");
    assert_eq!(job["worker_type"], "task");

    let (status, processed) = send(
        &app,
        request("POST", "/agent/jobs/process", None, Some(json!({"maxJobs": 5}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(processed["processed"], 1);

    let (_, job) = send(&app, request("GET", &format!("/agent/jobs/{job_id}"), Some("u1"), None)).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100);
    let node_id: Uuid = job["output_data"]["created_nodes"][0]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let node = app.db.get_node(node_id).await.unwrap().unwrap();
    assert_eq!(node.node_type, NodeType::Task);
    assert_eq!(node.category, Some(Category::Course));
    let relations = app.db.list_relations(node_id).await.unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].to_id, course.id);
}

#[tokio::test]
async fn clarification_round_trip_over_http() {
    let app = test_app(Environment::Development).await;

    let (_, first) = interact(&app, "u1", json!({"input": "add something"})).await;
    assert_eq!(first["status"], "CLARIFICATION_NEEDED");
    assert_eq!(first["serverState"]["missingFields"], json!(["title"]));
    let thread_id = first["threadId"].as_str().unwrap().to_string();

    let (_, second) = interact(
        &app,
        "u1",
        json!({"input": "Water the plants", "threadId": thread_id}),
    )
    .await;
    assert_eq!(second["status"], "PROCESSING");
    assert_eq!(second["threadId"], thread_id.as_str());

    let (status, threads) = send(&app, request("GET", "/agent/threads", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let threads = threads.as_array().unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0]["threadId"], thread_id.as_str());
    assert_eq!(threads[0]["turnCount"], 2);
}

#[tokio::test]
async fn worker_clarification_resumes_on_next_turn() {
    let app = test_app(Environment::Development).await;

    let (_, first) = interact(&app, "u1", json!({"input": "dentist on friday"})).await;
    assert_eq!(first["status"], "PROCESSING");
    let thread_id = first["threadId"].as_str().unwrap().to_string();
    let first_job = first["jobId"].as_str().unwrap().to_string();

    let drain = || request("POST", "/agent/jobs/process", None, Some(json!({"maxJobs": 5})));
    let (_, processed) = send(&app, drain()).await;
    assert_eq!(processed["processed"], 1);

    let (_, job) = send(&app, request("GET", &format!("/agent/jobs/{first_job}"), Some("u1"), None)).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["output_data"]["needs_clarification"], true);
    assert_eq!(job["output_data"]["missing_fields"], json!(["time"]));

    let (status, second) = interact(&app, "u1", json!({"input": "3pm", "threadId": thread_id})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "PROCESSING");
    let second_job = second["jobId"].as_str().unwrap().to_string();
    assert_ne!(second_job, first_job);

    let (_, job) = send(&app, request("GET", &format!("/agent/jobs/{second_job}"), Some("u1"), None)).await;
    assert_eq!(job["intent"], "SCHEDULE_REQUEST");
    assert_eq!(job["input_data"]["partial_data"]["title"], "Dentist");
    assert_eq!(job["input_data"]["partial_data"]["time"], "3pm");

    let (_, processed) = send(&app, drain()).await;
    assert_eq!(processed["processed"], 1);

    let (_, job) = send(&app, request("GET", &format!("/agent/jobs/{second_job}"), Some("u1"), None)).await;
    assert_eq!(job["status"], "completed");
    let node_id: Uuid = job["output_data"]["created_nodes"][0]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    let node = app.db.get_node(node_id).await.unwrap().unwrap();
    assert_eq!(node.node_type, NodeType::TimeBlock);
    assert_eq!(node.title, "Dentist");
    assert_eq!(node.starts_at.unwrap().hour(), 15);

    let (_, threads) = send(&app, request("GET", "/agent/threads", Some("u1"), None)).await;
    assert_eq!(threads[0]["turnCount"], 3);
}

#[tokio::test]
async fn jobs_are_private_to_their_owner() {
    let app = test_app(Environment::Development).await;
    let (_, body) = interact(&app, "u1", json!({"input": "buy milk"})).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, _) = send(&app, request("GET", &format!("/agent/jobs/{job_id}"), Some("u2"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request("DELETE", &format!("/agent/jobs/{job_id}"), Some("u2"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request("GET", "/agent/jobs/not-a-uuid", Some("u1"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_only_while_pending() {
    let app = test_app(Environment::Development).await;
    let (_, body) = interact(&app, "u1", json!({"input": "buy milk"})).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    let uri = format!("/agent/jobs/{job_id}");

    let (status, body) = send(&app, request("DELETE", &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, body) = send(&app, request("DELETE", &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found or cannot be cancelled");

    let (_, job) = send(&app, request("GET", &uri, Some("u1"), None)).await;
    assert_eq!(job["status"], "cancelled");
}

#[tokio::test]
async fn started_job_cannot_be_cancelled() {
    let app = test_app(Environment::Development).await;
    let (_, body) = interact(&app, "u1", json!({"input": "buy milk"})).await;
    let job_id: Uuid = body["jobId"].as_str().unwrap().parse().unwrap();
    let claimed = app
        .db
        .claim_next_job(Intent::QuickTodo.worker_type(), "task-test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, job_id);
    assert!(app.db.start_job(job_id, "task-test").await.unwrap());

    let uri = format!("/agent/jobs/{job_id}");
    let (status, body) = send(&app, request("DELETE", &uri, Some("u1"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Job not found or cannot be cancelled");

    let (_, job) = send(&app, request("GET", &uri, Some("u1"), None)).await;
    assert_eq!(job["status"], "processing");
}

#[tokio::test]
async fn retry_requeues_failed_job() {
    let app = test_app(Environment::Development).await;
    let job_id = failed_job(&app.db, "u1").await;
    let uri = format!("/agent/jobs/{job_id}");

    let (status, _) = send(&app, request("PATCH", &uri, Some("u1"), Some(json!({"action": "explode"})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, job) = send(&app, request("PATCH", &uri, Some("u1"), Some(json!({"action": "retry"})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["progress"], 0);
    assert!(job["error_message"].is_null());
    assert!(job["claimed_by"].is_null());

    // Only failed jobs can be retried.
    let (status, _) = send(&app, request("PATCH", &uri, Some("u1"), Some(json!({"action": "retry"})))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn process_endpoint_checks_secret_in_production() {
    let app = test_app(Environment::Production).await;

    let (status, _) = send(&app, request("POST", "/agent/jobs/process", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .method("POST")
        .uri("/agent/jobs/process")
        .header("x-internal-secret", "guess")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = Request::builder()
        .method("POST")
        .uri("/agent/jobs/process")
        .header("x-internal-secret", SECRET)
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, right).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn process_endpoint_validates_max_jobs() {
    let app = test_app(Environment::Development).await;
    for max_jobs in [0, 51] {
        let (status, _) = send(
            &app,
            request("POST", "/agent/jobs/process", None, Some(json!({"maxJobs": max_jobs}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "maxJobs = {max_jobs}");
    }
}

#[tokio::test]
async fn thread_delete_and_archive() {
    let app = test_app(Environment::Development).await;
    let (_, body) = interact(&app, "u1", json!({"input": "buy milk"})).await;
    let thread_id = body["threadId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request("DELETE", &format!("/agent/threads?threadId={thread_id}"), Some("u2"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        request("DELETE", &format!("/agent/threads?threadId={thread_id}"), Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (status, _) = send(
        &app,
        request("POST", &format!("/agent/threads/{thread_id}/archive"), Some("u1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, threads) = send(&app, request("GET", "/agent/threads?limit=500", Some("u1"), None)).await;
    assert!(threads.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn live_server_smoke() {
    let app = test_app(Environment::Development).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["service"], "planner-agent");

    let response = client
        .post(format!("{base}/agent/interact"))
        .header("x-user-id", "u1")
        .json(&json!({"input": "buy milk"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "PROCESSING");
    assert!(body["displayMessage"].as_str().unwrap().contains("Buy milk"));
}
