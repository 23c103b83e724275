//! HTTP server for context assembly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/courses` | Registered courses with material counts |
//! | `POST` | `/context` | Build a context for one course |
//! | `POST` | `/context/multi` | Build a combined context across courses |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! tutoring clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use course_context_core::error::ContextError;
use course_context_core::models::{CourseContext, MultiCourseContext};

use crate::engine::{Engine, OptionOverrides};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    /// Loaded corpora, assembler, and its cache; shared by every request.
    engine: Arc<Engine>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(engine: Engine) -> anyhow::Result<()> {
    let bind_addr = engine.config.server.bind.clone();
    let app = build_router(Arc::new(engine));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("Context server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/courses", get(handle_courses))
        .route("/context", post(handle_context))
        .route("/context/multi", post(handle_multi))
        .layer(cors)
        .with_state(AppState { engine })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ContextError> for AppError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::InvalidOptions(_) => bad_request(err.to_string()),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn require_question(question: &str) -> Result<(), AppError> {
    if question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /courses ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CourseEntry {
    id: String,
    code: String,
    name: String,
    active: bool,
    material_count: usize,
}

#[derive(Serialize)]
struct CoursesResponse {
    courses: Vec<CourseEntry>,
}

async fn handle_courses(State(state): State<AppState>) -> Json<CoursesResponse> {
    let registry = state.engine.assembler.registry();
    let courses = registry
        .courses()
        .into_iter()
        .map(|c| CourseEntry {
            material_count: registry.corpus(&c.id).map(|corpus| corpus.len()).unwrap_or(0),
            id: c.id,
            code: c.code,
            name: c.name,
            active: c.active,
        })
        .collect();
    Json(CoursesResponse { courses })
}

// ============ POST /context ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextRequest {
    course_id: String,
    question: String,
    #[serde(default)]
    options: OptionOverrides,
    #[serde(default)]
    history: Option<Vec<String>>,
}

async fn handle_context(
    State(state): State<AppState>,
    Json(req): Json<ContextRequest>,
) -> Result<Json<CourseContext>, AppError> {
    require_question(&req.question)?;
    let engine = &state.engine;
    if engine.assembler.registry().course(&req.course_id).is_none() {
        return Err(not_found(format!("course not found: {}", req.course_id)));
    }

    let options = engine.options(&req.options);
    let ctx = match &req.history {
        Some(history) => {
            engine
                .assembler
                .build_context_with_history(&req.course_id, &req.question, &options, history)
                .await?
        }
        None => {
            engine
                .assembler
                .build_context(&req.course_id, &req.question, &options)
                .await?
        }
    };

    Ok(Json(ctx))
}

// ============ POST /context/multi ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiRequest {
    user_id: String,
    question: String,
    #[serde(default)]
    course_ids: Option<Vec<String>>,
    #[serde(default)]
    options: OptionOverrides,
}

async fn handle_multi(
    State(state): State<AppState>,
    Json(req): Json<MultiRequest>,
) -> Result<Json<MultiCourseContext>, AppError> {
    require_question(&req.question)?;
    let engine = &state.engine;
    let options = engine.options(&req.options);

    let multi = engine
        .multi
        .build_multi_course_context(&req.user_id, &req.question, req.course_ids.as_deref(), &options)
        .await?;

    Ok(Json(multi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    async fn spawn_server() -> (TempDir, String) {
        spawn_server_with(
            r#"{
                "courses": [
                    {"id": "cs101", "code": "CS101", "name": "Intro to Programming"},
                    {"id": "math201", "code": "MATH201", "name": "Linear Algebra"}
                ],
                "enrollments": {"alice": ["cs101", "math201"]}
            }"#,
            r#"[
                {"id": "loops", "courseId": "cs101", "type": "lecture", "title": "Loops",
                 "content": "A while loop repeats until its condition becomes false.", "week": 2},
                {"id": "eigen", "courseId": "math201", "type": "lecture", "title": "Eigenvalues",
                 "content": "An eigenvalue scales its eigenvector under a linear map."}
            ]"#,
        )
        .await
    }

    async fn spawn_server_with(catalog: &str, materials: &str) -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("materials");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("catalog.json"), catalog).unwrap();
        std::fs::write(root.join("materials.json"), materials).unwrap();

        let toml = format!("[materials]\nroot = \"{}\"\n", root.display());
        let engine = Engine::load(parse_config(&toml).unwrap()).await.unwrap();
        let app = build_router(Arc::new(engine));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (tmp, format!("http://{}", addr))
    }

    #[tokio::test]
    async fn test_health_and_courses() {
        let (_tmp, base) = spawn_server().await;
        let client = reqwest::Client::new();

        let health: Value = client.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let courses: Value = client.get(format!("{}/courses", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(courses["courses"].as_array().unwrap().len(), 2);
        assert_eq!(courses["courses"][0]["materialCount"], 1);
    }

    #[tokio::test]
    async fn test_context_endpoint() {
        let (_tmp, base) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/context", base))
            .json(&json!({
                "courseId": "cs101",
                "question": "how does a while loop stop",
                "options": {"minRelevance": 0.0},
                "history": ["for loops"]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["courseId"], "cs101");
        assert_eq!(body["materials"][0]["id"], "loops");
        assert!(body["contextText"].as_str().unwrap().contains("Loops"));
    }

    #[tokio::test]
    async fn test_context_errors() {
        let (_tmp, base) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/context", base))
            .json(&json!({"courseId": "nope", "question": "anything"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "not_found");

        let resp = client
            .post(format!("{}/context", base))
            .json(&json!({"courseId": "cs101", "question": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(format!("{}/context", base))
            .json(&json!({"courseId": "cs101", "question": "loops", "options": {"maxTokens": 0}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_multi_endpoint() {
        let (_tmp, base) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/context/multi", base))
            .json(&json!({
                "userId": "alice",
                "question": "MATH201 eigenvalue question",
                "options": {"minRelevance": 0.0, "maxTokens": 400}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["courseIds"][0], "math201");
        assert!(body["totalTokens"].as_u64().unwrap() <= 400);
        assert!(body["combinedText"].as_str().unwrap().starts_with("## MATH201: Linear Algebra"));
    }

    #[tokio::test]
    async fn test_multi_endpoint_with_no_courses() {
        let (_tmp, base) = spawn_server_with("{}", "[]").await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{}/context/multi", base))
            .json(&json!({"userId": "alice", "question": "eigenvalues"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert!(body["courseIds"].as_array().unwrap().is_empty());
    }
}
