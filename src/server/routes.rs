//! Axum route handlers for the skill runtime HTTP server.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::skills::{InvocationRequest, InvocationResult, SkillEngine, SkillError, VersionToken};
use crate::store::{AuditQuery, Binding};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SkillEngine>,
}

impl AppState {
    pub fn new(engine: Arc<SkillEngine>) -> Self {
        Self { engine }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

/// HTTP status for a stable error code.
fn status_for(code: &str) -> StatusCode {
    match code {
        "validation" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "permissions" => StatusCode::FORBIDDEN,
        "dependency" => StatusCode::FAILED_DEPENDENCY,
        "execution" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn skill_error(e: SkillError) -> ApiError {
    api_error(status_for(e.code()), e)
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/skills", get(list_skills_handler))
        .route("/skills/reload", post(reload_handler))
        .route("/skills/:name", get(get_skill_handler))
        .route("/skills/:name/invoke", post(invoke_handler))
        .route("/invocations", get(list_invocations_handler))
        .route("/bindings", get(list_bindings_handler).post(upsert_binding_handler))
        .route("/bindings/:id", delete(delete_binding_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health - liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "skill-runtime",
        "skills": state.engine.registry().len(),
    }))
}

/// GET /skills
async fn list_skills_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.list_skills())
}

#[derive(Debug, Deserialize)]
struct VersionParams {
    #[serde(default)]
    version: VersionToken,
}

/// GET /skills/:name?version=
async fn get_skill_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<VersionParams>,
) -> Result<impl IntoResponse, ApiError> {
    let def = state
        .engine
        .describe(&name, &params.version)
        .map_err(skill_error)?;
    Ok(Json(def.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
struct InvokeBody {
    #[serde(default)]
    version: VersionToken,
    #[serde(alias = "orgScope", alias = "orgId")]
    org_id: String,
    #[serde(default, alias = "actorId")]
    actor_id: Option<String>,
    #[serde(default, alias = "args", alias = "inputs")]
    arguments: Map<String, Value>,
}

/// POST /skills/:name/invoke
///
/// Always answers with an `InvocationResult`; the status code reflects the
/// error code of a failed invocation.
async fn invoke_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<InvokeBody>,
) -> (StatusCode, Json<InvocationResult>) {
    let request = InvocationRequest {
        skill: name,
        version: body.version,
        org_id: body.org_id,
        actor_id: body.actor_id,
        arguments: body.arguments,
    };
    let result = state.engine.invoke(request).await;
    let status = result.error_code().map_or(StatusCode::OK, status_for);
    (status, Json(result))
}

/// POST /skills/reload
async fn reload_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let loaded = state.engine.reload().await.map_err(skill_error)?;
    Ok(Json(json!({
        "loaded": loaded,
        "rejected": state.engine.rejected_documents(),
    })))
}

/// GET /invocations?org_id&skill&limit&offset
async fn list_invocations_handler(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state
        .engine
        .audit_store()
        .list(&query)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(json!({
        "invocations": records,
        "limit": query.effective_limit(),
        "offset": query.offset,
    })))
}

#[derive(Debug, Deserialize)]
struct OrgParams {
    org_id: String,
}

/// GET /bindings?org_id
async fn list_bindings_handler(
    State(state): State<AppState>,
    Query(params): Query<OrgParams>,
) -> Result<impl IntoResponse, ApiError> {
    let bindings = state
        .engine
        .bindings()
        .list_bindings(&params.org_id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(bindings))
}

/// POST /bindings
async fn upsert_binding_handler(
    State(state): State<AppState>,
    Json(binding): Json<Binding>,
) -> Result<impl IntoResponse, ApiError> {
    let skill = binding.skill.clone();
    let stored = state
        .engine
        .bindings()
        .upsert_binding(binding)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    if !state.engine.registry().contains(&skill) {
        log::warn!("Binding {} refers to unregistered skill {}", stored.id, skill);
    }
    Ok((StatusCode::CREATED, Json(stored)))
}

/// DELETE /bindings/:id
async fn delete_binding_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .engine
        .bindings()
        .delete_binding(id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("Binding {} not found", id)))
    }
}

#[derive(Debug, Deserialize)]
struct StatsParams {
    #[serde(default)]
    org_id: Option<String>,
    #[serde(default = "default_window_hours")]
    window_hours: i64,
}

fn default_window_hours() -> i64 {
    24
}

/// GET /stats?org_id&window_hours
async fn stats_handler(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.window_hours <= 0 {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "window_hours must be positive",
        ));
    }
    let since = Utc::now() - Duration::hours(params.window_hours);
    let stats = state
        .engine
        .audit_store()
        .usage_stats(params.org_id.as_deref(), since)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(Json(stats))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::StaticBackend;
    use crate::skills::{AuditMode, EngineConfig, SkillDefinition};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SKILL: &str = r#"
name: pitch_draft
version: "1.2.0"
description: Draft pitch emails
inputs:
  - name: topic
    type: string
    required: true
outputs:
  - name: drafts
    type: array
prompt:
  system: You write pitches.
  user: "Topic: {{topic}}"
"#;

    fn setup() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(
            StaticBackend::new(r#"{"drafts": ["hello"], "confidence": 0.9}"#).with_usage(10, 5),
        );
        let engine = SkillEngine::builder(store.clone(), backend)
            .bindings(store.clone())
            .audit_store(store.clone())
            .config(EngineConfig {
                audit_mode: AuditMode::Inline,
                ..Default::default()
            })
            .build();
        engine
            .register(SkillDefinition::from_yaml(SKILL).unwrap())
            .unwrap();
        let app = app_router(AppState::new(Arc::new(engine)));
        (store, app)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_, app) = setup();
        let (status, json) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::VERSION);
        assert_eq!(json["skills"], 1);
    }

    #[tokio::test]
    async fn test_list_and_get_skill() {
        let (_, app) = setup();
        let (status, json) = call(&app, "GET", "/skills", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["name"], "pitch_draft");
        assert_eq!(json[0]["latest"], "1.2.0");

        let (status, json) = call(&app, "GET", "/skills/pitch_draft?version=1.2.0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["description"], "Draft pitch emails");

        let (status, _) = call(&app, "GET", "/skills/pitch_draft?version=3.0.0", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invoke_success_and_validation_failure() {
        let (store, app) = setup();
        let (status, json) = call(
            &app,
            "POST",
            "/skills/pitch_draft/invoke",
            Some(json!({"org_id": "org-1", "arguments": {"topic": "jazz"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["outputs"]["drafts"][0], "hello");
        assert_eq!(json["metadata"]["tokens_used"], 15);

        let (status, json) = call(
            &app,
            "POST",
            "/skills/pitch_draft/invoke",
            Some(json!({"orgScope": "org-1", "args": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
        assert_eq!(json["errors"][0]["code"], "validation");
        assert_eq!(json["errors"][0]["field"], "topic");

        assert_eq!(store.audit_records().len(), 2);
    }

    #[tokio::test]
    async fn test_binding_lifecycle_gates_invocation() {
        let (_, app) = setup();
        let (status, binding) = call(
            &app,
            "POST",
            "/bindings",
            Some(json!({"org_id": "org-1", "skill": "pitch_draft", "enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, json) = call(
            &app,
            "POST",
            "/skills/pitch_draft/invoke",
            Some(json!({"org_id": "org-1", "arguments": {"topic": "jazz"}})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["errors"][0]["code"], "permissions");

        let (_, list) = call(&app, "GET", "/bindings?org_id=org-1", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let id = binding["id"].as_str().unwrap();
        let (status, _) = call(&app, "DELETE", &format!("/bindings/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "DELETE", &format!("/bindings/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invocations_and_stats() {
        let (_, app) = setup();
        for topic in ["a", "b", "c"] {
            call(
                &app,
                "POST",
                "/skills/pitch_draft/invoke",
                Some(json!({"org_id": "org-1", "arguments": {"topic": topic}})),
            )
            .await;
        }

        let (status, json) = call(&app, "GET", "/invocations?org_id=org-1&limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["invocations"].as_array().unwrap().len(), 2);
        assert_eq!(json["limit"], 2);

        let (status, json) = call(&app, "GET", "/stats?org_id=org-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_invocations"], 3);
        assert_eq!(json["total_tokens"], 45);

        let (status, _) = call(&app, "GET", "/stats?window_hours=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reload_replaces_registered_skills() {
        let (store, app) = setup();
        store.add_definition(SkillDefinition::from_yaml("name: fresh\nversion: \"1.0.0\"\n").unwrap());

        let (status, json) = call(&app, "POST", "/skills/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["loaded"], 1);

        let (_, json) = call(&app, "GET", "/skills", None).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "fresh");
    }
}
