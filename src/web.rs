//! HTTP 接口
//!
//! 所有 handler 共享一个 Arc<OrchestrationContext>；Run 的错误不在 handler 中重试，
//! 只把终态翻译成状态码：400 请求不合法、404 未知 analysis_id、500 未恢复的失败，错误体为 `{error, detail}`。

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::core::{AgentError, OrchestrationContext, Run, RunError, RunStatus, RunSummary};
use crate::memory::Message;

pub type AppState = Arc<OrchestrationContext>;

const ENDPOINTS: &[&str] = &[
    "POST /analyze",
    "POST /analyze/sync",
    "POST /quick-analysis",
    "GET /analysis/{id}",
    "GET /analysis/{id}/status",
    "DELETE /analysis/{id}",
    "GET /analyses",
    "GET /agents/status",
    "POST /chat",
    "GET /tools",
    "GET /health",
];

/// AgentError -> HTTP 响应
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: String,
    detail: String,
    analysis_id: Option<String>,
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        let status = match e {
            AgentError::RunNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: e.kind().to_string(),
            detail: e.to_string(),
            analysis_id: None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        AgentError::InvalidRequest(e.body_text()).into()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    analysis_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind,
            detail: self.detail,
            analysis_id: self.analysis_id,
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct AnalyzeRequest {
    /// 缺省使用 app.default_query；显式给出空白串为 400
    pub query: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    session_id: String,
}

#[derive(Serialize)]
struct StartedResponse {
    analysis_id: String,
    session_id: String,
    status: &'static str,
    message: String,
}

#[derive(Serialize)]
struct StatusResponse {
    analysis_id: String,
    session_id: String,
    status: RunStatus,
    progress: String,
    turns: usize,
}

/// 完整的分析结果：对话 + 最终建议
#[derive(Serialize)]
pub struct AnalysisResponse {
    analysis_id: String,
    session_id: String,
    query: String,
    status: RunStatus,
    progress: String,
    turns: usize,
    messages: Vec<Message>,
    final_recommendations: Option<String>,
    error: Option<RunError>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Run> for AnalysisResponse {
    fn from(run: Run) -> Self {
        Self {
            analysis_id: run.run_id,
            session_id: run.session_id,
            query: run.query,
            status: run.status,
            progress: run.progress_note,
            turns: run.turns,
            messages: run.conversation.messages().to_vec(),
            final_recommendations: run.final_result,
            error: run.error,
            created_at: run.created_at,
            updated_at: run.updated_at,
        }
    }
}

#[derive(Serialize)]
struct AnalysesResponse {
    count: usize,
    analyses: Vec<RunSummary>,
}

#[derive(Serialize)]
struct AgentInfo {
    name: String,
    description: String,
    tools: Option<Vec<String>>,
}

#[derive(Serialize)]
struct AgentsStatusResponse {
    supervisor_initialized: bool,
    tools_initialized: bool,
    agents: Vec<AgentInfo>,
    endpoints: &'static [&'static str],
}

#[derive(Serialize)]
struct TokenUsageBody {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    supervisor_initialized: bool,
    tools_initialized: bool,
    active_analyses: usize,
    token_usage: TokenUsageBody,
}

/// 构建路由（含宽松 CORS）
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .route("/analyze/sync", post(analyze_sync))
        .route("/quick-analysis", post(quick_analysis))
        .route("/analysis/:id", get(get_analysis).delete(delete_analysis))
        .route("/analysis/:id/status", get(get_analysis_status))
        .route("/analyses", get(list_analyses))
        .route("/agents/status", get(agents_status))
        .route("/chat", post(chat))
        .route("/tools", get(list_tools))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn resolve(state: &OrchestrationContext, req: AnalyzeRequest) -> (String, String) {
    let query = req
        .query
        .unwrap_or_else(|| state.config().app.default_query.clone());
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "default".to_string());
    (query, session_id)
}

/// 同步执行的结果：失败的 Run 以 500 返回，并附上 analysis_id 以便后续查询
fn sync_response(run: Run) -> Result<Json<AnalysisResponse>, ApiError> {
    if run.status == RunStatus::Failed {
        let (kind, detail) = run
            .error
            .as_ref()
            .map(|e| (e.kind.clone(), e.message.clone()))
            .unwrap_or_else(|| ("internal_error".to_string(), run.progress_note.clone()));
        return Err(ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind,
            detail,
            analysis_id: Some(run.run_id),
        });
    }
    Ok(Json(run.into()))
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Stock Analysis Multi-Agent API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (prompt_tokens, completion_tokens, total_tokens) = state.token_usage();
    Json(HealthResponse {
        status: "healthy",
        supervisor_initialized: state.supervisor_initialized(),
        tools_initialized: state.tools_initialized(),
        active_analyses: state.controller().store().len().await,
        token_usage: TokenUsageBody {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        },
    })
}

/// 单智能体直接对话，不创建 analysis
async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "default".to_string());
    let response = state.chat(&req.message).await?;
    Ok(Json(ChatResponse { response, session_id }))
}

async fn list_tools(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let tools = state.tool_names().await?;
    Ok(Json(serde_json::json!({ "tools": tools })))
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartedResponse>), ApiError> {
    let Json(req) = payload?;
    let (query, session_id) = resolve(&state, req);
    let analysis_id = state.controller().start(&query, &session_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse {
            message: format!("Analysis started for query: {}", query.trim()),
            analysis_id,
            session_id,
            status: "started",
        }),
    ))
}

async fn analyze_sync(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let Json(req) = payload?;
    let (query, session_id) = resolve(&state, req);
    let run = state.controller().run_sync(&query, &session_id).await?;
    sync_response(run)
}

async fn quick_analysis(State(state): State<AppState>) -> Result<Json<AnalysisResponse>, ApiError> {
    let query = state.config().app.default_query.clone();
    let run = state.controller().run_sync(&query, "quick").await?;
    sync_response(run)
}

async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let run = state.controller().get_result(&id).await?;
    Ok(Json(run.into()))
}

async fn get_analysis_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let s = state.controller().get_status(&id).await?;
    Ok(Json(StatusResponse {
        analysis_id: s.analysis_id,
        session_id: s.session_id,
        status: s.status,
        progress: s.progress,
        turns: s.turns,
    }))
}

async fn delete_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.controller().delete(&id).await?;
    Ok(Json(serde_json::json!({
        "message": "Analysis deleted",
        "analysis_id": id,
    })))
}

async fn list_analyses(State(state): State<AppState>) -> Json<AnalysesResponse> {
    let analyses = state.controller().list().await;
    Json(AnalysesResponse {
        count: analyses.len(),
        analyses,
    })
}

async fn agents_status(State(state): State<AppState>) -> Json<AgentsStatusResponse> {
    let agents = state
        .agents()
        .agents
        .iter()
        .map(|a| AgentInfo {
            name: a.name.clone(),
            description: a.description.clone(),
            tools: a.tools.clone(),
        })
        .collect();
    Json(AgentsStatusResponse {
        supervisor_initialized: state.supervisor_initialized(),
        tools_initialized: state.tools_initialized(),
        agents,
        endpoints: ENDPOINTS,
    })
}
