use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use super::artifacts::ArtifactKind;
use super::catalog::{CONVERSION_TYPES, ConversionType, JavaVersionCatalog, java_versions};
use super::capabilities::Capabilities;
use super::events::EventBus;
use super::models::{DependencyChange, Issue, JobSnapshot, LogEntry, Platform};
use super::preview::{MigrationPreview, PreviewService, RepositoryAnalysis, RepositoryLocation};
use super::registry::{JobRegistry, RegistrySettings};
use super::request::MigrationRequest;
use super::workspace::WorkspaceManager;
use crate::errors::{FailureKind, PreviewError, RegistryError};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub registry: JobRegistry,
    pub previews: PreviewService,
}

impl AppState {
    /// Start the registry and a preview service sharing its capabilities and
    /// workspace root.
    pub fn new(settings: RegistrySettings, caps: Capabilities, events: EventBus) -> Self {
        let previews = PreviewService::new(
            caps.clone(),
            WorkspaceManager::new(settings.workspace_root.clone()),
            &settings.policy,
            settings.max_concurrent_jobs,
        );
        Self {
            registry: JobRegistry::start(settings, caps, events),
            previews,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Response payload types ────────────────────────────────────────────

#[derive(Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct JobLogs {
    pub job_id: Uuid,
    pub logs: Vec<LogEntry>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub format: Option<String>,
}

#[derive(Deserialize)]
pub struct AnalyzeUrlQuery {
    pub repo_url: String,
    pub token: Option<String>,
    pub target_version: Option<String>,
}

#[derive(Serialize)]
pub struct UrlAnalysis {
    pub repo_url: String,
    pub platform: Platform,
    pub owner: String,
    pub repo: String,
    pub analysis: RepositoryAnalysis,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    fn with_prefix(self, prefix: &str) -> Self {
        match self {
            ApiError::NotFound(msg) => ApiError::NotFound(format!("{}: {}", prefix, msg)),
            ApiError::BadRequest(msg) => ApiError::BadRequest(format!("{}: {}", prefix, msg)),
            ApiError::Conflict(msg) => ApiError::Conflict(format!("{}: {}", prefix, msg)),
            ApiError::Internal(msg) => ApiError::Internal(format!("{}: {}", prefix, msg)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            RegistryError::Validation(_) => ApiError::BadRequest(e.to_string()),
            RegistryError::ArtifactUnavailable { .. } => ApiError::Conflict(e.to_string()),
            RegistryError::ShuttingDown => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<PreviewError> for ApiError {
    fn from(e: PreviewError) -> Self {
        match &e {
            PreviewError::Validation(_) | PreviewError::InvalidRepositoryUrl(_) => {
                ApiError::BadRequest(e.to_string())
            }
            PreviewError::Failed(failure) => match failure.kind() {
                FailureKind::Auth | FailureKind::Permanent => ApiError::BadRequest(e.to_string()),
                _ => ApiError::Internal(e.to_string()),
            },
        }
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid job id: {}", raw)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
        .route("/api/migration/start", post(start_migration))
        .route("/api/migration/preview", post(preview_migration))
        .route("/api/github/analyze-url", get(analyze_github_url))
        .route("/api/gitlab/analyze-url", get(analyze_gitlab_url))
        .route("/api/migrations", get(list_migrations))
        .route("/api/migration/{id}", get(get_migration))
        .route("/api/migration/{id}/cancel", post(cancel_migration))
        .route("/api/migration/{id}/logs", get(get_logs))
        .route("/api/migration/{id}/issues", get(get_issues))
        .route("/api/migration/{id}/dependencies", get(get_dependencies))
        .route("/api/migration/{id}/report", get(download_report))
        .route("/api/migration/{id}/jmeter", get(download_load_test_plan))
        .route("/api/migration/{id}/download-zip", get(download_archive))
        .route("/api/java-versions", get(list_java_versions))
        .route("/api/conversion-types", get(list_conversion_types))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "migrator",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

async fn health_check() -> &'static str {
    "ok"
}

async fn start_migration(
    State(state): State<SharedState>,
    Json(req): Json<MigrationRequest>,
) -> Result<(StatusCode, Json<JobSnapshot>), ApiError> {
    let snapshot = state.registry.create(&req).map_err(|e| {
        if matches!(e, RegistryError::Validation(_)) {
            warn!(error = %e, "rejected migration request");
        }
        ApiError::from(e)
    })?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn preview_migration(
    State(state): State<SharedState>,
    Json(req): Json<MigrationRequest>,
) -> Result<Json<MigrationPreview>, ApiError> {
    let plan = req.validate().map_err(PreviewError::from)?;
    let preview = state.previews.preview(plan).await.map_err(|e| {
        warn!(repo = %req.source_repo_url, error = %e, "preview failed");
        match e {
            PreviewError::Failed(_) => ApiError::from(e).with_prefix("Preview failed"),
            other => ApiError::from(other),
        }
    })?;
    Ok(Json(preview))
}

async fn analyze_github_url(
    State(state): State<SharedState>,
    Query(query): Query<AnalyzeUrlQuery>,
) -> Result<Json<UrlAnalysis>, ApiError> {
    analyze_url(&state, Platform::Github, query).await
}

async fn analyze_gitlab_url(
    State(state): State<SharedState>,
    Query(query): Query<AnalyzeUrlQuery>,
) -> Result<Json<UrlAnalysis>, ApiError> {
    analyze_url(&state, Platform::Gitlab, query).await
}

/// Analyze a repository by URL without starting a job.
async fn analyze_url(
    state: &SharedState,
    platform: Platform,
    query: AnalyzeUrlQuery,
) -> Result<Json<UrlAnalysis>, ApiError> {
    let location = RepositoryLocation::parse(&query.repo_url)?;
    let defaults = MigrationRequest::default();
    let request = MigrationRequest {
        source_repo_url: query.repo_url.clone(),
        platform: platform.as_str().to_string(),
        target_version: query.target_version.unwrap_or(defaults.target_version.clone()),
        token: query.token,
        conversion_types: vec!["java_version".to_string()],
        ..defaults
    };
    let plan = request.validate().map_err(PreviewError::from)?;
    let analysis = state.previews.analyze(plan).await.map_err(|e| {
        warn!(repo = %query.repo_url, error = %e, "repository analysis failed");
        ApiError::from(e)
    })?;
    Ok(Json(UrlAnalysis {
        repo_url: query.repo_url,
        platform,
        owner: location.owner,
        repo: location.repo,
        analysis,
    }))
}

async fn list_migrations(State(state): State<SharedState>) -> Json<Vec<JobSnapshot>> {
    Json(state.registry.list())
}

async fn get_migration(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.get(id)?))
}

async fn cancel_migration(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.cancel(id)?))
}

async fn get_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<JobLogs>, ApiError> {
    let job_id = parse_job_id(&id)?;
    let logs = state.registry.logs(job_id)?;
    Ok(Json(JobLogs { job_id, logs }))
}

async fn get_issues(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.issues(id)?))
}

async fn get_dependencies(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<DependencyChange>>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.registry.dependencies(id)?))
}

async fn download_report(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let kind = match query.format.as_deref() {
        None => ArtifactKind::Report,
        Some(format) => match ArtifactKind::from_str(format) {
            Ok(kind @ (ArtifactKind::Report | ArtifactKind::ReportJson)) => kind,
            _ => return Err(ApiError::BadRequest(format!("Unsupported report format: {}", format))),
        },
    };
    serve_artifact(&state, &id, kind).await
}

async fn download_load_test_plan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    serve_artifact(&state, &id, ArtifactKind::LoadTestPlan).await
}

async fn download_archive(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    serve_artifact(&state, &id, ArtifactKind::Archive).await
}

/// Stream one artifact back as an attachment.
async fn serve_artifact(state: &SharedState, id: &str, kind: ArtifactKind) -> Result<Response, ApiError> {
    let id = parse_job_id(id)?;
    let path = state.registry.artifact(id, kind)?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        error!(job_id = %id, path = %path.display(), error = %e, "artifact unreadable");
        ApiError::Internal(format!("Failed to read artifact: {}", e))
    })?;
    let disposition = format!("attachment; filename=\"{}\"", kind.download_name(id));
    Ok((
        [
            (header::CONTENT_TYPE, kind.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn list_java_versions() -> Json<JavaVersionCatalog> {
    Json(java_versions())
}

async fn list_conversion_types() -> Json<&'static [ConversionType]> {
    Json(CONVERSION_TYPES)
}
