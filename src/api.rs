//! HTTP surface for task-driven newsletter generation: submit a batch of
//! URLs, poll or stream the task's progress, and fetch the rendered result.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info};

use crate::config::AppSettings;
use crate::db::{ResultMetadata, TaskProgress, TaskRecord, TaskStatus, TaskStore};
use crate::manifest::{self, InvalidUrlEntry};
use crate::pipeline::Pipeline;
use crate::tasks;

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct ApiState {
    pub store: TaskStore,
    pub settings: Arc<AppSettings>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub task_id: String,
    pub markdown_content: String,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub urls: Vec<String>,
    pub invalid_urls: Vec<InvalidUrlEntry>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

fn status_response(record: &TaskRecord) -> StatusResponse {
    StatusResponse {
        task_id: record.task_id.clone(),
        status: record.status,
        progress: record.progress,
        created_at: record.created_at,
        updated_at: record.updated_at,
        completed_at: record.completed_at,
        error: record.error.clone(),
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/newsletter/generate", post(generate))
        .route("/api/v1/newsletter/status/{task_id}", get(status))
        .route("/api/v1/newsletter/result/{task_id}", get(result))
        .route("/api/v1/newsletter/events/{task_id}", get(events))
        .route("/api/v1/newsletter/upload", post(upload))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn serve(state: ApiState, port: u16) -> Result<()> {
    let app = router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server running on http://{}", addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "OK"
}

/// Accept a batch of URLs, persist a pending task, and spawn the pipeline
/// in the background. Replies 202 immediately with the task id.
async fn generate(
    State(state): State<ApiState>,
    Json(payload): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    if payload.urls.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "request must include at least one url",
        ));
    }
    for url in &payload.urls {
        if let Err(reason) = manifest::normalize_url(url) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("invalid url '{}': {}", url, reason),
            ));
        }
    }

    let record = state
        .store
        .create(payload.urls.len() as i64, json!({ "urls": payload.urls }))
        .await
        .map_err(|err| {
            error!("Failed to create task: {}", err);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create task")
        })?;

    let pipeline = Pipeline::from_settings(&state.settings).map_err(|err| {
        error!("Failed to build pipeline: {}", err);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to initialize processing",
        )
    })?;

    info!("Accepted task {} with {} urls", record.task_id, payload.urls.len());
    tokio::spawn(tasks::execute_task(
        state.store.clone(),
        record.task_id.clone(),
        pipeline,
        payload.urls,
    ));

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            task_id: record.task_id,
            status: record.status,
        }),
    ))
}

async fn status(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = fetch_task(&state, &task_id).await?;
    Ok(Json(status_response(&record)))
}

async fn result(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<ResultResponse>, ApiError> {
    let record = fetch_task(&state, &task_id).await?;

    if record.status != TaskStatus::Completed {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("task {} is {}, not completed", task_id, record.status.as_str()),
        ));
    }

    match (record.markdown_content, record.metadata) {
        (Some(markdown_content), Some(metadata)) => Ok(Json(ResultResponse {
            task_id: record.task_id,
            markdown_content,
            metadata,
        })),
        _ => {
            error!("Completed task {} is missing its stored result", task_id);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "completed task has no stored result",
            ))
        }
    }
}

/// Stream a task's lifecycle as server-sent events. Each change of status,
/// progress, or error is a "status" event; a final "end" event repeats the
/// terminal snapshot.
async fn events(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 before committing to a stream.
    fetch_task(&state, &task_id).await?;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    let mut updates = tasks::watch_task(state.store.clone(), task_id, WATCH_POLL_INTERVAL);

    tokio::spawn(async move {
        let mut last: Option<StatusResponse> = None;
        while let Some(record) = updates.next().await {
            let snapshot = status_response(&record);
            let event = match Event::default().event("status").json_data(&snapshot) {
                Ok(event) => event,
                Err(err) => {
                    error!("Failed to encode status event: {}", err);
                    break;
                }
            };
            last = Some(snapshot);
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
        if let Some(snapshot) = last {
            if let Ok(event) = Event::default().event("end").json_data(&snapshot) {
                let _ = tx.send(Ok(event)).await;
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::default()))
}

/// Validate a raw manifest body without starting a task. Returns the
/// normalized unique URLs alongside the rejected lines.
async fn upload(body: String) -> Json<UploadResponse> {
    let load_result = manifest::parse_manifest(&body);
    Json(UploadResponse {
        urls: load_result
            .entries
            .into_iter()
            .map(|entry| entry.normalized_url)
            .collect(),
        invalid_urls: load_result.invalid_entries,
    })
}

async fn fetch_task(state: &ApiState, task_id: &str) -> Result<TaskRecord, ApiError> {
    match state.store.get(task_id).await {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("task {} not found", task_id),
        )),
        Err(err) => {
            error!("Failed to load task {}: {}", task_id, err);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load task",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_partitions_valid_and_invalid_lines() {
        let body = "https://Example.com/a/\nnot-a-url\n# comment\n";
        let Json(response) = upload(body.to_string()).await;
        assert_eq!(response.urls, vec!["https://example.com/a"]);
        assert_eq!(response.invalid_urls.len(), 1);
        assert_eq!(response.invalid_urls[0].raw_url, "not-a-url");
    }
}
