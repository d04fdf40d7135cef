//! Background execution of generation tasks and change-driven status
//! watching. A spawned task always leaves its row in a terminal state.

use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::db::{ResultMetadata, TaskProgress, TaskRecord, TaskStore};
use crate::pipeline::{Pipeline, PipelineResult};
use crate::render::MarkdownRenderer;
use crate::TARGET_DB;

/// Derive progress counters from a finished run. Counters never exceed the
/// task's URL total, even when invalid entries inflate the raw sums.
pub fn build_progress(total_urls: i64, result: &PipelineResult) -> TaskProgress {
    let raw_processed = (result.success_count() + result.skipped_urls.len()) as i64;
    let processed = raw_processed.min(total_urls);
    let remaining = total_urls - processed;
    let raw_failed = (result.failed_urls.len() + result.invalid_urls.len()) as i64;
    let failed = raw_failed.min(remaining);

    TaskProgress {
        total_urls,
        processed,
        failed,
    }
}

pub fn result_metadata(result: &PipelineResult) -> ResultMetadata {
    let mut topics: Vec<String> = result
        .entries
        .iter()
        .map(|entry| entry.topic.label().to_string())
        .collect();
    topics.sort();
    topics.dedup();

    ResultMetadata {
        generated_at: Utc::now(),
        total_processed: result.success_count(),
        topics,
    }
}

/// Run the pipeline for one stored task and record the terminal outcome.
/// A run where every URL fails is recorded as a failed task rather than an
/// empty completed one.
pub async fn execute_task(store: TaskStore, task_id: String, pipeline: Pipeline, urls: Vec<String>) {
    info!("Starting task {} with {} urls", task_id, urls.len());

    if let Err(err) = store.mark_processing(&task_id).await {
        error!(target: TARGET_DB, "Cannot mark task {} processing: {}", task_id, err);
        return;
    }

    let total_urls = urls.len() as i64;
    let manifest_text = urls.join("\n");
    let result = pipeline.run(&manifest_text).await;
    let progress = build_progress(total_urls, &result);

    if result.entries.is_empty() && !result.failed_urls.is_empty() {
        let message = format!(
            "all {} urls failed to process",
            result.failed_urls.len() + result.invalid_urls.len()
        );
        warn!("Task {} produced no entries: {}", task_id, message);
        if let Err(err) = store.mark_failed(&task_id, &message, Some(&progress)).await {
            error!(target: TARGET_DB, "Cannot mark task {} failed: {}", task_id, err);
        }
        return;
    }

    let renderer = MarkdownRenderer::new();
    let markdown = renderer.render(&result.entries);
    let metadata = result_metadata(&result);

    match store
        .mark_completed(&task_id, &markdown, &metadata, &progress)
        .await
    {
        Ok(_) => info!(
            "Task {} completed: {} entries, {} failed",
            task_id,
            result.success_count(),
            progress.failed
        ),
        Err(err) => {
            error!(target: TARGET_DB, "Cannot store result for task {}: {}", task_id, err);
            if let Err(err) = store
                .mark_failed(&task_id, &format!("failed to store result: {}", err), None)
                .await
            {
                error!(target: TARGET_DB, "Cannot mark task {} failed: {}", task_id, err);
            }
        }
    }
}

/// Poll a task row and emit a snapshot whenever status, progress, or the
/// error message changes. The stream ends after the first terminal snapshot,
/// or immediately if the task disappears.
pub fn watch_task(
    store: TaskStore,
    task_id: String,
    poll_interval: Duration,
) -> ReceiverStream<TaskRecord> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let mut last_seen: Option<(crate::db::TaskStatus, TaskProgress, Option<String>)> = None;
        loop {
            let record = match store.get(&task_id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(target: TARGET_DB, "Watched task {} no longer exists", task_id);
                    break;
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Watch poll failed for task {}: {}", task_id, err);
                    break;
                }
            };

            let fingerprint = (record.status, record.progress, record.error.clone());
            let changed = last_seen.as_ref() != Some(&fingerprint);
            let terminal = record.status.is_terminal();

            if changed {
                last_seen = Some(fingerprint);
                if tx.send(record).await.is_err() {
                    break;
                }
            }
            if terminal {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }
    });

    ReceiverStream::new(rx)
}
