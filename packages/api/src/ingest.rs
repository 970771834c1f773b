//! Filestream ingestion: history, summary and config documents delivered as
//! line chunks, plus the cursor bookkeeping shared by every file.

pub mod cursor;
pub mod history;

use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::entity::runs;
use crate::manifest::{self, FileMeta};
use crate::registry;

pub const HISTORY_FILE: &str = "wandb-history.jsonl";
pub const SUMMARY_FILE: &str = "wandb-summary.json";
pub const CONFIG_FILES: [&str; 2] = ["config.yaml", "config.json"];

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileStreamRequest {
    #[serde(default)]
    pub files: Option<Map<String, Value>>,
    #[serde(default)]
    pub uploaded: Option<Vec<String>>,
    #[serde(default)]
    pub complete: Option<bool>,
    #[serde(default)]
    pub exitcode: Option<Value>,
}

/// One delivery for one file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub offset: Option<Value>,
    #[serde(default)]
    pub content: Vec<String>,
}

impl Chunk {
    pub fn offset(&self) -> i64 {
        self.offset
            .as_ref()
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFile {
    History,
    Summary,
    Config,
    Other,
}

impl StreamFile {
    pub fn classify(filename: &str) -> Self {
        match filename {
            HISTORY_FILE => Self::History,
            SUMMARY_FILE => Self::Summary,
            f if CONFIG_FILES.contains(&f) => Self::Config,
            _ => Self::Other,
        }
    }
}

/// Accepts a single chunk object or an array of them. Entries that are not
/// chunks are dropped.
pub fn chunks_of(value: &Value) -> Vec<Chunk> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        Value::Object(_) => serde_json::from_value(value.clone())
            .map(|chunk| vec![chunk])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Parses a document delivered as text, keeping unparseable input as
/// `{"raw": <text>}`.
pub fn document_or_raw(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

/// Normalizes a document given either inline or as a JSON string.
pub fn normalize_document(value: &Value) -> Value {
    match value {
        Value::String(text) => document_or_raw(text),
        other => other.clone(),
    }
}

fn exit_code(value: Option<&Value>) -> Option<i64> {
    value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub history_points: usize,
    pub skipped_lines: usize,
    pub completed: bool,
}

/// Applies one filestream request to `run`.
pub async fn apply_file_stream(
    db: &DatabaseConnection,
    run: &runs::Model,
    request: FileStreamRequest,
) -> Result<IngestReport, sea_orm::DbErr> {
    let mut report = IngestReport::default();
    // Fallback step counter, local to this call.
    let mut previous_step = 0_i64;

    for (filename, value) in request.files.iter().flatten() {
        let kind = StreamFile::classify(filename);

        for chunk in chunks_of(value) {
            let lines = chunk.content.len() as i64;

            match kind {
                StreamFile::History => {
                    let now = Utc::now();
                    for line in &chunk.content {
                        match history::parse_line(line, previous_step, now) {
                            Some(point) => {
                                previous_step = point.step;
                                history::upsert_point(db, &run.id, point).await?;
                                report.history_points += 1;
                            }
                            None => report.skipped_lines += 1,
                        }
                    }
                }
                StreamFile::Summary => {
                    let text = chunk.content.concat();
                    match serde_json::from_str::<Value>(&text) {
                        Ok(summary) => registry::replace_summary(db, &run.id, summary).await?,
                        Err(e) => {
                            tracing::debug!(run_id = %run.run_id, error = %e, "Ignoring unparseable summary");
                        }
                    }
                }
                StreamFile::Config => {
                    let text = chunk.content.concat();
                    registry::replace_config(db, &run.id, document_or_raw(&text)).await?;
                }
                StreamFile::Other => {}
            }

            cursor::advance(db, &run.id, filename, chunk.offset(), lines).await?;
        }
    }

    for name in request.uploaded.iter().flatten() {
        manifest::upsert_run_file(db, run, name, FileMeta::default()).await?;
    }

    if request.complete == Some(true) {
        report.completed =
            registry::mark_complete(db, &run.id, exit_code(request.exitcode.as_ref())).await?;
    }

    tracing::debug!(
        run_id = %run.run_id,
        history_points = report.history_points,
        skipped_lines = report.skipped_lines,
        completed = report.completed,
        "Applied filestream batch"
    );
    Ok(report)
}
