//! Run creation and run document updates.

use serde_json::{Value, json};

use super::{input_of, pick_first, present};
use crate::error::ApiError;
use crate::ingest::normalize_document;
use crate::registry::{self, RunUpsert};
use crate::state::AppState;

const ENTITY_KEYS: [&str; 2] = ["entityName", "entity"];
const PROJECT_KEYS: [&str; 2] = ["projectName", "project"];

/// Client run ids are 10 lowercase hex characters.
pub fn random_run_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(10);
    id
}

fn string_field(input: &Value, keys: &[&str]) -> Option<String> {
    pick_first(&[input], keys)
}

fn git_field(input: &Value, nested: &str, aliases: &[&str]) -> Option<String> {
    input
        .get("git")
        .and_then(|git| git.get(nested))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| string_field(input, aliases))
}

pub(super) async fn upsert_bucket(state: &AppState, variables: &Value) -> Result<Value, ApiError> {
    let input = input_of(variables);
    let sources = [input, variables];
    let settings = &state.settings;

    let entity =
        pick_first(&sources, &ENTITY_KEYS).unwrap_or_else(|| settings.default_entity.clone());
    let project =
        pick_first(&sources, &PROJECT_KEYS).unwrap_or_else(|| settings.default_project.clone());
    let run_id = pick_first(&sources, &["name", "runName", "id"]).unwrap_or_else(random_run_id);
    let display_name = pick_first(&sources, &["displayName"]).unwrap_or_else(|| run_id.clone());

    let upsert = RunUpsert {
        display_name: Some(display_name),
        host: string_field(input, &["host"]),
        program: string_field(input, &["program"]),
        tags: present(input, "tags").cloned(),
        notes: string_field(input, &["notes"]),
        git_remote: git_field(input, "remote", &["gitRemote", "repo"]),
        git_commit: git_field(input, "commit", &["gitCommit", "commit"]),
        ..RunUpsert::new(entity.as_str(), project.as_str(), run_id.as_str())
    };

    let upserted = registry::upsert_run(&state.db, &upsert).await?;
    let run = upserted.run;

    if let Some(config) = present(input, "config") {
        registry::replace_config(&state.db, &run.id, normalize_document(config)).await?;
    }
    if let Some(summary) = present(input, "summaryMetrics") {
        registry::replace_summary(&state.db, &run.id, normalize_document(summary)).await?;
    }

    tracing::info!(
        entity = %entity,
        project = %project,
        run_id = %run.run_id,
        inserted = upserted.inserted,
        "Upserted bucket"
    );

    Ok(json!({
        "upsertBucket": {
            "bucket": {
                "id": run.storage_id,
                "name": run.run_id,
                "displayName": run.display_name.as_deref().unwrap_or(run.run_id.as_str()),
                "project": {
                    "name": project,
                    "entity": { "name": entity }
                }
            },
            "inserted": upserted.inserted
        }
    }))
}

pub(super) async fn upsert_run_documents(
    state: &AppState,
    variables: &Value,
) -> Result<Value, ApiError> {
    let input = input_of(variables);
    let sources = [input, variables];
    let settings = &state.settings;

    let run_id = pick_first(&sources, &["name", "runName", "id"]);
    let entity = pick_first(&sources, &ENTITY_KEYS);
    let project = pick_first(&sources, &PROJECT_KEYS);

    let existing = match (&run_id, &entity, &project) {
        (Some(run_id), Some(entity), Some(project)) => {
            registry::find_run_by_project(&state.db, entity, project, run_id).await?
        }
        (Some(run_id), _, _) => registry::find_run_by_run_id(&state.db, run_id).await?,
        _ => None,
    };

    let run = match existing {
        Some(run) => run,
        None => {
            let mut upsert = RunUpsert::new(
                entity.unwrap_or_else(|| settings.default_entity.clone()),
                project.unwrap_or_else(|| settings.default_project.clone()),
                run_id.unwrap_or_else(random_run_id),
            );
            upsert.display_name = pick_first(&sources, &["displayName"]);
            registry::upsert_run(&state.db, &upsert).await?.run
        }
    };

    let summary = present(input, "summary").or_else(|| present(input, "summaryMetrics"));
    if let Some(summary) = summary {
        registry::replace_summary(&state.db, &run.id, normalize_document(summary)).await?;
    }
    if let Some(config) = present(input, "config") {
        registry::replace_config(&state.db, &run.id, normalize_document(config)).await?;
    }

    Ok(json!({
        "upsertRun": {
            "run": { "id": run.storage_id, "name": run.run_id }
        }
    }))
}
