//! Upload/download URL issuing for run files.

use axum::http::HeaderMap;
use serde_json::{Value, json};
use url::Url;

use super::{input_of, pick_first};
use crate::entity::runs;
use crate::error::ApiError;
use crate::manifest::{self, FileMeta};
use crate::registry;
use crate::state::AppState;

/// Externally visible base URL: the configured one, else rebuilt from the
/// forwarding and host headers.
pub fn base_url(configured: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(base) = configured {
        return base.to_string();
    }
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let proto = header("x-forwarded-proto").unwrap_or("http");
    let host = header("x-forwarded-host")
        .or_else(|| header("host"))
        .unwrap_or("localhost");
    format!("{proto}://{host}")
}

/// `<base>/storage?run=<run>&file=<name>`, keeping any path prefix of `base`.
pub fn storage_url(base: &str, run: Option<&str>, file: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    let path = format!("{}/storage", url.path().trim_end_matches('/'));
    url.set_path(&path);
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        if let Some(run) = run {
            query.append_pair("run", run);
        }
        query.append_pair("file", file);
    }
    Ok(url)
}

/// A requested file: a bare name or an object with a name and optional
/// metadata.
fn requested_file(file: &Value) -> Option<(String, FileMeta)> {
    if let Some(name) = file.as_str() {
        return Some((name.to_string(), FileMeta::default()));
    }
    let name = file.get("name").and_then(Value::as_str)?.to_string();
    let meta = FileMeta {
        size: file.get("size").and_then(Value::as_i64),
        digest: pick_first(&[file], &["md5", "digest"]),
        content_type: pick_first(&[file], &["contentType"]),
    };
    Some((name, meta))
}

async fn resolve_run(
    state: &AppState,
    entity: &str,
    project: &str,
    run_name: &str,
) -> Result<Option<runs::Model>, ApiError> {
    if run_name.is_empty() {
        return Ok(None);
    }
    if let Some(run) = registry::find_run_by_project(&state.db, entity, project, run_name).await? {
        return Ok(Some(run));
    }
    if let Some(run) = registry::find_run_by_run_id(&state.db, run_name).await? {
        return Ok(Some(run));
    }
    Ok(registry::find_run_by_storage_id(&state.db, run_name).await?)
}

pub(super) async fn create_run_files(
    state: &AppState,
    headers: &HeaderMap,
    variables: &Value,
) -> Result<Value, ApiError> {
    let input = input_of(variables);
    let sources = [input, variables];
    let settings = &state.settings;

    let entity = pick_first(&sources, &["entityName", "entity"])
        .unwrap_or_else(|| settings.default_entity.clone());
    let project = pick_first(&sources, &["projectName", "project"])
        .unwrap_or_else(|| settings.default_project.clone());
    let run_name = pick_first(&sources, &["runName", "name", "id"]).unwrap_or_default();

    let requested = ["files", "paths", "fileNames"]
        .iter()
        .flat_map(|key| sources.iter().map(move |source| source.get(*key)))
        .flatten()
        .find_map(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let run = resolve_run(state, &entity, &project, &run_name).await?;
    let run_param = match &run {
        Some(run) => Some(run.run_id.as_str()),
        None if !run_name.is_empty() => Some(run_name.as_str()),
        None => None,
    };
    let base = base_url(settings.public_base_url.as_deref(), headers);

    let mut files = Vec::with_capacity(requested.len());
    for (name, meta) in requested.iter().filter_map(requested_file) {
        let url = storage_url(&base, run_param, &name)
            .map_err(|e| crate::bad_request!("Invalid base URL {base}: {e}"))?;

        if let Some(run) = &run
            && let Err(e) = manifest::upsert_run_file(&state.db, run, &name, meta).await
        {
            tracing::error!(run_id = %run.run_id, file = %name, error = ?e, "Failed to register run file");
        }

        files.push(json!({
            "name": name,
            "uploadUrl": url.as_str(),
            "url": url.as_str(),
            "directUrl": url.as_str(),
        }));
    }

    if run.is_none() {
        tracing::warn!(run = %run_name, "Issued file URLs for an unknown run");
    }

    let listing = json!({
        "files": files,
        "edges": files.iter().map(|file| json!({ "node": file })).collect::<Vec<_>>(),
    });
    Ok(json!({
        "createRunFiles": listing.clone(),
        "prepareFiles": listing,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{RunUpsert, upsert_run};
    use crate::test_support::TestDb;
    use axum::http::HeaderValue;

    #[test]
    fn test_base_url_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:8080"));
        assert_eq!(base_url(None, &headers), "http://internal:8080");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("runs.example.com"));
        assert_eq!(base_url(None, &headers), "https://runs.example.com");

        assert_eq!(
            base_url(Some("https://public.example.com"), &headers),
            "https://public.example.com"
        );
    }

    #[test]
    fn test_storage_url_encodes_and_keeps_prefix() {
        let url = storage_url("https://example.com/tracker/", Some("run 1"), "media/a&b.png").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/tracker/storage?run=run+1&file=media%2Fa%26b.png"
        );
    }

    #[tokio::test]
    async fn test_resolves_by_storage_id_and_registers() {
        let t = TestDb::new().await;
        let state = t.state();
        let run = upsert_run(&t.db, &RunUpsert::new("acme", "vision", "run-1"))
            .await
            .unwrap()
            .run;

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("localhost:8080"));

        let data = create_run_files(
            &state,
            &headers,
            &json!({
                "input": {
                    "name": run.storage_id,
                    "files": ["output.log", {"name": "model.pt", "size": 42, "md5": "abc=="}]
                }
            }),
        )
        .await
        .unwrap();

        let files = data["createRunFiles"]["files"].as_array().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            files[1]["uploadUrl"],
            json!("http://localhost:8080/storage?run=run-1&file=model.pt")
        );
        assert_eq!(data["prepareFiles"]["edges"][0]["node"]["name"], json!("output.log"));

        let stored = manifest::find_run_file(&t.db, &run.id, "model.pt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.size, Some(42));
        assert_eq!(stored.digest.as_deref(), Some("abc=="));
    }
}
