use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use runlog_api::{
    construct_router,
    entity::graphql_unknown_ops,
    schema,
    sea_orm::{
        ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    },
    state::{Settings, State},
};
use runlog_storage::RunStore;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

struct Harness {
    app: Router,
    db: DatabaseConnection,
    dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("runlog.db").display());
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(4).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        schema::bootstrap(&db).await.unwrap();

        let blobs = RunStore::local(dir.path().join("storage")).unwrap();
        let state = State::from_parts(Settings::default(), db.clone(), blobs);
        let app = construct_router(Arc::new(state));
        Self { app, db, dir }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.json(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.json(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn upsert_bucket(&self, entity: &str, project: &str, name: &str) -> Value {
        let (status, body) = self
            .post(
                "/graphql",
                json!({
                    "query": "mutation UpsertBucket($input: UpsertBucketInput!) { upsertBucket(input: $input) { bucket { id } } }",
                    "variables": {
                        "input": { "entityName": entity, "projectName": project, "name": name }
                    }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

#[tokio::test]
async fn test_upsert_then_history_roundtrip() {
    let h = Harness::new().await;

    let body = h.upsert_bucket("acme", "vision", "run-1").await;
    assert_eq!(body["data"]["upsertBucket"]["bucket"]["name"], json!("run-1"));
    assert_eq!(body["data"]["upsertBucket"]["inserted"], json!(true));

    let (status, body) = h
        .post(
            "/files/acme/vision/run-1/file_stream",
            json!({
                "files": {
                    "wandb-history.jsonl": {
                        "offset": 0,
                        "content": ["{\"_step\": 0, \"_timestamp\": 1700000000.0, \"loss\": 1.2}"]
                    }
                }
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"exitcode": null, "limits": {}}));

    let (status, body) = h.get("/api/runs/run-1/history?keys=loss").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["points"],
        json!([{"step": 0, "ts": "2023-11-14T22:13:20.000Z", "loss": 1.2}])
    );

    let (_, body) = h.get("/api/projects").await;
    assert_eq!(body["projects"][0]["entity"], json!("acme"));
    assert_eq!(body["projects"][0]["project"], json!("vision"));
    assert_eq!(body["projects"][0]["run_count"], json!(1));

    let (_, body) = h.get("/api/projects/acme/vision/runs?limit=5").await;
    assert_eq!(body["runs"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_operation_is_recorded() {
    let h = Harness::new().await;

    let (status, body) = h
        .json(
            Request::post("/graphql")
                .header("x-wandb-api-key", "secret-key")
                .body(Body::from(
                    json!({"query": "query ServerInfo { serverInfo { latestLocalVersionInfo } }"})
                        .to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["message"], json!("NOT_IMPLEMENTED"));
    assert_eq!(body["errors"][0]["extensions"]["code"], json!("NOT_IMPLEMENTED"));

    let rows = graphql_unknown_ops::Entity::find().all(&h.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].api_key_id.is_some());
    assert_eq!(rows[0].query_hash.len(), 64);
}

#[tokio::test]
async fn test_server_capabilities_and_viewer() {
    let h = Harness::new().await;

    let (_, body) = h
        .post("/graphql", json!({"query": "query ProbeServerCapabilities { QueryType: __type(name: \"Query\") { fields { name } } }"}))
        .await;
    assert_eq!(body["data"]["probeServerCapabilities"]["history"], json!(true));
    assert_eq!(body["data"]["probeServerCapabilities"]["gitOps"], json!(false));

    let (_, body) = h
        .post("/graphql", json!({"query": "query Viewer { viewer { id entity } }"}))
        .await;
    assert_eq!(body["data"]["viewer"]["id"], json!("viewer"));
    assert_eq!(body["data"]["viewer"]["username"], json!("runlog"));
    assert_eq!(body["data"]["viewer"]["entity"]["name"], json!("default"));
}

#[tokio::test]
async fn test_malformed_graphql_body() {
    let h = Harness::new().await;
    let (status, body) = h
        .json(Request::post("/graphql").body(Body::from("{nope")).unwrap())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["extensions"]["code"], json!("BAD_REQUEST"));
}

#[tokio::test]
async fn test_completion_marks_run_failed() {
    let h = Harness::new().await;
    h.upsert_bucket("acme", "vision", "run-1").await;

    let (status, _) = h
        .post(
            "/files/acme/vision/run-1/file_stream",
            json!({"complete": true, "exitcode": 1}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h.get("/api/runs/run-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["run"]["state"], json!("failed"));
    assert!(!body["run"]["finished_at"].is_null());
    assert_eq!(body["run"]["entity_name"], json!("acme"));
    assert_eq!(body["run"]["project_name"], json!("vision"));
}

#[tokio::test]
async fn test_filestream_auto_creates_run() {
    let h = Harness::new().await;
    let (status, _) = h
        .post("/files/acme/vision/fresh/file_stream", json!({"complete": true}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = h.get("/api/runs/fresh").await;
    assert_eq!(body["run"]["state"], json!("finished"));
}

#[tokio::test]
async fn test_storage_put_get_and_missing() {
    let h = Harness::new().await;
    h.upsert_bucket("acme", "vision", "run-1").await;

    let (status, body) = h
        .json(
            Request::put("/storage?run=run-1&file=logs/output.txt")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("hello world"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "size": 11}));

    let response = h
        .app
        .clone()
        .oneshot(
            Request::get("/storage?run=run-1&file=logs/output.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"hello world");

    let (_, body) = h.get("/api/runs/run-1/files").await;
    assert_eq!(body["files"][0]["name"], json!("logs/output.txt"));
    assert_eq!(body["files"][0]["size"], json!(11));

    let (status, body) = h.get("/storage?run=run-1&file=missing.bin").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("NOT_FOUND"));

    let (status, _) = h.get("/storage?run=run-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_storage_confines_traversal() {
    let h = Harness::new().await;
    let (status, _) = h
        .send(
            Request::put("/storage?run=run-1&file=../../etc/passwd")
                .body(Body::from("root:x:0:0"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let stored = h.dir.path().join("storage/runs/run-1/etc/passwd");
    assert_eq!(std::fs::read(stored).unwrap(), b"root:x:0:0");

    // Unknown run: stored, but without a manifest record.
    let (_, body) = h
        .send(Request::get("/storage?run=run-1&file=etc/passwd").body(Body::empty()).unwrap())
        .await;
    assert_eq!(body, b"root:x:0:0");
}

#[tokio::test]
async fn test_missing_run_is_not_found() {
    let h = Harness::new().await;
    let (status, _) = h.get("/api/runs/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.get("/api/runs/nope/history").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new().await;
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));

    let (status, _) = h.get("/health/db").await;
    assert_eq!(status, StatusCode::OK);

    let count = graphql_unknown_ops::Entity::find().count(&h.db).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_api_key_failure_uses_route_envelope() {
    let h = Harness::new().await;
    h.db.execute_unprepared("DROP TABLE api_keys").await.unwrap();

    let (status, body) = h
        .json(
            Request::post("/graphql")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-wandb-api-key", "secret")
                .body(Body::from(json!({"query": "query Viewer { viewer { id } }"}).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"][0]["extensions"]["code"], json!("DATABASE_ERROR"));
    assert!(body.get("error").is_none());

    let (status, body) = h
        .json(
            Request::post("/files/acme/vision/run-1/file_stream")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-wandb-api-key", "secret")
                .body(Body::from(json!({"complete": false}).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], json!("DATABASE_ERROR"));
}
