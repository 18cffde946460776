use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use pushlens::analyzer::DiffAnalyzer;
use pushlens::config::GitHubConfig;
use pushlens::db;
use pushlens::github::GitHubClient;
use pushlens::migrate::apply_schema;
use pushlens::models::ChangeSource;
use pushlens::object_store::{InMemoryObjectStore, ObjectStore};
use pushlens::pipeline::{CommitOutcome, Pipeline, PushEvent};
use pushlens::payload::Platform;
use pushlens::storage::{decompress, DiffDisposition, StorageEncoder};
use pushlens::store::{EventStore, SqliteEventStore};

const THRESHOLD: usize = 1024;

/// Deterministic, poorly compressible patch body.
fn noisy_patch(lines: usize) -> String {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut patch = format!("@@ -0,0 +1,{} @@\n", lines);
    for _ in 0..lines {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        patch.push_str(&format!("+x_{:016x} = {:016x}\n", state, state.rotate_left(17)));
    }
    patch
}

async fn fake_commit(Path((owner, repo, sha)): Path<(String, String, String)>) -> Response {
    assert_eq!(format!("{}/{}", owner, repo), "acme/widgets");
    match sha.as_str() {
        "small" => Json(json!({
            "sha": "small",
            "stats": {"additions": 4, "deletions": 1, "total": 5},
            "files": [{
                "filename": "src/app.py",
                "status": "modified",
                "additions": 4,
                "deletions": 1,
                "patch": "@@ -1,1 +1,4 @@ class App:\n-import os\n+import sys\n+def run(self):\n+    if self.ready:\n+        return 1\n"
            }]
        }))
        .into_response(),
        "big" => Json(json!({
            "sha": "big",
            "stats": {"additions": 2000, "deletions": 0, "total": 2000},
            "files": [{
                "filename": "gen/table.py",
                "status": "added",
                "additions": 2000,
                "deletions": 0,
                "patch": noisy_patch(2000)
            }]
        }))
        .into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response(),
    }
}

async fn start_fake_github() -> String {
    let app = Router::new().route("/repos/{owner}/{repo}/commits/{sha}", get(fake_commit));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn github_config(api_base: String) -> GitHubConfig {
    GitHubConfig {
        api_base,
        token: Some("test-token".to_string()),
        timeout_secs: 5,
        fetch_commits: true,
    }
}

fn push_event(shas: &[&str]) -> PushEvent {
    let commits: Vec<Value> = shas
        .iter()
        .map(|sha| {
            json!({
                "id": sha,
                "author": {"name": "Dev", "email": "dev@acme.test"},
                "timestamp": "2024-05-01T10:00:00Z",
                "added": [],
                "modified": ["src/app.py"],
                "removed": []
            })
        })
        .collect();
    let body = serde_json::to_vec(&json!({
        "ref": "refs/heads/main",
        "repository": {"full_name": "acme/widgets"},
        "pusher": {"name": "dev"},
        "commits": commits
    }))
    .unwrap();
    PushEvent::from_body(Platform::GitHub, "push", &body).unwrap()
}

struct Harness {
    _tmp: TempDir,
    store: Arc<SqliteEventStore>,
    objects: Arc<InMemoryObjectStore>,
    pipeline: Pipeline,
}

async fn harness(objects: InMemoryObjectStore) -> Harness {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("events.sqlite"))
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    let store = Arc::new(SqliteEventStore::new(pool));
    let objects = Arc::new(objects);

    let api_base = start_fake_github().await;
    let client = GitHubClient::new(&github_config(api_base), None).unwrap();
    let object_store: Arc<dyn ObjectStore> = objects.clone();

    let pipeline = Pipeline::new(
        DiffAnalyzer::default(),
        StorageEncoder::new(THRESHOLD, Some(object_store)),
        store.clone(),
    )
    .with_fetcher(Arc::new(client));

    Harness {
        _tmp: tmp,
        store,
        objects,
        pipeline,
    }
}

#[tokio::test]
async fn test_fetched_commit_is_analyzed_and_stored_inline() {
    let h = harness(InMemoryObjectStore::new()).await;

    let report = h.pipeline.process(&push_event(&["small"])).await.unwrap();
    let commit = &report.commits[0];
    assert_eq!(commit.outcome, CommitOutcome::Stored);
    assert_eq!(commit.source, ChangeSource::Api);
    assert_eq!(commit.diff, DiffDisposition::Inline);
    assert!(commit.analysis_success);

    let summary = commit.summary.as_ref().unwrap();
    assert_eq!(summary.change_summary.lines_added, 4);
    assert_eq!(summary.change_summary.lines_deleted, 1);
    assert_eq!(summary.structural_summary.functions_added, 1);
    assert_eq!(summary.structural_summary.imports_added, 1);
    assert_eq!(summary.structural_summary.imports_removed, 1);

    let record = h
        .store
        .get_event("acme/widgets", "small")
        .await
        .unwrap()
        .unwrap();
    assert!(record.diff_url.is_none());
    let diff = decompress(record.diff_patch.as_ref().unwrap()).unwrap();
    let diff = String::from_utf8(diff).unwrap();
    assert!(diff.starts_with("diff --git a/src/app.py b/src/app.py"));
    assert!(diff.contains("+def run(self):"));

    let analysis: Value = serde_json::from_str(record.analysis_json.as_ref().unwrap()).unwrap();
    assert_eq!(analysis["total_additions"], 4);
    assert!(h.objects.is_empty());
}

#[tokio::test]
async fn test_large_diff_is_offloaded() {
    let h = harness(InMemoryObjectStore::new()).await;

    let report = h.pipeline.process(&push_event(&["big"])).await.unwrap();
    assert_eq!(report.commits[0].diff, DiffDisposition::Offloaded);

    let record = h
        .store
        .get_event("acme/widgets", "big")
        .await
        .unwrap()
        .unwrap();
    assert!(record.diff_patch.is_none());
    assert_eq!(
        record.diff_url.as_deref(),
        Some("memory://acme/widgets/big.patch.gz")
    );

    let uploaded = h.objects.get("acme/widgets/big.patch.gz").unwrap();
    assert!(uploaded.len() > THRESHOLD);
    let restored = String::from_utf8(decompress(&uploaded).unwrap()).unwrap();
    assert!(restored.contains("gen/table.py"));
}

#[tokio::test]
async fn test_failed_offload_keeps_diff_inline() {
    let h = harness(InMemoryObjectStore::failing()).await;

    let report = h.pipeline.process(&push_event(&["big"])).await.unwrap();
    assert_eq!(report.commits[0].diff, DiffDisposition::InlineOversized);

    let record = h
        .store
        .get_event("acme/widgets", "big")
        .await
        .unwrap()
        .unwrap();
    assert!(record.diff_url.is_none());
    assert!(record.diff_patch.unwrap().len() > THRESHOLD);
}

#[tokio::test]
async fn test_fetch_failure_falls_back_to_payload() {
    let h = harness(InMemoryObjectStore::new()).await;

    let report = h.pipeline.process(&push_event(&["gone"])).await.unwrap();
    let commit = &report.commits[0];
    assert_eq!(commit.outcome, CommitOutcome::Stored);
    assert_eq!(commit.source, ChangeSource::Payload);
    assert_eq!(commit.diff, DiffDisposition::Absent);
    assert_eq!(commit.files_changed, 1);

    let record = h
        .store
        .get_event("acme/widgets", "gone")
        .await
        .unwrap()
        .unwrap();
    assert!(record.diff_patch.is_none());
    assert!(record.diff_url.is_none());
}

#[tokio::test]
async fn test_mixed_push_and_replay() {
    let h = harness(InMemoryObjectStore::new()).await;
    let event = push_event(&["small", "big", "gone"]);

    let first = h.pipeline.process(&event).await.unwrap();
    assert_eq!(first.stored(), 3);

    let replay = h.pipeline.process(&event).await.unwrap();
    assert_eq!(replay.stored(), 0);
    assert_eq!(replay.duplicates(), 3);
    assert_eq!(h.objects.len(), 1);
}
