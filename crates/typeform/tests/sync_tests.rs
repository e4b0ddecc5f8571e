//! End-to-end sync runs against a mock API and an on-disk cache.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use typeform::{ResponseStore, SyncOptions, Syncer, Typeform};
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FORM_ID: &str = "lT4Z3j";
const RESPONSES_PATH: &str = "/forms/lT4Z3j/responses";

fn client(server: &MockServer) -> Typeform {
    Typeform::builder(FORM_ID, "tfp_test_token")
        .base_url(server.uri())
        .page_size(2)
        .retry_backoff(Duration::from_millis(1))
        .build()
        .unwrap()
}

fn page(items: &[(&str, &str)]) -> ResponseTemplate {
    let items: Vec<serde_json::Value> = items
        .iter()
        .map(|(token, submitted_at)| {
            json!({
                "token": token,
                "landed_at": "2024-03-01T09:00:00Z",
                "submitted_at": submitted_at,
                "answers": [{
                    "field": {"id": "f1", "type": "short_text", "ref": "name"},
                    "type": "text",
                    "text": format!("answer {token}")
                }]
            })
        })
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({
        "total_items": items.len(),
        "page_count": 1,
        "items": items
    }))
}

#[tokio::test]
async fn test_sync_then_resume() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESPONSES_PATH))
        .and(query_param("sort", "submitted_at,asc"))
        .and(query_param_is_missing("after"))
        .respond_with(page(&[
            ("a", "2024-03-01T10:00:00Z"),
            ("b", "2024-03-01T11:00:00Z"),
        ]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESPONSES_PATH))
        .and(query_param("after", "b"))
        .respond_with(page(&[("c", "2024-03-01T12:00:00Z")]))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESPONSES_PATH))
        .and(query_param("after", "c"))
        .respond_with(page(&[]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache").join("responses.db");
    let api = client(&server);

    {
        let store = ResponseStore::open(&db_path).unwrap();
        let report = Syncer::new(&api, &store).run().await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.cursor.as_deref(), Some("c"));
    }

    // A fresh handle on the same file picks up the stored cursor.
    let store = ResponseStore::open(&db_path).unwrap();
    let report = Syncer::new(&api, &store).run().await.unwrap();
    assert_eq!(report.pages, 1);
    assert_eq!(report.fetched, 0);

    let cached = store.list(FORM_ID, 10).unwrap();
    let tokens: Vec<&str> = cached.iter().map(|r| r.token.as_str()).collect();
    assert_eq!(tokens, vec!["c", "b", "a"]);

    let b = store.get(FORM_ID, "b").unwrap().unwrap();
    assert_eq!(b.answers[0].value().to_string(), "answer b");
}

#[tokio::test]
async fn test_sync_prunes_to_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RESPONSES_PATH))
        .respond_with(page(&[("a", "2024-03-01T10:00:00Z")]))
        .mount(&server)
        .await;

    let store = ResponseStore::open_in_memory().unwrap();
    store
        .upsert(
            FORM_ID,
            &serde_json::from_value(json!({
                "token": "old",
                "landed_at": "2023-01-01T00:00:00Z",
                "submitted_at": "2023-01-01T00:01:00Z"
            }))
            .unwrap(),
        )
        .unwrap();

    let api = client(&server);
    let report = Syncer::new(&api, &store)
        .with_options(SyncOptions {
            keep_recent: Some(1),
            ..SyncOptions::default()
        })
        .run()
        .await
        .unwrap();

    assert_eq!(report.pruned, 1);
    assert!(store.get(FORM_ID, "old").unwrap().is_none());
    assert!(store.get(FORM_ID, "a").unwrap().is_some());
}

#[tokio::test]
async fn test_sync_surfaces_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let store = ResponseStore::open_in_memory().unwrap();
    let api = client(&server);
    let err = Syncer::new(&api, &store).run().await.unwrap_err();

    assert!(err.is_unauthorized());
    assert!(store.cursor(FORM_ID).unwrap().is_none());
}
