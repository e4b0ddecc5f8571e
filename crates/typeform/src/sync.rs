//! Incremental download of responses into the local cache.
//!
//! A sync run continues from the cursor stored for the form, so repeated runs
//! only transfer responses the cache has not seen yet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::client::ResponsesApi;
use crate::error::{Error, Result};
use crate::query::{ResponsesQuery, SortDirection, SortOrder};
use crate::storage::{ResponseStore, UpsertOutcome};

/// Options for a sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Page size. Defaults to the API handle's page size.
    pub page_size: Option<u16>,
    /// Stop after this many pages. `None` or `Some(0)` means until caught up.
    pub max_pages: Option<u32>,
    /// Prune the cache to this many responses after the run.
    pub keep_recent: Option<usize>,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The form that was synced.
    pub form_id: String,
    /// Pages requested.
    pub pages: u32,
    /// Responses received.
    pub fetched: usize,
    /// Responses new to the cache.
    pub inserted: usize,
    /// Responses whose cached payload changed.
    pub updated: usize,
    /// Responses already cached unchanged.
    pub unchanged: usize,
    /// Responses removed by pruning.
    pub pruned: usize,
    /// Cursor after the run.
    pub cursor: Option<String>,
}

impl SyncReport {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// A cloneable handle that stops a [`Syncer::watch`] loop.
#[derive(Debug, Clone, Default)]
pub struct SyncHandle {
    stop_signal: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl SyncHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the watch loop to stop, abandoning a round in progress.
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Check if a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        if !self.is_stopped() {
            self.notify.notified().await;
        }
    }
}

/// Downloads responses from an API into a [`ResponseStore`].
#[derive(Debug)]
pub struct Syncer<'a, A> {
    api: &'a A,
    store: &'a ResponseStore,
    options: SyncOptions,
}

impl<'a, A: ResponsesApi> Syncer<'a, A> {
    /// Create a syncer with default options.
    #[must_use]
    pub fn new(api: &'a A, store: &'a ResponseStore) -> Self {
        Self {
            api,
            store,
            options: SyncOptions::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Fetch pages after the stored cursor until caught up.
    ///
    /// Without a stored cursor the first page is requested oldest first, so
    /// its last token is a valid starting point for `after` paging. The
    /// cursor is persisted after every stored page; a failure leaves it at
    /// the last page that was fully stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a page request or a store operation fails.
    pub async fn run(&self) -> Result<SyncReport> {
        let form_id = self.api.form_id();
        let page_size = self.options.page_size.unwrap_or_else(|| self.api.page_size());
        let max_pages = self.options.max_pages.filter(|&max| max > 0);
        let mut cursor = self.store.cursor(form_id)?;
        let mut report = SyncReport {
            form_id: form_id.to_string(),
            ..SyncReport::default()
        };

        debug!(form_id, ?cursor, page_size, "starting sync");

        loop {
            if max_pages.is_some_and(|max| report.pages >= max) {
                debug!(form_id, pages = report.pages, "page limit reached");
                break;
            }

            let query = match &cursor {
                Some(token) => ResponsesQuery::new().page_size(page_size).after(token.clone()),
                None => ResponsesQuery::new()
                    .page_size(page_size)
                    .sort(SortOrder::new("submitted_at", SortDirection::Asc)),
            };

            let page = self.api.fetch(&query).await?;
            report.pages += 1;
            report.fetched += page.len();

            for response in &page {
                report.record(self.store.upsert(form_id, response)?);
            }

            let advanced = match page.last_token() {
                Some(last) if cursor.as_deref() != Some(last) => {
                    self.store.set_cursor(form_id, last)?;
                    cursor = Some(last.to_string());
                    true
                }
                _ => false,
            };

            if page.len() < usize::from(page_size) || !advanced {
                break;
            }
        }

        if let Some(keep) = self.options.keep_recent {
            report.pruned = self.store.prune_keep_recent(form_id, keep)?;
        }

        report.cursor = cursor;
        info!(
            form_id,
            pages = report.pages,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            "sync finished"
        );
        Ok(report)
    }

    /// Run a sync every `interval` until `handle` is stopped.
    ///
    /// Transient failures are logged and retried on the next round. A stop
    /// request interrupts both the sleep and a round in flight; an abandoned
    /// round keeps the cursor of its last stored page. Returns the number of
    /// completed rounds.
    ///
    /// # Errors
    ///
    /// Returns the error when the token is rejected, the form does not
    /// exist, or the cache fails, since later rounds cannot succeed either.
    pub async fn watch(&self, interval: Duration, handle: &SyncHandle) -> Result<u64> {
        let mut rounds = 0u64;

        while !handle.is_stopped() {
            let outcome = tokio::select! {
                outcome = self.run() => outcome,
                () = handle.stopped() => break,
            };

            match outcome {
                Ok(report) => {
                    rounds += 1;
                    if report.inserted + report.updated > 0 {
                        info!(
                            form_id = %report.form_id,
                            inserted = report.inserted,
                            updated = report.updated,
                            "new responses"
                        );
                    }
                }
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => warn!(error = %err, "sync round failed"),
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = handle.stopped() => break,
            }
        }

        info!(rounds, "watch stopped");
        Ok(rounds)
    }
}

fn is_fatal(err: &Error) -> bool {
    matches!(
        err,
        Error::Unauthorized { .. }
            | Error::FormNotFound { .. }
            | Error::DatabaseQuery(_)
            | Error::DatabaseOpen { .. }
            | Error::DatabaseMigration { .. }
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::model::{Response, Responses};

    /// Serves canned pages and records the queries it receives.
    struct FakeApi {
        page_size: u16,
        pages: Mutex<VecDeque<Result<Responses>>>,
        queries: Mutex<Vec<Vec<(&'static str, String)>>>,
        delay: Duration,
    }

    impl FakeApi {
        fn new(page_size: u16, pages: Vec<Result<Responses>>) -> Self {
            Self {
                page_size,
                pages: Mutex::new(pages.into()),
                queries: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        /// Every fetch waits this long before answering.
        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn queries(&self) -> Vec<Vec<(&'static str, String)>> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResponsesApi for FakeApi {
        fn form_id(&self) -> &str {
            "form1"
        }

        fn page_size(&self) -> u16 {
            self.page_size
        }

        async fn fetch(&self, query: &ResponsesQuery) -> Result<Responses> {
            self.queries.lock().unwrap().push(query.to_pairs());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Responses::default()))
        }
    }

    fn response(token: &str) -> Response {
        serde_json::from_value(serde_json::json!({
            "token": token,
            "landed_at": "2024-05-01T10:00:00Z",
            "submitted_at": "2024-05-01T10:05:00Z"
        }))
        .unwrap()
    }

    fn page(tokens: &[&str]) -> Result<Responses> {
        Ok(Responses {
            total_items: None,
            page_count: None,
            items: tokens.iter().map(|t| response(t)).collect(),
        })
    }

    fn value_of<'q>(query: &'q [(&'static str, String)], key: &str) -> Option<&'q str> {
        query
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_first_run_sorts_then_pages_after() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(2, vec![page(&["a", "b"]), page(&["c"])]);

        let report = Syncer::new(&api, &store).run().await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.inserted, 3);
        assert_eq!(report.cursor.as_deref(), Some("c"));
        assert_eq!(store.cursor("form1").unwrap().as_deref(), Some("c"));

        let queries = api.queries();
        assert_eq!(value_of(&queries[0], "sort"), Some("submitted_at,asc"));
        assert_eq!(value_of(&queries[0], "after"), None);
        assert_eq!(value_of(&queries[1], "after"), Some("b"));
        assert_eq!(value_of(&queries[1], "sort"), None);
    }

    #[tokio::test]
    async fn test_resumes_from_stored_cursor() {
        let store = ResponseStore::open_in_memory().unwrap();
        store.set_cursor("form1", "z").unwrap();
        let api = FakeApi::new(25, vec![page(&[])]);

        let report = Syncer::new(&api, &store).run().await.unwrap();

        assert_eq!(report.pages, 1);
        assert_eq!(report.fetched, 0);
        assert_eq!(report.cursor.as_deref(), Some("z"));
        assert_eq!(value_of(&api.queries()[0], "after"), Some("z"));
    }

    #[tokio::test]
    async fn test_counts_unchanged_and_updated() {
        let store = ResponseStore::open_in_memory().unwrap();
        store.upsert("form1", &response("a")).unwrap();
        let mut changed = response("b");
        changed.calculated.score = 1;
        store.upsert("form1", &changed).unwrap();

        let api = FakeApi::new(5, vec![page(&["a", "b", "c"])]);
        let report = Syncer::new(&api, &store).run().await.unwrap();

        assert_eq!(report.unchanged, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 1);
    }

    #[tokio::test]
    async fn test_max_pages_limits_run() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(1, vec![page(&["a"]), page(&["b"]), page(&["c"])]);

        let report = Syncer::new(&api, &store)
            .with_options(SyncOptions {
                max_pages: Some(2),
                ..SyncOptions::default()
            })
            .run()
            .await
            .unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.cursor.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_zero_max_pages_means_unlimited() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(1, vec![page(&["a"]), page(&["b"]), page(&[])]);

        let report = Syncer::new(&api, &store)
            .with_options(SyncOptions {
                max_pages: Some(0),
                ..SyncOptions::default()
            })
            .run()
            .await
            .unwrap();

        assert_eq!(report.pages, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.cursor.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_stops_when_cursor_does_not_advance() {
        let store = ResponseStore::open_in_memory().unwrap();
        store.set_cursor("form1", "a").unwrap();
        let api = FakeApi::new(1, vec![page(&["a"]), page(&["a"])]);

        let report = Syncer::new(&api, &store).run().await.unwrap();
        assert_eq!(report.pages, 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_cursor_of_last_stored_page() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(
            2,
            vec![
                page(&["a", "b"]),
                Err(Error::api(502, "bad gateway")),
            ],
        );

        let err = Syncer::new(&api, &store).run().await.unwrap_err();
        assert!(matches!(err, Error::Api { status: 502, .. }));
        assert_eq!(store.cursor("form1").unwrap().as_deref(), Some("b"));
        assert_eq!(store.count("form1").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_prunes_after_run() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(10, vec![page(&["a", "b", "c"])]);

        let report = Syncer::new(&api, &store)
            .with_options(SyncOptions {
                keep_recent: Some(1),
                ..SyncOptions::default()
            })
            .run()
            .await
            .unwrap();

        assert_eq!(report.pruned, 2);
        assert_eq!(store.count("form1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watch_returns_immediately_when_stopped() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(10, vec![]);
        let handle = SyncHandle::new();
        handle.stop();

        let rounds = Syncer::new(&api, &store)
            .watch(Duration::from_secs(3600), &handle)
            .await
            .unwrap();
        assert_eq!(rounds, 0);
        assert!(api.queries().is_empty());
    }

    #[tokio::test]
    async fn test_stop_wakes_sleeping_watch() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(10, vec![]);
        let handle = SyncHandle::new();
        let syncer = Syncer::new(&api, &store);

        let stopper = handle.clone();
        let watch = syncer.watch(Duration::from_secs(3600), &handle);
        let stop = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.stop();
        };
        let (rounds, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(watch, stop)
        })
        .await
        .expect("watch kept sleeping after stop");

        assert_eq!(rounds.unwrap(), 1);
        assert_eq!(api.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_round_in_flight() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(10, vec![page(&["a"])]).with_delay(Duration::from_secs(3600));
        let handle = SyncHandle::new();
        let syncer = Syncer::new(&api, &store);

        let stopper = handle.clone();
        let watch = syncer.watch(Duration::from_secs(3600), &handle);
        let stop = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.stop();
        };
        let (rounds, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(watch, stop)
        })
        .await
        .expect("watch waited for the hung round");

        assert_eq!(rounds.unwrap(), 0);
        assert_eq!(api.queries().len(), 1);
        assert_eq!(store.count("form1").unwrap(), 0);
        assert!(store.cursor("form1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_continues_after_transient_error() {
        crate::logging::init_test_logging();
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(
            10,
            vec![
                Err(Error::RateLimited { retry_after: None }),
                page(&["a"]),
            ],
        );
        let handle = SyncHandle::new();
        let syncer = Syncer::new(&api, &store);

        let stopper = handle.clone();
        let watch = syncer.watch(Duration::from_millis(5), &handle);
        let stop = async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            stopper.stop();
        };
        let (rounds, ()) = tokio::join!(watch, stop);

        assert!(rounds.unwrap() >= 1);
        assert_eq!(store.count("form1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_watch_stops_on_fatal_error() {
        let store = ResponseStore::open_in_memory().unwrap();
        let api = FakeApi::new(10, vec![Err(Error::Unauthorized { status: 401 })]);
        let handle = SyncHandle::new();

        let err = Syncer::new(&api, &store)
            .watch(Duration::from_millis(5), &handle)
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }
}
