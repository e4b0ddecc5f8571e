//! HTTP client for the Typeform Responses API.
//!
//! [`Typeform`] is the main entry point: build one for a form and an access
//! token, then retrieve pages of [`Responses`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_BASE_URL};
use crate::error::{Error, Result};
use crate::model::{Response, Responses};
use crate::query::{ResponsesQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries for throttled or failed requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

const USER_AGENT: &str = concat!("typeform/", env!("CARGO_PKG_VERSION"));

/// Largest exponent applied to the retry backoff.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Source of response pages for one form.
///
/// [`Typeform`] is the production implementation; the sync engine only
/// depends on this trait.
#[async_trait]
pub trait ResponsesApi: Send + Sync {
    /// The form whose responses are returned.
    fn form_id(&self) -> &str;

    /// The page size used when a query does not set one.
    fn page_size(&self) -> u16;

    /// Fetch one page of responses.
    async fn fetch(&self, query: &ResponsesQuery) -> Result<Responses>;
}

/// Error body returned by the API on failures.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    description: Option<String>,
}

/// Handle for reading the responses of one form.
#[derive(Clone)]
pub struct Typeform {
    http: reqwest::Client,
    base_url: String,
    form_id: String,
    token: String,
    page_size: u16,
    max_retries: u32,
    retry_backoff: Duration,
}

impl fmt::Debug for Typeform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typeform")
            .field("base_url", &self.base_url)
            .field("form_id", &self.form_id)
            .field("token", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Typeform {
    /// Handle for `form_id` against the public API with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the form id or token is empty, or the HTTP client
    /// cannot be created.
    pub fn new(form_id: &str, token: &str) -> Result<Self> {
        Self::builder(form_id, token).build()
    }

    /// Start building a handle with custom settings.
    #[must_use]
    pub fn builder(form_id: impl Into<String>, token: impl Into<String>) -> TypeformBuilder {
        TypeformBuilder::new(form_id, token)
    }

    /// Build a handle from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the form id or token is missing from the
    /// configuration, or the HTTP client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::builder(config.form_id()?, config.token()?)
            .base_url(&config.api.base_url)
            .timeout(config.timeout())
            .page_size(config.fetch.page_size)
            .max_retries(config.fetch.max_retries)
            .retry_backoff(config.retry_backoff())
            .build()
    }

    /// The form this handle reads from.
    #[must_use]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The page size used by [`Typeform::responses`] and friends.
    #[must_use]
    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    /// Full URL of this form's responses endpoint.
    #[must_use]
    pub fn responses_url(&self) -> String {
        format!("{}/forms/{}/responses", self.base_url, self.form_id)
    }

    /// Retrieve the first page of responses, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the payload cannot be decoded.
    pub async fn responses(&self) -> Result<Responses> {
        self.responses_with(&self.default_query()).await
    }

    /// Retrieve the responses processed after the response with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the payload cannot be decoded.
    pub async fn responses_after(&self, token: &str) -> Result<Responses> {
        self.responses_with(&self.default_query().after(token)).await
    }

    /// Retrieve one page for an arbitrary query.
    ///
    /// Throttled (429) and server-side (5xx) failures are retried with
    /// exponential backoff, honouring `Retry-After` when the API sends it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] for an invalid query, or the last
    /// request error once retries are exhausted.
    pub async fn responses_with(&self, query: &ResponsesQuery) -> Result<Responses> {
        query.validate()?;

        let mut attempt = 0;
        loop {
            match self.send_once(query).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| self.backoff_for(attempt));
                    attempt += 1;
                    warn!(
                        form_id = %self.form_id,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying responses request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Retrieve every response of the form, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails.
    pub async fn all_responses(&self) -> Result<Vec<Response>> {
        self.all_responses_with(&ResponsesQuery::new()).await
    }

    /// Retrieve every response matching `filter`, following `before` cursors
    /// until a short or empty page.
    ///
    /// Cursor and sort parameters of `filter` are ignored; paging always
    /// runs newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if any page request fails.
    pub async fn all_responses_with(&self, filter: &ResponsesQuery) -> Result<Vec<Response>> {
        let page_size = filter.requested_page_size().unwrap_or(self.page_size);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let mut query = filter.clone().without_paging().page_size(page_size);
            if let Some(token) = &cursor {
                query = query.before(token.clone());
            }

            let page = self.responses_with(&query).await?;
            pages += 1;
            let count = page.len();
            let next = page.last_token().map(str::to_string);
            items.extend(page);

            debug!(form_id = %self.form_id, page = pages, count, "fetched responses page");

            if count < usize::from(page_size) || next.is_none() || next == cursor {
                break;
            }
            cursor = next;
        }

        info!(
            form_id = %self.form_id,
            pages,
            total = items.len(),
            "retrieved all responses"
        );
        Ok(items)
    }

    fn default_query(&self) -> ResponsesQuery {
        ResponsesQuery::new().page_size(self.page_size)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }

    async fn send_once(&self, query: &ResponsesQuery) -> Result<Responses> {
        let url = self.responses_url();
        let pairs = query.to_pairs();
        debug!(%url, ?pairs, "GET responses");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&pairs)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.bytes().await?;
            return serde_json::from_slice(&body).map_err(|source| Error::Decode { source });
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized {
                status: status.as_u16(),
            }),
            StatusCode::NOT_FOUND => Err(Error::FormNotFound {
                form_id: self.form_id.clone(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(Error::RateLimited { retry_after })
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::api(status.as_u16(), api_error_message(&text, status)))
            }
        }
    }
}

#[async_trait]
impl ResponsesApi for Typeform {
    fn form_id(&self) -> &str {
        &self.form_id
    }

    fn page_size(&self) -> u16 {
        self.page_size
    }

    async fn fetch(&self, query: &ResponsesQuery) -> Result<Responses> {
        self.responses_with(query).await
    }
}

/// Pick the most useful message out of an error body.
fn api_error_message(body: &str, status: StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = parsed.description.or(parsed.code) {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

/// Builder for [`Typeform`].
#[derive(Clone)]
pub struct TypeformBuilder {
    form_id: String,
    token: String,
    base_url: String,
    timeout: Duration,
    page_size: u16,
    max_retries: u32,
    retry_backoff: Duration,
    user_agent: String,
}

impl fmt::Debug for TypeformBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeformBuilder")
            .field("form_id", &self.form_id)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl TypeformBuilder {
    fn new(form_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            form_id: form_id.into(),
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// API base URL, e.g. `https://api.eu.typeform.com`.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Page size for requests that don't set one.
    #[must_use]
    pub fn page_size(mut self, page_size: u16) -> Self {
        self.page_size = page_size;
        self
    }

    /// Retries for throttled or failed requests. 0 disables retrying.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base delay between retries, doubled on each attempt.
    #[must_use]
    pub fn retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// `User-Agent` header sent with every request.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Validate the settings and create the handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingFormId`] or [`Error::MissingToken`] for empty
    /// credentials, [`Error::ConfigValidation`] for a malformed form id, base
    /// URL or page size, and [`Error::Http`] if the HTTP client cannot be
    /// created.
    pub fn build(self) -> Result<Typeform> {
        let form_id = self.form_id.trim().to_string();
        if form_id.is_empty() {
            return Err(Error::MissingFormId);
        }
        if form_id
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
        {
            return Err(Error::config_validation(format!(
                "invalid form id: {form_id}"
            )));
        }
        if self.token.trim().is_empty() {
            return Err(Error::MissingToken);
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::config_validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }

        let base_url = self.base_url.trim_end_matches('/').to_string();
        if reqwest::Url::parse(&base_url).is_err() {
            return Err(Error::config_validation(format!(
                "invalid base_url: {base_url}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()?;

        Ok(Typeform {
            http,
            base_url,
            form_id,
            token: self.token,
            page_size: self.page_size,
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
        })
    }
}
