//! Query parameters for the responses endpoint.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Largest page size the API accepts.
pub const MAX_PAGE_SIZE: u16 = 1000;

/// Page size the API uses when none is given.
pub const DEFAULT_PAGE_SIZE: u16 = 25;

/// Direction of a [`SortOrder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Oldest first.
    Asc,
    /// Newest first.
    Desc,
}

/// Sort order for a responses query, rendered as `field,asc|desc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOrder {
    /// Field to sort by, e.g. `submitted_at` or a question id.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl SortOrder {
    /// Sort by `field` in the given direction.
    #[must_use]
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{},{dir}", self.field)
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (field, dir) = s.split_once(',').unwrap_or((s, "desc"));
        let field = field.trim();
        if field.is_empty() {
            return Err(Error::invalid_query(format!("empty sort field in '{s}'")));
        }
        let direction = match dir.trim().to_ascii_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
                return Err(Error::invalid_query(format!(
                    "sort direction must be asc or desc, got '{other}'"
                )))
            }
        };
        Ok(Self::new(field, direction))
    }
}

/// Parameters for `GET /forms/{form_id}/responses`.
///
/// Every parameter is optional; unset parameters are left off the request so
/// the API applies its own defaults.
///
/// ```
/// use typeform::ResponsesQuery;
///
/// let query = ResponsesQuery::new().page_size(100).completed(true);
/// assert_eq!(
///     query.to_pairs(),
///     vec![("page_size", "100".to_string()), ("completed", "true".to_string())]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsesQuery {
    page_size: Option<u16>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    after: Option<String>,
    before: Option<String>,
    included_response_ids: Vec<String>,
    completed: Option<bool>,
    sort: Option<SortOrder>,
    query: Option<String>,
    fields: Vec<String>,
}

impl ResponsesQuery {
    /// An empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of responses per page.
    #[must_use]
    pub fn page_size(mut self, page_size: u16) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Only responses submitted at or after this time.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Only responses submitted at or before this time.
    #[must_use]
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Only responses processed after the response with this token.
    #[must_use]
    pub fn after(mut self, token: impl Into<String>) -> Self {
        self.after = Some(token.into());
        self
    }

    /// Only responses processed before the response with this token.
    #[must_use]
    pub fn before(mut self, token: impl Into<String>) -> Self {
        self.before = Some(token.into());
        self
    }

    /// Restrict the result to these response ids.
    #[must_use]
    pub fn included_response_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.included_response_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Only completed (`true`) or only partial (`false`) responses.
    #[must_use]
    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Order of the returned responses.
    #[must_use]
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Free-text search over answers and hidden fields.
    #[must_use]
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.query = Some(text.into());
        self
    }

    /// Only include answers for these field ids.
    #[must_use]
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Drop the cursors and the sort order, keeping the filters.
    #[must_use]
    pub fn without_paging(mut self) -> Self {
        self.after = None;
        self.before = None;
        self.sort = None;
        self
    }

    /// The page size set on this query, if any.
    #[must_use]
    pub fn requested_page_size(&self) -> Option<u16> {
        self.page_size
    }

    /// Check the parameters for combinations the API rejects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] when the page size is out of range,
    /// `since` is later than `until`, or a sort order is combined with a
    /// cursor.
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.page_size {
            if size == 0 || size > MAX_PAGE_SIZE {
                return Err(Error::invalid_query(format!(
                    "page_size must be between 1 and {MAX_PAGE_SIZE}, got {size}"
                )));
            }
        }

        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(Error::invalid_query(format!(
                    "since ({}) is later than until ({})",
                    format_time(since),
                    format_time(until)
                )));
            }
        }

        if self.sort.is_some() && (self.after.is_some() || self.before.is_some()) {
            return Err(Error::invalid_query(
                "sort cannot be combined with after or before",
            ));
        }

        Ok(())
    }

    /// Query string pairs in a stable order, omitting unset parameters.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();

        if let Some(size) = self.page_size {
            pairs.push(("page_size", size.to_string()));
        }
        if let Some(since) = self.since {
            pairs.push(("since", format_time(since)));
        }
        if let Some(until) = self.until {
            pairs.push(("until", format_time(until)));
        }
        if let Some(after) = &self.after {
            pairs.push(("after", after.clone()));
        }
        if let Some(before) = &self.before {
            pairs.push(("before", before.clone()));
        }
        if !self.included_response_ids.is_empty() {
            pairs.push(("included_response_ids", self.included_response_ids.join(",")));
        }
        if let Some(completed) = self.completed {
            pairs.push(("completed", completed.to_string()));
        }
        if let Some(sort) = &self.sort {
            pairs.push(("sort", sort.to_string()));
        }
        if let Some(query) = &self.query {
            pairs.push(("query", query.clone()));
        }
        if !self.fields.is_empty() {
            pairs.push(("fields", self.fields.join(",")));
        }

        pairs
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
