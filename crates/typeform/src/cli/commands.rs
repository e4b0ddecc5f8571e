//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand, ValueEnum};

use crate::query::{ResponsesQuery, SortOrder};

/// Arguments for fetching responses straight from the API.
#[derive(Debug, Args)]
pub struct ResponsesCommand {
    /// Responses per page (1-1000)
    #[arg(short = 'n', long)]
    pub page_size: Option<u16>,

    /// Only responses submitted since this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_time)]
    pub since: Option<DateTime<Utc>>,

    /// Only responses submitted until this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_time)]
    pub until: Option<DateTime<Utc>>,

    /// Only responses processed after this token
    #[arg(long, conflicts_with_all = ["before", "all"])]
    pub after: Option<String>,

    /// Only responses processed before this token
    #[arg(long, conflicts_with = "all")]
    pub before: Option<String>,

    /// Only completed responses
    #[arg(long, conflicts_with = "partial")]
    pub completed: bool,

    /// Only partial responses
    #[arg(long)]
    pub partial: bool,

    /// Sort order, e.g. "submitted_at,asc"
    #[arg(long)]
    pub sort: Option<SortOrder>,

    /// Free-text search over answers and hidden fields
    #[arg(short, long)]
    pub search: Option<String>,

    /// Only include answers to this field (repeatable)
    #[arg(long = "field", value_name = "FIELD_ID")]
    pub fields: Vec<String>,

    /// Follow cursors until every matching response is fetched
    #[arg(short, long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

impl ResponsesCommand {
    /// Build the API query described by these arguments.
    #[must_use]
    pub fn to_query(&self) -> ResponsesQuery {
        let mut query = ResponsesQuery::new();

        if let Some(size) = self.page_size {
            query = query.page_size(size);
        }
        if let Some(since) = self.since {
            query = query.since(since);
        }
        if let Some(until) = self.until {
            query = query.until(until);
        }
        if let Some(after) = &self.after {
            query = query.after(after.clone());
        }
        if let Some(before) = &self.before {
            query = query.before(before.clone());
        }
        if self.completed {
            query = query.completed(true);
        } else if self.partial {
            query = query.completed(false);
        }
        if let Some(sort) = &self.sort {
            query = query.sort(sort.clone());
        }
        if let Some(search) = &self.search {
            query = query.search(search.clone());
        }
        if !self.fields.is_empty() {
            query = query.fields(self.fields.iter().cloned());
        }

        query
    }
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Stop after this many pages (at least 1)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Keep syncing at an interval until interrupted
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between rounds in watch mode
    #[arg(short, long, requires = "watch")]
    pub interval: Option<u64>,

    /// Forget the stored cursor and sync from the beginning
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Local cache commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// List cached responses, newest first
    List {
        /// Maximum number of responses
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one cached response
    Show {
        /// The response token
        token: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "plain")]
        format: OutputFormat,
    },

    /// Show cache statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete all but the most recent responses
    Prune {
        /// Number of responses to keep
        #[arg(short, long)]
        keep: usize,
    },

    /// Delete one cached response
    Delete {
        /// The response token
        token: String,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// Formatted table
    Table,
    /// JSON output
    Json,
}

/// Parse an RFC 3339 timestamp or a bare date (midnight UTC).
fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc())
        .ok_or_else(|| format!("invalid time '{value}', expected RFC 3339 or YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn responses_command() -> ResponsesCommand {
        ResponsesCommand {
            page_size: None,
            since: None,
            until: None,
            after: None,
            before: None,
            completed: false,
            partial: false,
            sort: None,
            search: None,
            fields: Vec::new(),
            all: false,
            format: OutputFormat::Plain,
        }
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }

    #[test]
    fn test_parse_time_rfc3339() {
        let time = parse_time("2024-03-01T12:30:00+01:00").unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2024, 3, 1, 11, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_time_date() {
        let time = parse_time("2024-03-01").unwrap();
        assert_eq!(time, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_time_invalid() {
        let err = parse_time("yesterday").unwrap_err();
        assert!(err.contains("yesterday"));
    }

    #[test]
    fn test_empty_command_builds_empty_query() {
        assert!(responses_command().to_query().to_pairs().is_empty());
    }

    #[test]
    fn test_partial_maps_to_completed_false() {
        let cmd = ResponsesCommand {
            partial: true,
            ..responses_command()
        };
        assert_eq!(
            cmd.to_query().to_pairs(),
            vec![("completed", "false".to_string())]
        );
    }

    #[test]
    fn test_to_query_carries_filters() {
        let cmd = ResponsesCommand {
            page_size: Some(50),
            completed: true,
            search: Some("pizza".to_string()),
            fields: vec!["f1".to_string(), "f2".to_string()],
            ..responses_command()
        };
        let pairs = cmd.to_query().to_pairs();
        assert_eq!(
            pairs,
            vec![
                ("page_size", "50".to_string()),
                ("completed", "true".to_string()),
                ("query", "pizza".to_string()),
                ("fields", "f1,f2".to_string()),
            ]
        );
    }
}
