//! Output rendering for CLI commands.
//!
//! Every writer takes an `impl Write` so the binary passes stdout and tests
//! pass a buffer.

use std::io::Write;

use chrono::{DateTime, Utc};

use super::OutputFormat;
use crate::config::Config;
use crate::error::Result;
use crate::model::{Answer, Response};
use crate::storage::StoreStats;
use crate::sync::SyncReport;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const REDACTED: &str = "<redacted>";
const NOT_SET: &str = "(not set)";

/// Write a list of responses.
///
/// # Errors
///
/// Returns an error if writing or JSON serialization fails.
pub fn write_responses(
    out: &mut impl Write,
    responses: &[Response],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, responses)?;
            writeln!(out)?;
        }
        OutputFormat::Table => write_table(out, responses)?,
        OutputFormat::Plain => {
            for (i, response) in responses.iter().enumerate() {
                if i > 0 {
                    writeln!(out)?;
                }
                write_plain(out, response)?;
            }
        }
    }
    Ok(())
}

/// Write a single response.
///
/// # Errors
///
/// Returns an error if writing or JSON serialization fails.
pub fn write_response(
    out: &mut impl Write,
    response: &Response,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, response)?;
            writeln!(out)?;
            Ok(())
        }
        OutputFormat::Table => write_table(out, std::slice::from_ref(response)),
        OutputFormat::Plain => write_plain(out, response),
    }
}

fn write_plain(out: &mut impl Write, response: &Response) -> Result<()> {
    writeln!(out, "Response {}", response.token)?;
    writeln!(out, "  Landed:     {}", format_time(response.landed_at))?;
    match response.submitted_at {
        Some(submitted) => writeln!(out, "  Submitted:  {}", format_time(submitted))?,
        None => writeln!(out, "  Submitted:  (partial)")?,
    }
    if response.calculated.score != 0 {
        writeln!(out, "  Score:      {}", response.calculated.score)?;
    }
    for (key, value) in &response.hidden {
        writeln!(out, "  [{key}] {value}")?;
    }
    for answer in &response.answers {
        writeln!(out, "  {}: {}", answer_label(answer), answer.value())?;
    }
    Ok(())
}

fn write_table(out: &mut impl Write, responses: &[Response]) -> Result<()> {
    let token_width = responses
        .iter()
        .map(|r| r.token.len())
        .max()
        .unwrap_or(0)
        .max("TOKEN".len());

    writeln!(
        out,
        "{:<token_width$}  {:<16}  {:<16}  {:>7}  {:>5}",
        "TOKEN", "LANDED", "SUBMITTED", "ANSWERS", "SCORE"
    )?;
    for response in responses {
        let submitted = response
            .submitted_at
            .map_or_else(|| "partial".to_string(), format_time);
        writeln!(
            out,
            "{:<token_width$}  {:<16}  {:<16}  {:>7}  {:>5}",
            response.token,
            format_time(response.landed_at),
            submitted,
            response.answers.len(),
            response.calculated.score
        )?;
    }
    Ok(())
}

/// Write cache statistics.
///
/// # Errors
///
/// Returns an error if writing or JSON serialization fails.
pub fn write_stats(out: &mut impl Write, stats: &StoreStats, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, stats)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "Form:        {}", stats.form_id)?;
    writeln!(out, "Responses:   {}", stats.total_responses)?;
    writeln!(out, "Completed:   {}", stats.completed_responses)?;
    writeln!(out, "Oldest:      {}", format_optional_time(stats.oldest_submission))?;
    writeln!(out, "Newest:      {}", format_optional_time(stats.newest_submission))?;
    writeln!(out, "Cursor:      {}", stats.cursor.as_deref().unwrap_or("-"))?;
    writeln!(out, "Size:        {} bytes", stats.db_size_bytes)?;
    Ok(())
}

/// Write the outcome of a sync run.
///
/// # Errors
///
/// Returns an error if writing or JSON serialization fails.
pub fn write_sync_report(out: &mut impl Write, report: &SyncReport, json: bool) -> Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "Synced {} responses from {} pages ({} new, {} updated, {} unchanged)",
        report.fetched, report.pages, report.inserted, report.updated, report.unchanged
    )?;
    if report.pruned > 0 {
        writeln!(out, "Pruned {} old responses", report.pruned)?;
    }
    if let Some(cursor) = &report.cursor {
        writeln!(out, "Cursor: {cursor}")?;
    }
    Ok(())
}

/// Write the effective configuration with the token redacted.
///
/// # Errors
///
/// Returns an error if writing or JSON serialization fails.
pub fn write_config(out: &mut impl Write, config: &Config, json: bool) -> Result<()> {
    let mut shown = config.clone();
    if shown.api.token.is_some() {
        shown.api.token = Some(REDACTED.to_string());
    }

    if json {
        serde_json::to_writer_pretty(&mut *out, &shown)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "Current Configuration")?;
    writeln!(out, "=====================")?;
    writeln!(out)?;
    writeln!(out, "[API]")?;
    writeln!(out, "  Base URL:           {}", shown.api.base_url)?;
    let form_id = shown.api.form_id.as_deref().unwrap_or(NOT_SET);
    let token = shown.api.token.as_deref().unwrap_or(NOT_SET);
    writeln!(out, "  Form:               {form_id}")?;
    writeln!(out, "  Token:              {token}")?;
    writeln!(out, "  Timeout (secs):     {}", shown.api.timeout_secs)?;
    writeln!(out)?;
    writeln!(out, "[Fetch]")?;
    writeln!(out, "  Page size:          {}", shown.fetch.page_size)?;
    writeln!(out, "  Max retries:        {}", shown.fetch.max_retries)?;
    writeln!(out, "  Retry backoff (ms): {}", shown.fetch.retry_backoff_ms)?;
    writeln!(out, "  Max pages:          {}", shown.fetch.max_pages)?;
    writeln!(out, "  Watch interval (s): {}", shown.fetch.watch_interval_secs)?;
    writeln!(out)?;
    writeln!(out, "[Storage]")?;
    writeln!(out, "  Database path:      {}", shown.database_path().display())?;
    writeln!(out, "  Max responses:      {}", shown.storage.max_responses)?;
    Ok(())
}

fn answer_label(answer: &Answer) -> &str {
    let field = &answer.field;
    field
        .title
        .as_deref()
        .or(field.field_ref.as_deref())
        .unwrap_or(&field.id)
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn format_optional_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(|| "-".to_string(), format_time)
}
