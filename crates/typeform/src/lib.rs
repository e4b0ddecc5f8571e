//! `typeform` - A client for the Typeform Responses API
//!
//! This library fetches form responses over HTTP, decodes them into typed
//! models, and keeps an incremental local cache in `SQLite`.
//!
//! ```no_run
//! # async fn run() -> typeform::Result<()> {
//! let client = typeform::Typeform::new("abc123", "tfp_token")?;
//! let page = client.responses().await?;
//! for response in &page {
//!     println!("{} completed: {}", response.token, response.is_completed());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod storage;
pub mod sync;

pub use client::{ResponsesApi, Typeform, TypeformBuilder};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use model::{Answer, AnswerType, AnswerValue, Response, Responses};
pub use query::{ResponsesQuery, SortDirection, SortOrder};
pub use storage::{ResponseStore, StoreStats, UpsertOutcome};
pub use sync::{SyncHandle, SyncOptions, SyncReport, Syncer};
