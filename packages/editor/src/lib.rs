//! # Folio Editor
//!
//! Editing-session engine for Folio report definitions.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ folio-expr: parse / stringify / evaluate    │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ editor: one live session over a report      │
//! │  - DocumentStore with path pub/sub          │
//! │  - Links: role → path, kept resolvable      │
//! │  - ExprPipeline: debounced, versioned parse │
//! │  - SchemaBuilder: last request wins         │
//! │  - History: deduped, capped snapshots       │
//! │  - SourceResolver: sequential data sources  │
//! │  - Projects: persisted report bundles       │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ serializer / loader: files in and out       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **The store is the hub**: every component observes it through prefix subscriptions
//! 2. **Links never dangle**: removals clear them, splices relocate them
//! 3. **Stale work is dropped**: parses carry a buffer version, schema builds a generation
//! 4. **Timers are deadlines**: the host calls `poll` or awaits `settle`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_editor::{EditorConfig, ExprMode, Session};
//!
//! let mut session = Session::new(EditorConfig::default());
//! let label = session.add_widget("label", None)?;
//! session.select_widget(&label)?;
//! session.set_expr_text(":name")?;
//! session.settle().await;
//! assert!(session.pipeline().ast().is_some());
//! ```

mod config;
mod debounce;
mod errors;
mod history;
mod links;
mod model;
mod path;
mod persist;
mod pipeline;
mod projects;
mod schema;
mod session;
mod sources;
mod store;

pub mod loader;
pub mod serializer;

pub use config::{EditorConfig, FormatConfig, PipelineMode, DEFAULT_CONFIG_NAME};
pub use debounce::Debounce;
pub use errors::{EditorError, FetchError, PersistError, StoreError};
pub use history::History;
pub use links::{Links, Role};
pub use model::{
    is_form_control, AvailableSource, Direction, Download, Project, ReportKind, Shortcut, SourceDecl, SourceKind, Tab,
    WidgetKind,
};
pub use path::{Path, Segment};
pub use persist::{FileStore, KeyValueStore, MemoryStore, DIFF_KEY, PROJECTS_KEY, SESSION_KEY};
pub use pipeline::{format_source, parse_source, ExprMode, ExprPipeline, ExprSource, ExprState, Fragment, Parsed};
pub use projects::{ImportOutcome, ProjectStore};
pub use schema::{context_at, schema_at, Schema, SchemaBuilder, SchemaEntry, SchemaJob};
pub use serializer::CompactOptions;
pub use session::{session_operators, Session};
pub use sources::{compare_values, CacheUpdate, HttpClient, HttpRequest, Producer, Resolved, SourceResolver};
pub use store::{Change, DocumentStore, Subscription};

#[cfg(feature = "http")]
pub use sources::http::ReqwestClient;
