//! # Session
//!
//! One editing session over a [`DocumentStore`].
//!
//! ```text
//!                 ┌────────────── DocumentStore ──────────────┐
//!   operations ──►│ report      sources      projects         │
//!                 └─────┬─────────────────────────────────────┘
//!                       │ Change (prefix subscriptions)
//!        ┌──────────────┼───────────────┬─────────────────┐
//!        ▼              ▼               ▼                 ▼
//!      Links      ExprPipeline      History         SchemaBuilder
//!   (relocate/     (re-seed on     (snapshot after   (rebuild at the
//!    clear)       target change)     quiet time)      expr path)
//! ```
//!
//! Every operation mutates the store synchronously and then drains the
//! change bus, so links never point at a path that no longer resolves.
//! Timers are deadlines polled by [`Session::poll`]; [`Session::settle`]
//! sleeps until nothing is pending.

use crate::config::{EditorConfig, PipelineMode};
use crate::errors::{EditorError, StoreError};
use crate::history::History;
use crate::links::{Links, Role};
use crate::loader::{self, JSON_MIME, SOURCE_MIME};
use crate::model::{is_form_control, Direction, Download, Shortcut, Tab, WidgetKind, REPEATER_SLOTS, SINGLETONS};
use crate::path::{Path, Segment};
use crate::persist::{FileStore, KeyValueStore, MemoryStore, DIFF_KEY};
use crate::pipeline::{ExprMode, ExprPipeline, ExprSource, ExprState, Fragment, Parsed};
use crate::projects::{self, ImportOutcome, ProjectStore};
use crate::schema::{context_at, Schema, SchemaBuilder, SchemaJob};
use crate::serializer::{self, CompactOptions};
use crate::sources::{CacheUpdate, HttpClient, SourceResolver};
use crate::store::{DocumentStore, Subscription, PROJECTS, REPORT, SOURCES};
use folio_expr::{clock_specials, evaluate, stringify, Ast, Context, Operators, Root, StringifyOptions};
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::time::Instant;

/// Builtin operators plus `debug`, which logs its arguments and returns the first
pub fn session_operators() -> Operators {
    let mut ops = Operators::builtin();
    ops.register("debug", |args: &[Value]| {
        tracing::debug!(?args, "debug operator");
        Ok(args.first().cloned().unwrap_or(Value::Null))
    });
    ops
}

#[derive(Debug)]
pub struct Session {
    config: EditorConfig,
    store: DocumentStore,
    changes: Subscription,
    links: Links,
    pipeline: ExprPipeline,
    /// Parent subtree of the expression target
    watch: Option<Subscription>,
    schema: SchemaBuilder,
    history: History,
    resolver: SourceResolver,
    projects: ProjectStore,
    tab: Tab,
    overrides: Map<String, Value>,
    /// Fixed special variables; the clock is used when unset
    special: Option<Map<String, Value>>,
    root: Option<Arc<Root>>,
    preview: Option<Value>,
}

impl Session {
    /// Session persisting to `config.persist_dir`, or in memory without one
    pub fn new(config: EditorConfig) -> Self {
        let kv: Arc<dyn KeyValueStore> = match &config.persist_dir {
            Some(dir) => Arc::new(FileStore::new(dir.clone())),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_kv(config, kv)
    }

    pub fn with_kv(config: EditorConfig, kv: Arc<dyn KeyValueStore>) -> Self {
        let mut store = DocumentStore::new();
        let changes = store.subscribe(Path::root());
        let mut history = History::new(config.history_cap, config.history_delay());
        history.reset(snapshot_of(&store));

        Self {
            pipeline: ExprPipeline::new(config.expr_latency(), config.format_options()),
            schema: SchemaBuilder::new(config.schema_delay()),
            resolver: SourceResolver::new(Arc::new(session_operators())),
            projects: ProjectStore::new(kv),
            config,
            store,
            changes,
            links: Links::new(),
            watch: None,
            history,
            tab: Tab::default(),
            overrides: Map::new(),
            special: None,
            root: None,
            preview: None,
        }
    }

    pub fn with_http(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.resolver.set_http(client);
        self
    }

    /// Runtime for schema rebuild tasks when `poll` is driven from outside one
    pub fn with_runtime(mut self, runtime: tokio::runtime::Handle) -> Self {
        self.schema.set_runtime(runtime);
        self
    }

    pub fn with_special(mut self, special: Map<String, Value>) -> Self {
        self.special = Some(special);
        self
    }

    pub fn register_producer<F>(&mut self, name: impl Into<String>, producer: F)
    where
        F: Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        self.resolver.register_producer(name, producer);
    }

    /// Restore persisted projects and the last unlinked session
    pub async fn restore(&mut self) -> Result<bool, EditorError> {
        let restored = self.projects.restore(&mut self.store).await?;
        self.sync();
        self.links.clear_all();
        self.close_expr();
        let snapshot = self.snapshot();
        self.history.reset(snapshot);
        Ok(restored)
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn report(&self) -> &Value {
        self.store.report()
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn link(&self, role: Role) -> Option<&Path> {
        self.links.get(role)
    }

    pub fn pipeline(&self) -> &ExprPipeline {
        &self.pipeline
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.latest()
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    /// Last successful preview value
    pub fn preview(&self) -> Option<&Value> {
        self.preview.as_ref()
    }

    pub fn set_mode(&mut self, mode: PipelineMode) {
        self.config.mode = mode;
        self.pipeline.set_latency(self.config.expr_latency());
    }

    pub fn set_tab(&mut self, tab: Tab) {
        tracing::debug!(?tab, "tab changed");
        self.tab = tab;
    }

    pub fn set_param_override(&mut self, name: impl Into<String>, value: Value) {
        self.overrides.insert(name.into(), value);
    }

    // --- widgets ---

    /// Append a widget of `kind` to `parent`, the selected container, or the report
    pub fn add_widget(&mut self, kind: &str, parent: Option<&Path>) -> Result<Path, EditorError> {
        let kind = WidgetKind::parse(kind).ok_or_else(|| EditorError::UnknownWidget(kind.to_string()))?;
        let owner = match parent {
            Some(parent) => parent.clone(),
            None => self.default_parent(),
        };
        let list = self.widget_list(&owner)?;

        let index = self.store.push(&list, kind.template())?;
        if let Some(layout) = self.array_at(&owner.join("layout")) {
            self.store.push(&layout, json!([0, 0]))?;
        }
        self.sync();

        let path = list.join(index);
        tracing::debug!(kind = kind.name(), %path, "widget added");
        Ok(path)
    }

    /// Link `path` as the widget and open its main expression
    pub fn select_widget(&mut self, path: &Path) -> Result<(), EditorError> {
        let widget = self.store.get(path).ok_or_else(|| StoreError::Missing(path.clone()))?;
        let kind = WidgetKind::of(widget);
        let field = kind
            .and_then(WidgetKind::default_expr_field)
            .filter(|field| widget.get(*field).is_some());

        self.links.set(Role::Widget, path.clone());
        match field {
            Some(field) => {
                let mode = match kind {
                    Some(kind) if kind.is_markup() => ExprMode::markup(),
                    Some(WidgetKind::Label | WidgetKind::Measured) => ExprMode {
                        label: true,
                        ..ExprMode::default()
                    },
                    _ => ExprMode::default(),
                };
                self.open_expr(path.join(field), mode)?;
            }
            None => {
                self.links.clear(Role::Expr);
                self.close_expr();
            }
        }
        Ok(())
    }

    /// Remove a widget. Repeater slots and report singletons are cleared;
    /// list items are spliced out together with their paired entries.
    pub fn remove_widget(&mut self, path: &Path) -> Result<(), EditorError> {
        if !self.store.resolves(path) {
            return Err(StoreError::Missing(path.clone()).into());
        }
        let parent = path.parent().ok_or(StoreError::RootMutation)?;

        match path.last() {
            Some(Segment::Key(key)) => {
                let slot = self.store.get(&parent).is_some_and(|owner| is_kind(owner, "repeater"))
                    && REPEATER_SLOTS.contains(&key.as_str());
                let singleton = parent == report_path() && SINGLETONS.contains(&key.as_str());
                if !slot && !singleton {
                    return Err(StoreError::InvalidPath(path.to_string()).into());
                }
                self.store.remove(path)?;
            }
            Some(Segment::Index(index)) => {
                let index = *index;
                self.store.splice(&parent, index, 1, Vec::new())?;
                for paired in self.paired_arrays(&parent) {
                    if self.store.array_len(&paired)? > index {
                        self.store.splice(&paired, index, 1, Vec::new())?;
                    }
                }
                if let Some(owner) = parent.parent() {
                    self.renumber_group_ends(&owner, index)?;
                }
            }
            None => return Err(StoreError::RootMutation.into()),
        }

        self.sync();
        tracing::debug!(%path, "widget removed");
        Ok(())
    }

    /// Move a list item one place up or down. Links into it follow it.
    pub fn move_widget(&mut self, path: &Path, direction: Direction) -> Result<Path, EditorError> {
        let (Some(list), Some(index)) = (path.parent(), path.last_index()) else {
            return Err(StoreError::InvalidPath(path.to_string()).into());
        };
        let len = self.store.array_len(&list)?;
        let target = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => (index + 1 < len).then_some(index + 1),
        };
        let Some(target) = target.filter(|_| index < len) else {
            return Ok(path.clone());
        };

        let carried: Vec<(Role, Path)> = self
            .links
            .iter()
            .filter(|(_, link)| link.starts_with(path))
            .map(|(role, link)| (role, Path::new(link.segments()[path.len()..].to_vec())))
            .collect();
        let mode = self.pipeline.mode();

        self.reinsert(&list, index, target)?;
        for paired in self.paired_arrays(&list) {
            if self.store.array_len(&paired)? > index.max(target) {
                self.reinsert(&paired, index, target)?;
            }
        }
        self.sync();

        let moved = list.join(target);
        for (role, rest) in carried {
            let relinked = moved.concat(&rest);
            match role {
                Role::Expr => self.open_expr(relinked, mode)?,
                role => self.links.set(role, relinked),
            }
        }
        tracing::debug!(from = %path, to = %moved, "widget moved");
        Ok(moved)
    }

    // --- expressions ---

    /// Open an expression for editing. Paths starting at a store root key
    /// are absolute; others are relative to the linked widget.
    pub fn edit_expr(&mut self, target: &str, mode: ExprMode) -> Result<Path, EditorError> {
        let relative = Path::parse(target)?;
        let path = match relative.first_key() {
            Some(REPORT | SOURCES | PROJECTS) => relative,
            _ => self
                .links
                .get(Role::Widget)
                .ok_or(EditorError::NoLink("widget"))?
                .concat(&relative),
        };
        self.open_expr(path.clone(), mode)?;
        Ok(path)
    }

    /// Replace the buffer text and write it through to the store
    pub fn set_expr_text(&mut self, text: impl Into<String>) -> Result<u64, EditorError> {
        self.set_expr_source(ExprSource::Text(text.into()))
    }

    pub fn set_expr_source(&mut self, source: ExprSource) -> Result<u64, EditorError> {
        let path = self.expr_path()?;
        let value = source.to_value();
        let version = self.pipeline.set_source(source);
        self.store.set(&path, value)?;
        self.sync();
        Ok(version)
    }

    /// Replace the tree; the text is derived from it
    pub fn set_expr_ast(&mut self, ast: Ast) -> Result<String, EditorError> {
        let path = self.expr_path()?;
        let text = self.pipeline.set_ast(ast).to_string();
        self.store.set(&path, Value::String(text.clone()))?;
        self.sync();
        Ok(text)
    }

    /// Reformat the buffer in place; unparseable text is left alone
    pub fn format_expr(&mut self) -> Result<(), EditorError> {
        let Some(formatted) = self.pipeline.format() else {
            return Err(EditorError::NoLink("expr"));
        };
        if Some(&formatted) != self.pipeline.source() {
            self.set_expr_source(formatted)?;
        }
        Ok(())
    }

    // --- report data ---

    /// Append a field/header pair to a delimited report
    pub fn add_field(&mut self) -> Result<usize, EditorError> {
        let fields = report_path().join("fields");
        let headers = report_path().join("headers");
        self.ensure_array(&fields)?;
        self.ensure_array(&headers)?;
        let index = self.store.push(&fields, Value::String(String::new()))?;
        self.store.push(&headers, Value::String(String::new()))?;
        self.sync();
        Ok(index)
    }

    pub fn add_parameter(&mut self, name: &str, ty: &str) -> Result<usize, EditorError> {
        let parameters = report_path().join("parameters");
        self.ensure_array(&parameters)?;
        let index = self.store.push(&parameters, json!({ "name": name, "type": ty }))?;
        self.sync();
        Ok(index)
    }

    /// Declare a report source backed by the available source `backing`
    pub fn declare_source(&mut self, name: &str, backing: &str) -> Result<usize, EditorError> {
        let declared = report_path().join("sources");
        self.ensure_array(&declared)?;
        let index = self.store.push(&declared, json!({ "name": name, "source": backing }))?;
        self.sync();
        Ok(index)
    }

    pub fn add_available_source(&mut self, source: Value) -> Result<usize, EditorError> {
        let index = self.store.push(&Path::root().join(SOURCES), source)?;
        self.sync();
        Ok(index)
    }

    pub fn edit_param(&mut self, index: usize) -> Result<Path, EditorError> {
        self.link_existing(Role::Param, report_path().join("parameters").join(index))
    }

    pub fn edit_source(&mut self, index: usize) -> Result<Path, EditorError> {
        self.link_existing(Role::Source, report_path().join("sources").join(index))
    }

    /// Link the destination for [`Session::import_data`]; a missing leaf is created
    pub fn set_import_target(&mut self, path: &Path) -> Result<(), EditorError> {
        if !self.store.resolves(path) {
            self.store.set(path, Value::Null)?;
            self.sync();
        }
        self.links.set(Role::Data, path.clone());
        Ok(())
    }

    pub fn import_data(&mut self, text: &str) -> Result<(), EditorError> {
        let target = self.links.get(Role::Data).cloned().ok_or(EditorError::NoLink("data"))?;
        let value = loader::import_data(text)?;
        self.store.set(&target, value)?;
        self.sync();
        tracing::info!(%target, "data imported");
        Ok(())
    }

    /// Replace the report with one read from text
    pub fn load_report(&mut self, text: &str) -> Result<(), EditorError> {
        let report = loader::load_report(text)?;
        self.schema.cancel();
        self.replace_document(report)?;
        if let Some(path) = self.links.get(Role::Expr).cloned() {
            self.schema.request(path);
        }
        let snapshot = self.snapshot();
        self.history.reset(snapshot);
        Ok(())
    }

    // --- output ---

    pub fn export(&self, compact: Option<CompactOptions>) -> String {
        match compact {
            Some(options) => serializer::compact(self.store.report(), options),
            None => serializer::full(self.store.report()),
        }
    }

    /// File for the current report; its `name` is a template for the file name
    pub fn download(&self, compact: Option<CompactOptions>) -> Download {
        let source = compact.is_some_and(|options| options.source);
        let (extension, mime) = if source { ("js", SOURCE_MIME) } else { ("json", JSON_MIME) };
        let name = self
            .store
            .report()
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("report");
        let root = self.root.clone().unwrap_or_else(|| Arc::new(Root::new(json!({}))));
        loader::download(
            &Context::root(root),
            &format!("{}.{}", name, extension),
            self.export(compact),
            mime,
        )
    }

    /// Format every expression in the report
    pub fn reformat_expressions(&mut self) -> Result<(), EditorError> {
        let mut report = self.store.report().clone();
        serializer::reformat_expressions(&mut report, self.config.format_options());
        if &report != self.store.report() {
            self.store.set(&report_path(), report)?;
            self.sync();
        }
        Ok(())
    }

    /// Resolve sources and evaluate the open expression. Failures are logged
    /// and the previous value is kept.
    pub async fn run(&mut self) -> Option<&Value> {
        self.sync();
        self.pipeline.flush();

        let report = self.store.report().clone();
        let available = self.store.items(&Path::root().join(SOURCES)).to_vec();
        let (root, updates) = self
            .resolver
            .build_root(&report, &available, &self.overrides, self.specials())
            .await;
        self.apply_cache(updates);

        let root = Arc::new(root);
        self.root = Some(root.clone());
        match self.evaluate_preview(root, &report) {
            Ok(value) => self.preview = Some(value),
            Err(error) => tracing::warn!(%error, "preview failed, keeping last value"),
        }
        self.preview.as_ref()
    }

    fn evaluate_preview(&self, root: Arc<Root>, report: &Value) -> Result<Value, EditorError> {
        let Some(path) = self.links.get(Role::Expr) else {
            return Ok(json!({ "sources": root.sources, "params": root.params }));
        };
        let ctx = context_at(root.clone(), report, path);
        match self.pipeline.state() {
            ExprState::Valid(Parsed::Single(ast)) => Ok(evaluate(&ctx, ast)?),
            ExprState::Valid(Parsed::Fragments(fragments)) => fragments
                .iter()
                .map(|fragment| match fragment {
                    Fragment::Parsed(ast) => Ok(evaluate(&ctx, ast)?),
                    Fragment::Raw(value) => Ok(value.clone()),
                })
                .collect::<Result<Vec<_>, EditorError>>()
                .map(Value::Array),
            ExprState::Invalid(error) => Err(error.clone().into()),
            ExprState::Idle | ExprState::Parsing { .. } => Ok(Value::Null),
        }
    }

    // --- timers ---

    /// Fire every timer that is due. Returns true when anything ran.
    ///
    /// Schema rebuilds are spawned on the tokio runtime current when the
    /// session was built, or the one passed to [`Session::with_runtime`].
    /// With neither available the rebuild is skipped and logged.
    pub fn poll(&mut self) -> bool {
        let now = Instant::now();
        self.sync();
        let mut fired = self.pipeline.poll(now);

        if let Some(path) = self.schema.due(now) {
            let job = self.schema_job(path);
            self.schema.fire(job);
            fired = true;
        }
        if let Some(updates) = self.schema.collect() {
            self.apply_cache(updates);
            fired = true;
        }
        if self.history.take_due(now) {
            let snapshot = self.snapshot();
            self.history.push(snapshot);
            fired = true;
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.pipeline.next_deadline(),
            self.schema.next_deadline(),
            self.history.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Wait out every pending timer and schema task
    pub async fn settle(&mut self) {
        loop {
            self.poll();
            if let Some(deadline) = self.next_deadline() {
                tokio::time::sleep_until(deadline).await;
                continue;
            }
            if self.schema.is_running() {
                if let Some(updates) = self.schema.settle().await {
                    self.apply_cache(updates);
                }
                continue;
            }
            break;
        }
    }

    // --- history ---

    pub fn undo(&mut self) -> bool {
        self.sync();
        let live = self.snapshot();
        match self.history.undo(&live) {
            Some(target) => self.restore_snapshot(&target),
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.sync();
        let live = self.snapshot();
        match self.history.redo(&live) {
            Some(target) => self.restore_snapshot(&target),
            None => false,
        }
    }

    /// Keyboard undo/redo; ignored while a form control has focus
    pub fn handle_shortcut(&mut self, shortcut: Shortcut, focus_tag: Option<&str>) -> bool {
        if focus_tag.is_some_and(is_form_control) {
            return false;
        }
        match shortcut {
            Shortcut::Undo => self.undo(),
            Shortcut::Redo => self.redo(),
        }
    }

    // --- projects ---

    fn active_project(&self) -> Option<usize> {
        self.links.get(Role::Project).and_then(Path::last_index)
    }

    /// Make project `index` the live document
    pub async fn link_project(&mut self, index: usize) -> Result<(), EditorError> {
        let path = projects::project_path(index);
        if !self.store.resolves(&path) {
            return Err(StoreError::Missing(path).into());
        }
        self.schema.cancel();
        match self.active_project() {
            Some(previous) => projects::write_back(&mut self.store, previous)?,
            None => self.projects.cache_session(&self.store).await?,
        }

        self.history.suspend();
        projects::load_into(&mut self.store, index)?;
        self.sync();
        self.links.clear_all();
        self.close_expr();
        self.links.set(Role::Project, path);
        self.history.resume();
        let snapshot = self.snapshot();
        self.history.reset(snapshot);

        self.projects.persist(&self.store).await?;
        tracing::info!(index, "project linked");
        Ok(())
    }

    pub async fn create_project(&mut self, name: &str) -> Result<usize, EditorError> {
        let name = projects::unique_name(&self.store, name);
        let index = projects::append(&mut self.store, crate::model::Project::new(name))?;
        self.sync();
        self.link_project(index).await?;
        Ok(index)
    }

    pub async fn clone_project(&mut self, index: usize) -> Result<usize, EditorError> {
        if self.active_project() == Some(index) {
            projects::write_back(&mut self.store, index)?;
        }
        let path = projects::project_path(index);
        let mut copy = self.store.get(&path).cloned().ok_or(StoreError::Missing(path))?;
        let base = copy.get("name").and_then(Value::as_str).unwrap_or("project").to_string();
        if let Value::Object(map) = &mut copy {
            map.insert("name".to_string(), Value::String(projects::unique_name(&self.store, &base)));
        }

        let clone = self.store.push(&Path::root().join(PROJECTS), copy)?;
        self.sync();
        self.link_project(clone).await?;
        Ok(clone)
    }

    /// Delete project `index`; without confirmation nothing happens
    pub async fn delete_project(&mut self, index: usize, confirm: bool) -> Result<bool, EditorError> {
        if !confirm {
            tracing::debug!(index, "project delete not confirmed");
            return Ok(false);
        }
        let path = projects::project_path(index);
        if !self.store.resolves(&path) {
            return Err(StoreError::Missing(path).into());
        }

        self.store.remove(&path)?;
        self.sync();
        self.clear_editing_links();
        self.projects.persist(&self.store).await?;
        tracing::info!(index, "project deleted");
        Ok(true)
    }

    pub async fn import_projects(&mut self, text: &str) -> Result<ImportOutcome, EditorError> {
        let payload = loader::import_data(text)?;
        let outcome = projects::import(&mut self.store, &payload)?;
        self.sync();

        match outcome {
            ImportOutcome::Replaced(_) => {
                self.links.clear(Role::Project);
                self.clear_editing_links();
            }
            ImportOutcome::Updated(index) if self.active_project() == Some(index) => {
                self.history.suspend();
                projects::load_into(&mut self.store, index)?;
                self.sync();
                self.clear_editing_links();
                self.history.resume();
                let snapshot = self.snapshot();
                self.history.reset(snapshot);
            }
            ImportOutcome::Updated(_) | ImportOutcome::Ignored => {}
        }

        if outcome != ImportOutcome::Ignored {
            self.projects.persist(&self.store).await?;
        }
        tracing::info!(?outcome, "projects imported");
        Ok(outcome)
    }

    /// Persist the live document to its project, or as the unlinked session
    pub async fn save(&mut self) -> Result<(), EditorError> {
        match self.active_project() {
            Some(index) => {
                projects::write_back(&mut self.store, index)?;
                self.sync();
                self.projects.persist(&self.store).await?;
            }
            None => self.projects.cache_session(&self.store).await?,
        }
        Ok(())
    }

    pub async fn save_diff_inputs(&self, original: &str, modified: &str) -> Result<(), EditorError> {
        let inputs = json!({ "original": original, "modified": modified });
        self.projects.kv().save(DIFF_KEY, inputs).await?;
        Ok(())
    }

    pub async fn diff_inputs(&self) -> Result<Option<(String, String)>, EditorError> {
        let inputs = self.projects.kv().load(DIFF_KEY).await?;
        Ok(inputs.map(|inputs| {
            let text = |key: &str| inputs.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            (text("original"), text("modified"))
        }))
    }

    // --- internals ---

    /// Drain the change bus into links, history and the expression buffer
    fn sync(&mut self) {
        let report = report_path();
        let mut report_changed = false;

        let mut cleared = Vec::new();
        for change in self.changes.drain() {
            report_changed |= change.affects(&report);
            cleared.extend(self.links.follow(&change));
        }
        cleared.extend(self.links.sweep(&self.store));
        if cleared.contains(&Role::Expr) {
            self.close_expr();
        }
        if report_changed {
            self.history.schedule();
        }
        self.refresh_expr();
    }

    /// Re-seed the buffer when its target changed underneath it
    fn refresh_expr(&mut self) {
        let Some(watch) = self.watch.as_mut() else {
            return;
        };
        if watch.drain().is_empty() {
            return;
        }
        let Some(path) = self.links.get(Role::Expr).cloned() else {
            self.close_expr();
            return;
        };
        // follow a relocated target
        let parent = path.parent().unwrap_or_else(Path::root);
        if watch.prefix() != &parent {
            self.watch = Some(self.store.subscribe(parent));
        }
        match self.store.get(&path) {
            Some(value) => {
                let current = seed_source(value, self.config.format_options());
                if Some(&current) != self.pipeline.source() {
                    tracing::debug!(%path, "expression target changed, buffer re-seeded");
                    self.pipeline.set_source(current);
                }
            }
            None => {
                tracing::debug!(%path, "expression target gone");
                self.links.clear(Role::Expr);
                self.close_expr();
            }
        }
    }

    fn open_expr(&mut self, path: Path, mut mode: ExprMode) -> Result<(), EditorError> {
        let value = self.store.get(&path).ok_or_else(|| StoreError::Missing(path.clone()))?;
        let source = seed_source(value, self.config.format_options());
        if path.last_key() == Some("html") {
            mode.markup = true;
        }

        let parent = path.parent().unwrap_or_else(Path::root);
        self.watch = Some(self.store.subscribe(parent));
        self.links.set(Role::Expr, path.clone());
        self.pipeline.open(source, mode);
        self.schema.request(path.clone());
        tracing::debug!(%path, "expression opened");
        Ok(())
    }

    fn close_expr(&mut self) {
        self.schema.cancel();
        self.watch = None;
        if self.pipeline.is_open() {
            self.pipeline.close();
        }
    }

    fn clear_editing_links(&mut self) {
        let project = self.links.get(Role::Project).cloned();
        self.links.clear_all();
        self.close_expr();
        if let Some(project) = project.filter(|p| self.store.resolves(p)) {
            self.links.set(Role::Project, project);
        }
    }

    fn expr_path(&self) -> Result<Path, EditorError> {
        self.links.get(Role::Expr).cloned().ok_or(EditorError::NoLink("expr"))
    }

    fn link_existing(&mut self, role: Role, path: Path) -> Result<Path, EditorError> {
        if !self.store.resolves(&path) {
            return Err(StoreError::Missing(path).into());
        }
        self.links.set(role, path.clone());
        Ok(path)
    }

    fn restore_snapshot(&mut self, snapshot: &str) -> bool {
        let report: Value = match serde_json::from_str(snapshot) {
            Ok(report) => report,
            Err(error) => {
                tracing::error!(%error, "history snapshot unreadable");
                return false;
            }
        };
        self.history.suspend();
        let replaced = self.replace_document(report);
        self.history.resume();
        replaced.is_ok()
    }

    fn replace_document(&mut self, report: Value) -> Result<(), EditorError> {
        self.store.set(&report_path(), report)?;
        self.sync();
        Ok(())
    }

    fn default_parent(&self) -> Path {
        match self.links.get(Role::Widget) {
            Some(path) if self.widget_list(path).is_ok() => path.clone(),
            _ => report_path(),
        }
    }

    /// Array holding the children of `owner`
    fn widget_list(&self, owner: &Path) -> Result<Path, StoreError> {
        let node = self.store.get(owner).ok_or_else(|| StoreError::Missing(owner.clone()))?;
        if node.get("widgets").is_some_and(Value::is_array) {
            return Ok(owner.join("widgets"));
        }
        if is_kind(node, "repeater") && node.pointer("/row/widgets").is_some_and(Value::is_array) {
            return Ok(owner.join("row").join("widgets"));
        }
        Err(StoreError::NotContainer(owner.clone()))
    }

    fn array_at(&self, path: &Path) -> Option<Path> {
        self.store.get(path).filter(|v| v.is_array()).map(|_| path.clone())
    }

    /// Sibling arrays kept index-aligned with `list`
    fn paired_arrays(&self, list: &Path) -> Vec<Path> {
        let Some(owner) = list.parent() else {
            return Vec::new();
        };
        let partner = match list.last_key() {
            Some("widgets") => "layout",
            Some("fields") => "headers",
            Some("headers") => "fields",
            _ => return Vec::new(),
        };
        self.array_at(&owner.join(partner)).into_iter().collect()
    }

    /// Drop the group end at `removed` and shift the later ones down
    fn renumber_group_ends(&mut self, owner: &Path, removed: usize) -> Result<(), StoreError> {
        let path = owner.join("groupEnds");
        let Some(Value::Array(ends)) = self.store.get(&path) else {
            return Ok(());
        };
        let renumbered: Vec<Value> = ends
            .iter()
            .filter_map(|end| match end.as_u64() {
                Some(end) if end as usize == removed => None,
                Some(end) if end as usize > removed => Some(json!(end - 1)),
                _ => Some(end.clone()),
            })
            .collect();
        if &renumbered != ends {
            self.store.set(&path, Value::Array(renumbered))?;
        }
        Ok(())
    }

    fn reinsert(&mut self, list: &Path, from: usize, to: usize) -> Result<(), StoreError> {
        let mut removed = self.store.splice(list, from, 1, Vec::new())?;
        if let Some(item) = removed.pop() {
            self.store.splice(list, to, 0, vec![item])?;
        }
        Ok(())
    }

    fn ensure_array(&mut self, path: &Path) -> Result<(), StoreError> {
        if !self.store.get(path).is_some_and(Value::is_array) {
            self.store.set(path, json!([]))?;
        }
        Ok(())
    }

    fn apply_cache(&mut self, updates: Vec<CacheUpdate>) {
        for update in updates {
            let entry = Path::root().join(SOURCES).join(update.index);
            let current = self.store.get(&entry.join("name")).and_then(Value::as_str);
            if current != Some(update.name.as_str()) {
                tracing::warn!(index = update.index, name = %update.name, "source moved, cache dropped");
                continue;
            }
            let path = entry.join("data");
            if let Err(error) = self.store.set(&path, update.data) {
                tracing::warn!(%error, index = update.index, "source cache not written");
            }
        }
        self.sync();
    }

    fn schema_job(&self, path: Path) -> SchemaJob {
        SchemaJob {
            path,
            report: self.store.report().clone(),
            available: self.store.items(&Path::root().join(SOURCES)).to_vec(),
            overrides: self.overrides.clone(),
            special: self.specials(),
            resolver: self.resolver.clone(),
        }
    }

    fn specials(&self) -> Map<String, Value> {
        self.special.clone().unwrap_or_else(clock_specials)
    }

    fn snapshot(&self) -> String {
        snapshot_of(&self.store)
    }
}

fn report_path() -> Path {
    Path::root().join(REPORT)
}

fn snapshot_of(store: &DocumentStore) -> String {
    serde_json::to_string(store.report()).unwrap_or_default()
}

fn is_kind(node: &Value, kind: &str) -> bool {
    node.get("type").and_then(Value::as_str) == Some(kind)
}

/// Buffer contents for a target value; non-text values are rendered as literals
fn seed_source(value: &Value, options: StringifyOptions) -> ExprSource {
    ExprSource::from_value(value).unwrap_or_else(|| ExprSource::Text(stringify(&Ast::from_value(value), options)))
}
