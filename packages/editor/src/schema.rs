//! # Schema Builder
//!
//! Computes the names an expression at a given store path can reference,
//! for autocomplete.
//!
//! ```text
//! path ──► innermost context ──► own fields
//!                  │
//!                  └─► parents: ^field, ^^field, ... root: ~field
//!
//! plus *source per declared source, @special, !param per parameter
//! ```
//!
//! Requests are debounced. Each fired request bumps a generation and runs as
//! its own task; the previous task is aborted and any result carrying an
//! older generation is dropped. Tasks go to the runtime the builder was
//! created in, or the one given to [`SchemaBuilder::set_runtime`].

use crate::debounce::Debounce;
use crate::model::SourceDecl;
use crate::path::{Path, Segment};
use crate::sources::{CacheUpdate, SourceResolver};
use folio_expr::{evaluate_str, first_row, inspect, type_of, Context, Root};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaEntry {
    /// Reference text including its prefix, e.g. `^title` or `*orders`
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl SchemaEntry {
    fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    pub path: Path,
    pub entries: Vec<SchemaEntry>,
}

impl Schema {
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Snapshot of everything a schema computation reads
#[derive(Debug, Clone)]
pub struct SchemaJob {
    pub path: Path,
    pub report: Value,
    pub available: Vec<Value>,
    pub overrides: Map<String, Value>,
    pub special: Map<String, Value>,
    pub resolver: SourceResolver,
}

impl SchemaJob {
    pub async fn run(self) -> (Schema, Vec<CacheUpdate>) {
        let (root, updates) = self
            .resolver
            .build_root(&self.report, &self.available, &self.overrides, self.special)
            .await;
        (schema_at(Arc::new(root), &self.report, &self.path), updates)
    }
}

/// Reference namespace visible at `path`
pub fn schema_at(root: Arc<Root>, report: &Value, path: &Path) -> Schema {
    let ctx = context_at(root.clone(), report, path);
    let mut entries: Vec<SchemaEntry> = inspect(ctx.value())
        .into_iter()
        .map(|field| SchemaEntry::new(field.name, field.ty))
        .collect();

    let mut hops = 0;
    let mut current = &ctx;
    while let Some(parent) = current.parent() {
        hops += 1;
        let prefix = if parent.is_root() {
            "~".to_string()
        } else {
            "^".repeat(hops)
        };
        entries.extend(
            inspect(parent.value())
                .into_iter()
                .map(|field| SchemaEntry::new(format!("{}{}", prefix, field.name), field.ty)),
        );
        current = parent;
    }

    for decl in SourceDecl::list(report) {
        let ty = root.sources.get(&decl.name).map(type_of).unwrap_or("null");
        entries.push(SchemaEntry::new(format!("*{}", decl.name), ty));
    }
    for (name, value) in &root.special {
        entries.push(SchemaEntry::new(format!("@{}", name), type_of(value)));
    }
    for parameter in report.get("parameters").and_then(Value::as_array).into_iter().flatten() {
        if let Some(name) = parameter.get("name").and_then(Value::as_str) {
            let ty = root.params.get(name).map(type_of).unwrap_or("null");
            entries.push(SchemaEntry::new(format!("!{}", name), ty));
        }
    }

    Schema {
        path: path.clone(),
        entries,
    }
}

/// Innermost evaluation context for an edit path under `report`
pub fn context_at(root: Arc<Root>, report: &Value, path: &Path) -> Context {
    let base = Context::root(root.clone());
    let segments = path.segments();
    if path.first_key() != Some(crate::store::REPORT) {
        return base;
    }
    let rest = &segments[1..];
    let source_value = |decl: Option<&SourceDecl>| {
        decl.and_then(|d| root.sources.get(&d.name))
            .cloned()
            .unwrap_or(Value::Null)
    };

    match rest.first().and_then(Segment::as_key) {
        Some("fields") => {
            let decls = SourceDecl::list(report);
            return base.child(first_row(&source_value(decls.first())));
        }
        Some("sources") => {
            let Some(index) = rest.get(1).and_then(Segment::as_index) else {
                return base;
            };
            let decl = report
                .get("sources")
                .and_then(|sources| sources.get(index))
                .and_then(|entry| serde_json::from_value::<SourceDecl>(entry.clone()).ok());
            let value = source_value(decl.as_ref());
            return match path.last_key() {
                Some("filter") | Some("sort") => base.child(first_row(&value)),
                _ => base.child(value),
            };
        }
        _ => {}
    }

    let mut ctx = base;
    let mut node = report;
    for (i, segment) in rest.iter().enumerate() {
        let next = match (segment, node) {
            (Segment::Key(k), Value::Object(map)) => map.get(k),
            (Segment::Index(n), Value::Array(items)) => items.get(*n),
            _ => None,
        };
        let Some(next) = next else {
            break;
        };

        if is_widget(node, "repeater") && matches!(segment.as_key(), Some("row") | Some("group")) {
            let rows = eval_field(&ctx, node, "source");
            ctx = ctx.child(first_row(&rows));
        }

        node = next;
        let descending = rest
            .get(i + 1)
            .is_some_and(|seg| seg.as_key() != Some("context"));
        if descending && node.get("type").is_some() {
            if let Some(Value::String(expr)) = node.get("context") {
                if !expr.trim().is_empty() {
                    ctx = ctx.child(eval_field(&ctx, node, "context"));
                }
            }
        }
    }

    ctx
}

fn is_widget(node: &Value, kind: &str) -> bool {
    node.get("type").and_then(Value::as_str) == Some(kind)
}

fn eval_field(ctx: &Context, node: &Value, field: &str) -> Value {
    match node.get(field).and_then(Value::as_str) {
        Some(expr) if !expr.trim().is_empty() => evaluate_str(ctx, expr).unwrap_or_else(|error| {
            tracing::debug!(field, %error, "schema context expression failed");
            Value::Null
        }),
        _ => Value::Null,
    }
}

type SchemaResult = (u64, Schema, Vec<CacheUpdate>);

/// Debounced, last-request-wins schema computation
#[derive(Debug)]
pub struct SchemaBuilder {
    debounce: Debounce<Path>,
    generation: u64,
    task: Option<JoinHandle<()>>,
    runtime: Option<Handle>,
    tx: UnboundedSender<SchemaResult>,
    rx: UnboundedReceiver<SchemaResult>,
    latest: Option<Schema>,
}

impl SchemaBuilder {
    pub fn new(delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            debounce: Debounce::new(delay),
            generation: 0,
            task: None,
            runtime: Handle::try_current().ok(),
            tx,
            rx,
            latest: None,
        }
    }

    pub fn set_runtime(&mut self, runtime: Handle) {
        self.runtime = Some(runtime);
    }

    /// Ask for the schema at `path` once the delay passes
    pub fn request(&mut self, path: Path) {
        self.debounce.schedule(path);
    }

    pub fn cancel(&mut self) {
        self.debounce.cancel();
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    /// Path whose debounce elapsed, to be handed to [`SchemaBuilder::fire`]
    pub fn due(&mut self, now: Instant) -> Option<Path> {
        self.debounce.take_due(now)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start a computation, superseding any in-flight one
    pub fn fire(&mut self, job: SchemaJob) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        if let Some(previous) = self.task.take() {
            previous.abort();
        }

        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            tracing::warn!(generation, path = %job.path, "no tokio runtime, schema rebuild skipped");
            return generation;
        };

        tracing::debug!(generation, path = %job.path, "schema rebuild started");
        let tx = self.tx.clone();
        self.task = Some(runtime.spawn(async move {
            let (schema, updates) = job.run().await;
            let _ = tx.send((generation, schema, updates));
        }));
        generation
    }

    /// Take finished results. Returns cache updates of a newly published schema.
    pub fn collect(&mut self) -> Option<Vec<CacheUpdate>> {
        let mut published = None;
        while let Ok((generation, schema, updates)) = self.rx.try_recv() {
            if generation != self.generation {
                tracing::debug!(generation, current = self.generation, "stale schema dropped");
                continue;
            }
            tracing::debug!(generation, entries = schema.entries.len(), "schema published");
            self.latest = Some(schema);
            published = Some(updates);
        }
        published
    }

    /// Wait for the in-flight computation, then collect
    pub async fn settle(&mut self) -> Option<Vec<CacheUpdate>> {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.collect()
    }

    pub fn latest(&self) -> Option<&Schema> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;

    fn root_for(report: &Value, sources: Value) -> Arc<Root> {
        let mut root = Root::new(report.get("context").cloned().unwrap_or(json!({})));
        root.sources = sources.as_object().cloned().unwrap_or_default();
        root.params = folio_expr::init_parameters(report, &Map::new());
        let mut special = Map::new();
        special.insert("now".into(), json!("2024-01-01T00:00:00Z"));
        root.special = special;
        Arc::new(root)
    }

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    #[test]
    fn test_repeater_row_rebinds_to_first_row() {
        let report = json!({
            "type": "page",
            "context": { "title": "T" },
            "sources": [{ "name": "orders", "source": "o" }],
            "parameters": [{ "name": "year", "type": "number" }],
            "widgets": [{
                "type": "repeater",
                "source": "*orders",
                "row": { "type": "container", "widgets": [{ "type": "label", "text": "id" }] }
            }]
        });
        let root = root_for(&report, json!({ "orders": [{ "id": 1, "total": 2.5 }] }));
        let schema = schema_at(root, &report, &p("report.widgets[0].row.widgets[0].text"));

        assert_eq!(
            schema.names(),
            vec!["id", "total", "~title", "*orders", "@now", "!year"]
        );
        assert_eq!(schema.get("total").unwrap().ty, "number");
        assert_eq!(schema.get("*orders").unwrap().ty, "array");
    }

    #[test]
    fn test_nested_contexts_stack_parent_hops() {
        let report = json!({
            "type": "page",
            "context": { "title": "T" },
            "widgets": [{
                "type": "container",
                "context": "{ a: 1 }",
                "widgets": [{
                    "type": "container",
                    "context": "{ b: 'x' }",
                    "widgets": [{ "type": "label", "text": "b" }]
                }]
            }]
        });
        let root = root_for(&report, json!({}));
        let schema = schema_at(root, &report, &p("report.widgets[0].widgets[0].widgets[0].text"));
        assert_eq!(schema.names(), vec!["b", "^a", "~title", "@now"]);

        // editing a context expression sees the enclosing context
        let schema = schema_at(
            root_for(&report, json!({})),
            &report,
            &p("report.widgets[0].widgets[0].context"),
        );
        assert_eq!(schema.names(), vec!["a", "~title", "@now"]);
    }

    #[test]
    fn test_fields_and_source_paths() {
        let report = json!({
            "type": "delimited",
            "sources": [{ "name": "rows", "source": "r", "filter": "x > 1" }],
            "fields": ["x"]
        });
        let root = root_for(&report, json!({ "rows": [{ "x": 1 }, { "x": 2 }] }));

        let fields = schema_at(root.clone(), &report, &p("report.fields[0]"));
        assert_eq!(fields.names(), vec!["x", "*rows", "@now"]);

        let filter = schema_at(root.clone(), &report, &p("report.sources[0].filter"));
        assert_eq!(filter.names()[0], "x");

        let aggregate = schema_at(root, &report, &p("report.sources[0].name"));
        assert_eq!(aggregate.names(), vec!["x", "*rows", "@now"]);
    }

    #[test]
    fn test_source_index_counts_malformed_entries() {
        let report = json!({
            "type": "page",
            "sources": [
                { "source": "nameless" },
                { "name": "B", "source": "b", "filter": "y > 0" }
            ]
        });
        let root = root_for(&report, json!({ "B": [{ "y": 1 }] }));
        let filter = schema_at(root.clone(), &report, &p("report.sources[1].filter"));
        assert_eq!(filter.names()[0], "y");
        let context = context_at(root.clone(), &report, &p("report.sources[0].filter"));
        assert_eq!(context.value(), &Value::Null);
    }

    #[test]
    fn test_fire_without_runtime_is_skipped() {
        let mut builder = SchemaBuilder::new(Duration::from_secs(1));
        let generation = builder.fire(job("report.widgets", 0));
        assert_eq!(generation, 1);
        assert!(!builder.is_running());
        assert_eq!(builder.collect(), None);
    }

    #[test]
    fn test_fire_spawns_on_given_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut builder = SchemaBuilder::new(Duration::from_secs(1));
        builder.set_runtime(runtime.handle().clone());
        builder.fire(job("report.widgets", 0));
        runtime.block_on(builder.settle());
        assert_eq!(builder.latest().unwrap().path, p("report.widgets"));
    }

    fn job(path: &str, delay_ms: u64) -> SchemaJob {
        let mut resolver = SourceResolver::default();
        resolver.register_producer("slow", move |_| {
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(json!([{ "v": delay_ms }]))
            }
            .boxed()
        });
        SchemaJob {
            path: p(path),
            report: json!({ "type": "page", "sources": [{ "name": "S", "source": "slow" }], "widgets": [] }),
            available: vec![json!({ "name": "slow", "type": "computed" })],
            overrides: Map::new(),
            special: Map::new(),
            resolver,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_requests() {
        let mut builder = SchemaBuilder::new(Duration::from_secs(1));
        builder.request(p("report.widgets"));
        tokio::time::advance(Duration::from_millis(600)).await;
        builder.request(p("report.sources"));
        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(builder.due(Instant::now()), None);
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(builder.due(Instant::now()), Some(p("report.sources")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_result_never_published() {
        let mut builder = SchemaBuilder::new(Duration::from_secs(1));
        builder.fire(job("report.first", 500));
        builder.fire(job("report.second", 10));

        builder.settle().await;
        assert_eq!(builder.latest().unwrap().path, p("report.second"));

        // let the aborted task's timer pass; nothing else arrives
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(builder.collect(), None);
        assert_eq!(builder.latest().unwrap().path, p("report.second"));
    }
}
