//! Integration tests for the editing session

use folio_editor::serializer::{compact, expand};
use folio_editor::{
    CompactOptions, Direction, EditorConfig, EditorError, ExprMode, FetchError, FileStore, HttpClient, HttpRequest,
    ImportOutcome, MemoryStore, Path, Role, Session, SourceResolver,
};
use folio_expr::{Ast, RefPrefix};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn session() -> Session {
    Session::with_kv(EditorConfig::default(), Arc::new(MemoryStore::new()))
}

fn p(text: &str) -> Path {
    Path::parse(text).unwrap()
}

/// Answers every request with `body` and records the URLs it saw
struct MockHttp {
    body: String,
    calls: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockHttp {
    fn new(body: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            body: body.to_string(),
            calls: AtomicUsize::new(0),
            log,
        }
    }
}

impl HttpClient for MockHttp {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<String, FetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("{} {}", request.method, request.url));
        let body = self.body.clone();
        async move { Ok(body) }.boxed()
    }
}

/// Answers every request with `body` after `delay`
struct SlowHttp {
    body: String,
    delay: Duration,
}

impl HttpClient for SlowHttp {
    fn send(&self, _request: HttpRequest) -> BoxFuture<'_, Result<String, FetchError>> {
        let body = self.body.clone();
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            Ok(body)
        }
        .boxed()
    }
}

/// Session with a label open for editing and a schema rebuild waiting on a 3s fetch
async fn session_with_slow_schema() -> Session {
    let http = Arc::new(SlowHttp {
        body: r#"{ "from": "old project" }"#.to_string(),
        delay: Duration::from_secs(3),
    });
    let mut session = session().with_http(http);
    session
        .add_available_source(json!({ "name": "feed", "type": "fetch", "method": "GET", "url": "https://slow" }))
        .unwrap();
    session.declare_source("S", "feed").unwrap();
    let label = session.add_widget("label", None).unwrap();
    session.select_widget(&label).unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    session.poll();
    session
}

async fn run_until(duration: Duration) {
    tokio::time::advance(duration).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_label_expression() {
    let mut session = session();

    let path = session.add_widget("label", None).unwrap();
    assert_eq!(session.report()["widgets"], json!([{ "type": "label", "text": ":label" }]));

    session.select_widget(&path).unwrap();
    session.edit_expr(&format!("{}.text", path), ExprMode::default()).unwrap();
    assert_eq!(session.pipeline().text(), Some(":label"));

    session.set_expr_text(":name").unwrap();
    tokio::time::advance(Duration::from_millis(150)).await;
    session.poll();

    assert_eq!(session.pipeline().ast(), Some(&Ast::reference(RefPrefix::Label, &["name"])));
    assert!(session.pipeline().error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_single_fetch() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let http = Arc::new(MockHttp::new(r#"[{ "id": 1 }, { "id": 2 }]"#, log.clone()));
    let mut session = session().with_http(http.clone());

    session
        .add_available_source(json!({
            "name": "feed",
            "type": "fetch",
            "method": "GET",
            "url": "https://x",
            "fetch": true
        }))
        .unwrap();
    session.declare_source("S", "feed").unwrap();

    let preview = session.run().await.cloned().unwrap();
    assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    assert_eq!(*log.lock().unwrap(), vec!["GET https://x"]);
    assert_eq!(preview["sources"]["S"], json!([{ "id": 1 }, { "id": 2 }]));
    // always-fetch sources are not cached
    assert_eq!(session.store().get(&p("sources[0].data")), None);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_root_context() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let http = Arc::new(MockHttp::new(r#"{ "total": 3 }"#, log));
    let resolver = SourceResolver::default().with_http(http.clone());

    let report = json!({ "type": "page", "sources": [{ "name": "S", "source": "feed" }] });
    let available = vec![json!({ "name": "feed", "type": "fetch", "method": "GET", "url": "https://x", "fetch": true })];
    let (root, updates) = resolver.build_root(&report, &available, &Map::new(), Map::new()).await;

    assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    assert_eq!(root.sources.get("S"), Some(&json!({ "total": 3 })));
    assert!(updates.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_history_cap() {
    let mut session = session();
    let label = session.add_widget("label", None).unwrap();
    session.select_widget(&label).unwrap();
    session.settle().await;
    let start = session.history().undo_len();

    for i in 1..=41 {
        session.set_expr_text(format!("'v{}'", i)).unwrap();
        session.settle().await;
    }
    assert!(start >= 1);
    assert_eq!(session.history().undo_len(), 40);

    for _ in 0..41 {
        session.undo();
    }
    assert_eq!(session.report()["widgets"][0]["text"], json!("'v2'"));
}

#[tokio::test(start_paused = true)]
async fn test_undo_redo_properties() {
    let mut session = session();
    let initial = session.report().clone();

    for kind in ["label", "image", "html"] {
        session.add_widget(kind, None).unwrap();
        session.settle().await;
    }
    let edited = session.report().clone();

    for _ in 0..3 {
        assert!(session.undo());
    }
    assert_eq!(session.report(), &initial);
    assert!(!session.undo());
    assert_eq!(session.report(), &initial);

    for _ in 0..3 {
        assert!(session.redo());
    }
    assert_eq!(session.report(), &edited);
    assert!(!session.redo());

    session.undo();
    session.add_widget("container", None).unwrap();
    session.settle().await;
    assert_eq!(session.history().redo_len(), 0);
    assert!(!session.redo());
}

#[tokio::test(start_paused = true)]
async fn test_sources_resolve_in_declaration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let http = Arc::new(MockHttp::new("[1, 2, 3]", log.clone()));
    let mut session = session().with_http(http);

    let producer_log = log.clone();
    session.register_producer("totals", move |params: Map<String, Value>| {
        producer_log.lock().unwrap().push(format!("produce {}", params["limit"]));
        async move { Ok(json!({ "limit": params["limit"] })) }.boxed()
    });

    session
        .add_available_source(json!({ "name": "remote", "type": "fetch", "url": "https://a" }))
        .unwrap();
    session
        .add_available_source(json!({ "name": "totals", "type": "computed" }))
        .unwrap();
    session
        .add_available_source(json!({ "name": "later", "type": "fetch", "url": "https://b" }))
        .unwrap();

    session.add_parameter("limit", "number").unwrap();
    session.declare_source("first", "remote").unwrap();
    session.declare_source("second", "totals").unwrap();
    session.declare_source("third", "later").unwrap();
    session.declare_source("missing", "nowhere").unwrap();
    session.set_param_override("limit", json!(5));

    let preview = session.run().await.cloned().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["GET https://a", "produce 5", "GET https://b"]);
    assert_eq!(preview["sources"]["second"], json!({ "limit": 5 }));
    assert_eq!(preview["sources"].get("missing"), None);

    // cached fetches are not repeated
    assert_eq!(session.store().get(&p("sources[0].data")), Some(&json!([1, 2, 3])));
    session.run().await;
    assert_eq!(log.lock().unwrap().len(), 4);
}

#[test]
fn test_links_clean_after_remove() {
    let mut session = session();
    let first = session.add_widget("label", None).unwrap();
    let container = session.add_widget("container", None).unwrap();
    let inner = session.add_widget("label", Some(&container)).unwrap();
    session.add_parameter("p", "string").unwrap();
    session.edit_param(0).unwrap();

    session.select_widget(&inner).unwrap();
    assert_eq!(session.link(Role::Expr), Some(&p("report.widgets[1].widgets[0].text")));

    // an earlier sibling goes away: links shift down with their widget
    session.remove_widget(&first).unwrap();
    assert_eq!(session.link(Role::Widget), Some(&p("report.widgets[0].widgets[0]")));
    assert_eq!(session.link(Role::Expr), Some(&p("report.widgets[0].widgets[0].text")));
    assert_eq!(session.pipeline().text(), Some(":label"));

    // the enclosing container goes away: links inside it are cleared
    session.remove_widget(&p("report.widgets[0]")).unwrap();
    assert_eq!(session.link(Role::Widget), None);
    assert_eq!(session.link(Role::Expr), None);
    assert!(!session.pipeline().is_open());
    assert_eq!(session.link(Role::Param), Some(&p("report.parameters[0]")));

    for (_, path) in session.links().iter() {
        assert!(session.store().resolves(path), "{} dangles", path);
    }
}

#[test]
fn test_move_keeps_layout_paired() {
    let mut session = session();
    session
        .load_report(
            r#"{ "type": "page", "widgets": [{
                "type": "container",
                "layout": [[0, 0], [5, 5]],
                "widgets": [{ "type": "label", "text": ":a" }, { "type": "image", "url": "''" }]
            }] }"#,
        )
        .unwrap();

    let moved = session
        .move_widget(&p("report.widgets[0].widgets[1]"), Direction::Up)
        .unwrap();
    assert_eq!(moved, p("report.widgets[0].widgets[0]"));
    assert_eq!(session.store().get(&moved).unwrap()["type"], json!("image"));
    assert_eq!(session.report()["widgets"][0]["layout"], json!([[5, 5], [0, 0]]));

    let added = session.add_widget("html", Some(&p("report.widgets[0]"))).unwrap();
    assert_eq!(added, p("report.widgets[0].widgets[2]"));
    assert_eq!(session.report()["widgets"][0]["layout"][2], json!([0, 0]));
}

#[test]
fn test_move_leaves_sibling_links_alone() {
    let mut session = session();
    let container = session.add_widget("container", None).unwrap();
    session.add_widget("label", None).unwrap();
    let last = session.add_widget("label", None).unwrap();
    session.select_widget(&last).unwrap();
    assert_eq!(session.link(Role::Expr), Some(&p("report.widgets[2].text")));

    let moved = session.move_widget(&container, Direction::Down).unwrap();
    assert_eq!(moved, p("report.widgets[1]"));
    assert_eq!(session.link(Role::Widget), Some(&p("report.widgets[2]")));
    assert_eq!(session.link(Role::Expr), Some(&p("report.widgets[2].text")));
    assert!(session.pipeline().is_open());
    assert_eq!(session.pipeline().text(), Some(":label"));
}

#[tokio::test(start_paused = true)]
async fn test_project_switch_drops_inflight_schema() {
    let mut session = session_with_slow_schema().await;
    run_until(Duration::from_millis(2800)).await;

    session.create_project("other").await.unwrap();
    session
        .add_available_source(json!({ "name": "mine", "type": "static", "data": [1, 2, 3] }))
        .unwrap();

    // the old fetch would complete here
    run_until(Duration::from_millis(500)).await;
    session.poll();
    assert_eq!(session.store().get(&p("sources[0].data")), Some(&json!([1, 2, 3])));
    assert!(session.schema().is_none());

    session.settle().await;
    assert_eq!(session.store().get(&p("sources[0].data")), Some(&json!([1, 2, 3])));
    assert!(session.schema().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_load_report_drops_inflight_schema() {
    let mut session = session_with_slow_schema().await;
    run_until(Duration::from_millis(2800)).await;

    session
        .load_report(r#"{ "type": "page", "context": { "title": "T" }, "widgets": [{ "type": "label", "text": ":x" }] }"#)
        .unwrap();
    assert_eq!(session.link(Role::Expr), Some(&p("report.widgets[0].text")));

    // the old fetch completes before the new rebuild is due
    run_until(Duration::from_millis(500)).await;
    session.poll();
    assert!(session.schema().is_none());
    assert_eq!(session.store().get(&p("sources[0].data")), None);

    session.settle().await;
    let schema = session.schema().unwrap();
    assert_eq!(schema.path, p("report.widgets[0].text"));
    assert!(schema.names().contains(&"title"));
    assert!(!schema.names().contains(&"*S"));
    assert_eq!(session.store().get(&p("sources[0].data")), None);
}

#[tokio::test(start_paused = true)]
async fn test_schema_inside_repeater_row() {
    let mut special = Map::new();
    special.insert("now".to_string(), json!("2024-05-01T00:00:00Z"));
    let mut session = session().with_special(special);

    session
        .add_available_source(json!({ "name": "rows", "type": "static", "data": [{ "x": 1, "y": "a" }] }))
        .unwrap();
    session.declare_source("S", "rows").unwrap();
    let repeater = session.add_widget("repeater", None).unwrap();
    session
        .edit_expr(&format!("{}.source", repeater), ExprMode::default())
        .unwrap();
    session.set_expr_text("*S").unwrap();
    let label = session.add_widget("label", Some(&repeater)).unwrap();
    session.select_widget(&label).unwrap();
    session.settle().await;

    let schema = session.schema().unwrap();
    assert_eq!(schema.path, label.join("text"));
    assert_eq!(schema.names(), vec!["x", "y", "*S", "@now"]);
    assert_eq!(schema.get("x").unwrap().ty, "number");
}

#[test]
fn test_compact_expand_equivalence() {
    let report = json!({
        "type": "page",
        "orientation": "landscape",
        "classifyStyles": true,
        "sources": [],
        "parameters": [],
        "widgets": [
            {
                "type": "container",
                "height": "auto",
                "widgets": [{ "type": "label", "text": ":a" }]
            }
        ]
    });
    let mut session = session();
    session.load_report(&report.to_string()).unwrap();

    let text = session.export(Some(CompactOptions::default()));
    assert_eq!(text, compact(&report, CompactOptions::default()));
    let compacted: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(compacted, json!({ "type": "page", "widgets": [{ "type": "container", "widgets": [{ "type": "label", "text": ":a" }] }] }));
    assert_eq!(expand(&compacted), report);

    let download = session.download(Some(CompactOptions {
        source: true,
        template_strings: false,
    }));
    assert_eq!(download.filename, "report.js");
    assert!(download.content.starts_with("{\n  type: \"page\""));
}

#[tokio::test(start_paused = true)]
async fn test_project_lifecycle() {
    let kv = Arc::new(MemoryStore::new());
    let mut session = Session::with_kv(EditorConfig::default(), kv.clone());
    session.load_report("{ type: 'page', title: 'scratch', widgets: [] }").unwrap();

    let first = session.create_project("sales").await.unwrap();
    assert_eq!(first, 0);
    assert_eq!(session.link(Role::Project), Some(&p("projects[0]")));
    assert_eq!(session.report().get("title"), None);
    assert!(kv.keys().contains(&"session".to_string()));

    session.add_widget("label", None).unwrap();
    let second = session.clone_project(first).await.unwrap();
    assert_eq!(session.store().get(&p("projects[1].name")), Some(&json!("sales 2")));
    assert_eq!(session.report()["widgets"].as_array().unwrap().len(), 1);

    session.add_widget("image", None).unwrap();
    session.link_project(first).await.unwrap();
    assert_eq!(session.report()["widgets"].as_array().unwrap().len(), 1);
    assert_eq!(session.history().undo_len(), 1);
    session.link_project(second).await.unwrap();
    assert_eq!(session.report()["widgets"].as_array().unwrap().len(), 2);

    assert!(!session.delete_project(first, false).await.unwrap());
    assert_eq!(session.store().items(&p("projects")).len(), 2);
    assert!(session.delete_project(first, true).await.unwrap());
    assert_eq!(session.link(Role::Project), Some(&p("projects[0]")));
    assert_eq!(kv.keys(), vec!["projects".to_string(), "session".to_string()]);

    let outcome = session
        .import_projects(r#"{ "name": "sales 2", "report": { "type": "flow", "widgets": [] }, "sources": [] }"#)
        .await
        .unwrap();
    assert_eq!(outcome, ImportOutcome::Updated(0));
    assert_eq!(session.report()["type"], json!("flow"));

    let outcome = session.import_projects(r#"[{ "name": "a" }, { "name": "b" }]"#).await.unwrap();
    assert_eq!(outcome, ImportOutcome::Replaced(2));
    assert_eq!(session.link(Role::Project), None);
    assert_eq!(session.import_projects("[1]").await.unwrap(), ImportOutcome::Ignored);
}

#[tokio::test(start_paused = true)]
async fn test_projects_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EditorConfig {
        persist_dir: Some(dir.path().to_path_buf()),
        ..EditorConfig::default()
    };

    let mut session = Session::new(config.clone());
    session.create_project("kept").await.unwrap();
    session.save_diff_inputs("a", "b").await.unwrap();
    assert!(dir.path().join("projects.json").exists());

    let mut restarted = Session::with_kv(config, Arc::new(FileStore::new(dir.path())));
    assert!(restarted.restore().await.unwrap());
    assert_eq!(restarted.store().get(&p("projects[0].name")), Some(&json!("kept")));
    assert_eq!(
        restarted.diff_inputs().await.unwrap(),
        Some(("a".to_string(), "b".to_string()))
    );
}

#[test]
fn test_load_failure_is_reported() {
    let mut session = session();
    let err = session.load_report("not { a report").unwrap_err();
    assert!(matches!(err, EditorError::Load(_)));
    assert_eq!(session.report(), &json!({ "type": "page", "widgets": [] }));
}
