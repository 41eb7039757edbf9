//! # Document Store
//!
//! Path-addressable tree holding the live document:
//!
//! ```text
//! {
//!   report:   { type, widgets[], sources[], parameters[], ... },
//!   sources:  [ AvailableSource, ... ],
//!   projects: [ { name, report, sources }, ... ]
//! }
//! ```
//!
//! Every mutation is synchronous, bumps the store version and publishes a
//! [`Change`] to each subscriber whose prefix overlaps the changed path.

use crate::errors::StoreError;
use crate::path::{Path, Segment};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const REPORT: &str = "report";
pub const SOURCES: &str = "sources";
pub const PROJECTS: &str = "projects";

/// A mutation as seen by observers
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Value at `path` was written or replaced
    Set { path: Path },
    /// Object entry at `path` was deleted
    Removed { path: Path },
    /// Array at `path` had `removed` items taken out at `start` and `inserted` put in
    Spliced {
        path: Path,
        start: usize,
        removed: usize,
        inserted: usize,
    },
}

impl Change {
    pub fn path(&self) -> &Path {
        match self {
            Change::Set { path } | Change::Removed { path } | Change::Spliced { path, .. } => path,
        }
    }

    /// Whether this change can alter the value at `path`
    pub fn affects(&self, path: &Path) -> bool {
        self.path().overlaps(path)
    }
}

/// Receiving half of a prefix subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    prefix: Path,
    rx: UnboundedReceiver<Change>,
}

impl Subscription {
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Changes published since the last drain
    pub fn drain(&mut self) -> Vec<Change> {
        let mut changes = Vec::new();
        while let Ok(change) = self.rx.try_recv() {
            changes.push(change);
        }
        changes
    }

    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }
}

#[derive(Debug)]
pub struct DocumentStore {
    root: Value,
    version: u64,
    subscribers: Vec<(Path, UnboundedSender<Change>)>,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::with_report(json!({ "type": "page", "widgets": [] }))
    }

    pub fn with_report(report: Value) -> Self {
        Self {
            root: json!({ REPORT: report, SOURCES: [], PROJECTS: [] }),
            version: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn report(&self) -> &Value {
        &self.root[REPORT]
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.segments() {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map.get(k)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn resolves(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    /// Array at `path`, empty when it is missing or not an array
    pub fn items(&self, path: &Path) -> &[Value] {
        self.get(path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Write `value` at `path`. The parent must exist; an array index may
    /// address an existing item or append at the end.
    pub fn set(&mut self, path: &Path, value: Value) -> Result<(), StoreError> {
        let (parent, last) = split(path)?;
        let container = self.get_mut(&parent)?;
        match (last, container) {
            (Segment::Key(k), Value::Object(map)) => {
                map.insert(k.clone(), value);
            }
            (Segment::Index(i), Value::Array(items)) if *i < items.len() => items[*i] = value,
            (Segment::Index(i), Value::Array(items)) if *i == items.len() => items.push(value),
            (Segment::Index(i), Value::Array(items)) => {
                return Err(StoreError::OutOfBounds {
                    path: parent,
                    index: *i,
                    len: items.len(),
                })
            }
            _ => return Err(StoreError::NotContainer(parent)),
        }
        self.publish(Change::Set { path: path.clone() });
        Ok(())
    }

    /// Delete the value at `path`; array items are spliced out
    pub fn remove(&mut self, path: &Path) -> Result<Value, StoreError> {
        let (parent, last) = split(path)?;
        match last {
            Segment::Index(i) => {
                let mut removed = self.splice(&parent, *i, 1, Vec::new())?;
                removed.pop().ok_or_else(|| StoreError::Missing(path.clone()))
            }
            Segment::Key(k) => {
                let removed = match self.get_mut(&parent)? {
                    Value::Object(map) => map.shift_remove(k.as_str()),
                    _ => return Err(StoreError::NotContainer(parent)),
                };
                let removed = removed.ok_or_else(|| StoreError::Missing(path.clone()))?;
                self.publish(Change::Removed { path: path.clone() });
                Ok(removed)
            }
        }
    }

    /// Append to the array at `path`, returning the new item's index
    pub fn push(&mut self, path: &Path, value: Value) -> Result<usize, StoreError> {
        let len = self.array_len(path)?;
        self.splice(path, len, 0, vec![value])?;
        Ok(len)
    }

    /// Remove `count` items at `start` and insert `items` in their place.
    /// Returns the removed items.
    pub fn splice(
        &mut self,
        path: &Path,
        start: usize,
        count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, StoreError> {
        let inserted = items.len();
        let removed: Vec<Value> = match self.get_mut(path)? {
            Value::Array(array) => {
                if start > array.len() {
                    return Err(StoreError::OutOfBounds {
                        path: path.clone(),
                        index: start,
                        len: array.len(),
                    });
                }
                let end = (start + count).min(array.len());
                array.splice(start..end, items).collect()
            }
            _ => return Err(StoreError::NotArray(path.clone())),
        };
        self.publish(Change::Spliced {
            path: path.clone(),
            start,
            removed: removed.len(),
            inserted,
        });
        Ok(removed)
    }

    pub fn array_len(&self, path: &Path) -> Result<usize, StoreError> {
        match self.get(path) {
            Some(Value::Array(items)) => Ok(items.len()),
            Some(_) => Err(StoreError::NotArray(path.clone())),
            None => Err(StoreError::Missing(path.clone())),
        }
    }

    /// Observe every change overlapping `prefix`
    pub fn subscribe(&mut self, prefix: Path) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((prefix.clone(), tx));
        Subscription { prefix, rx }
    }

    fn publish(&mut self, change: Change) {
        self.version += 1;
        tracing::trace!(version = self.version, path = %change.path(), "store change");
        self.subscribers.retain(|(prefix, tx)| {
            if !change.affects(prefix) {
                return !tx.is_closed();
            }
            tx.send(change.clone()).is_ok()
        });
    }

    fn get_mut(&mut self, path: &Path) -> Result<&mut Value, StoreError> {
        let mut current = &mut self.root;
        for segment in path.segments() {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map.get_mut(k),
                (Segment::Index(i), Value::Array(items)) => items.get_mut(*i),
                _ => None,
            }
            .ok_or_else(|| StoreError::Missing(path.clone()))?;
        }
        Ok(current)
    }
}

fn split(path: &Path) -> Result<(Path, &Segment), StoreError> {
    match (path.parent(), path.last()) {
        (Some(parent), Some(last)) => Ok((parent, last)),
        _ => Err(StoreError::RootMutation),
    }
}

/// Empty JSON object
pub fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    #[test]
    fn test_get_and_set() {
        let mut store = DocumentStore::new();
        store.set(&p("report.title"), json!("Sales")).unwrap();
        assert_eq!(store.get(&p("report.title")), Some(&json!("Sales")));
        assert_eq!(store.version(), 1);

        let err = store.set(&p("report.missing.deep"), json!(1)).unwrap_err();
        assert_eq!(err, StoreError::Missing(p("report.missing")));
        assert_eq!(store.set(&Path::root(), json!({})), Err(StoreError::RootMutation));
    }

    #[test]
    fn test_push_and_splice() {
        let mut store = DocumentStore::new();
        let widgets = p("report.widgets");
        for name in ["a", "b", "c"] {
            store.push(&widgets, json!({ "name": name })).unwrap();
        }
        let removed = store.splice(&widgets, 1, 1, vec![]).unwrap();
        assert_eq!(removed, vec![json!({ "name": "b" })]);
        store.splice(&widgets, 0, 0, removed).unwrap();
        let names: Vec<_> = store.items(&widgets).iter().map(|w| w["name"].clone()).collect();
        assert_eq!(names, vec![json!("b"), json!("a"), json!("c")]);

        assert!(matches!(
            store.splice(&widgets, 9, 0, vec![]),
            Err(StoreError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_remove_object_key_and_array_item() {
        let mut store = DocumentStore::with_report(json!({ "header": { "widgets": [] }, "widgets": [1, 2] }));
        assert_eq!(store.remove(&p("report.header")).unwrap(), json!({ "widgets": [] }));
        assert!(!store.resolves(&p("report.header")));
        assert_eq!(store.remove(&p("report.widgets[0]")).unwrap(), json!(1));
        assert_eq!(store.get(&p("report.widgets")), Some(&json!([2])));
        assert!(matches!(store.remove(&p("report.nope")), Err(StoreError::Missing(_))));
    }

    #[test]
    fn test_subscribers_receive_overlapping_changes() {
        let mut store = DocumentStore::new();
        let mut widgets = store.subscribe(p("report.widgets"));
        let mut sources = store.subscribe(p("sources"));
        let mut everything = store.subscribe(Path::root());

        store.push(&p("report.widgets"), json!({ "type": "label" })).unwrap();
        store.set(&p("report.widgets[0].text"), json!("x")).unwrap();
        store.set(&p("report"), json!({ "type": "flow" })).unwrap();

        assert_eq!(widgets.drain().len(), 3);
        assert!(sources.drain().is_empty());
        assert_eq!(everything.drain().len(), 3);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let mut store = DocumentStore::new();
        let sub = store.subscribe(Path::root());
        drop(sub);
        store.set(&p("report.a"), json!(1)).unwrap();
        assert!(store.subscribers.is_empty());
    }
}
