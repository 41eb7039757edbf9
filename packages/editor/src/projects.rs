//! # Project Store
//!
//! Named `{ name, report, sources }` bundles kept under `projects` in the
//! document store and persisted through a [`KeyValueStore`]. The active
//! project is the one the `project` link points at; its fields are copied
//! into `report`/`sources` when it is linked and written back before
//! another project takes its place.

use crate::errors::{PersistError, StoreError};
use crate::model::Project;
use crate::path::Path;
use crate::persist::{KeyValueStore, PROJECTS_KEY, SESSION_KEY};
use crate::store::{DocumentStore, PROJECTS, REPORT, SOURCES};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// What an import did to the collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The whole collection was replaced with this many projects
    Replaced(usize),
    /// The project at this index was replaced in place
    Updated(usize),
    Ignored,
}

#[derive(Clone)]
pub struct ProjectStore {
    kv: Arc<dyn KeyValueStore>,
}

impl fmt::Debug for ProjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectStore").finish_non_exhaustive()
    }
}

impl ProjectStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    /// Load the persisted project list and the last unlinked session.
    /// Returns true when a session was restored into `report`/`sources`.
    pub async fn restore(&self, store: &mut DocumentStore) -> Result<bool, PersistError> {
        if let Some(Value::Array(projects)) = self.kv.load(PROJECTS_KEY).await? {
            let projects: Vec<Value> = projects.into_iter().filter(has_name).collect();
            tracing::info!(count = projects.len(), "projects restored");
            set(store, PROJECTS, Value::Array(projects));
        }

        match self.kv.load(SESSION_KEY).await? {
            Some(session) => {
                if let Some(report) = session.get(REPORT).filter(|r| r.is_object()) {
                    set(store, REPORT, report.clone());
                }
                if let Some(sources) = session.get(SOURCES).filter(|s| s.is_array()) {
                    set(store, SOURCES, sources.clone());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn persist(&self, store: &DocumentStore) -> Result<(), PersistError> {
        let projects = store.root()[PROJECTS].clone();
        self.kv.save(PROJECTS_KEY, projects).await
    }

    /// Remember the live report/sources of a session with no linked project
    pub async fn cache_session(&self, store: &DocumentStore) -> Result<(), PersistError> {
        let session = json!({
            REPORT: store.root()[REPORT].clone(),
            SOURCES: store.root()[SOURCES].clone(),
        });
        self.kv.save(SESSION_KEY, session).await
    }
}

fn set(store: &mut DocumentStore, key: &str, value: Value) {
    // top-level keys always exist
    if let Err(error) = store.set(&Path::root().join(key), value) {
        tracing::error!(%error, key, "could not write store root key");
    }
}

fn has_name(value: &Value) -> bool {
    value.get("name").and_then(Value::as_str).is_some()
}

pub fn project_path(index: usize) -> Path {
    Path::root().join(PROJECTS).join(index)
}

pub fn count(store: &DocumentStore) -> usize {
    store.items(&Path::root().join(PROJECTS)).len()
}

pub fn names(store: &DocumentStore) -> Vec<String> {
    store
        .items(&Path::root().join(PROJECTS))
        .iter()
        .filter_map(|p| p.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

/// `base`, or `base 2`, `base 3`, ... when taken
pub fn unique_name(store: &DocumentStore, base: &str) -> String {
    let taken = names(store);
    if !taken.iter().any(|n| n == base) {
        return base.to_string();
    }
    (2..)
        .map(|i| format!("{} {}", base, i))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Copy the live report and sources into project `index`
pub fn write_back(store: &mut DocumentStore, index: usize) -> Result<(), StoreError> {
    let path = project_path(index);
    if !store.resolves(&path) {
        return Err(StoreError::Missing(path));
    }
    let report = store.report().clone();
    let sources = store.root()[SOURCES].clone();
    store.set(&path.join(REPORT), report)?;
    store.set(&path.join(SOURCES), sources)?;
    Ok(())
}

/// Replace the live report and sources with project `index`
pub fn load_into(store: &mut DocumentStore, index: usize) -> Result<(), StoreError> {
    let path = project_path(index);
    let project = store.get(&path).cloned().ok_or_else(|| StoreError::Missing(path))?;
    let report = match project.get(REPORT) {
        Some(report) if report.is_object() => report.clone(),
        _ => Project::new("").report,
    };
    let sources = match project.get(SOURCES) {
        Some(sources) if sources.is_array() => sources.clone(),
        _ => json!([]),
    };
    store.set(&Path::root().join(REPORT), report)?;
    store.set(&Path::root().join(SOURCES), sources)?;
    Ok(())
}

/// Append a project and return its index
pub fn append(store: &mut DocumentStore, project: Project) -> Result<usize, StoreError> {
    let value = serde_json::to_value(project).unwrap_or(Value::Null);
    store.push(&Path::root().join(PROJECTS), value)
}

/// Apply an imported payload: a list of named projects replaces the
/// collection, a single named project replaces the entry with that name
pub fn import(store: &mut DocumentStore, payload: &Value) -> Result<ImportOutcome, StoreError> {
    match payload {
        Value::Array(items) if !items.is_empty() && items.iter().all(has_name) => {
            store.set(&Path::root().join(PROJECTS), payload.clone())?;
            Ok(ImportOutcome::Replaced(items.len()))
        }
        Value::Object(_) if has_name(payload) => {
            let name = payload.get("name").and_then(Value::as_str);
            let found = store
                .items(&Path::root().join(PROJECTS))
                .iter()
                .position(|p| p.get("name").and_then(Value::as_str) == name);
            match found {
                Some(index) => {
                    store.set(&project_path(index), payload.clone())?;
                    Ok(ImportOutcome::Updated(index))
                }
                None => Ok(ImportOutcome::Ignored),
            }
        }
        _ => Ok(ImportOutcome::Ignored),
    }
}
