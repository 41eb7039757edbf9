//! Role → path aliases
//!
//! Each editing role points at one store path at a time. Store changes are
//! fed through [`Links::follow`], which relocates links past a splice;
//! [`Links::sweep`] then clears any link that no longer resolves.

use crate::path::{Path, Segment};
use crate::store::{Change, DocumentStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Widget,
    Expr,
    Param,
    Source,
    Data,
    Project,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Widget,
        Role::Expr,
        Role::Param,
        Role::Source,
        Role::Data,
        Role::Project,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Widget => "widget",
            Role::Expr => "expr",
            Role::Param => "param",
            Role::Source => "source",
            Role::Data => "data",
            Role::Project => "project",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Links {
    map: BTreeMap<Role, Path>,
}

impl Links {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, role: Role) -> Option<&Path> {
        self.map.get(&role)
    }

    pub fn set(&mut self, role: Role, path: Path) {
        self.map.insert(role, path);
    }

    pub fn clear(&mut self, role: Role) -> Option<Path> {
        self.map.remove(&role)
    }

    pub fn clear_all(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, &Path)> {
        self.map.iter().map(|(role, path)| (*role, path))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Clear the given roles when they point at or under `path`
    pub fn clear_under(&mut self, path: &Path, roles: &[Role]) -> Vec<Role> {
        let cleared: Vec<Role> = self
            .map
            .iter()
            .filter(|(role, link)| roles.contains(role) && link.starts_with(path))
            .map(|(role, _)| *role)
            .collect();
        for role in &cleared {
            self.map.remove(role);
        }
        cleared
    }

    /// Follow a single store change, then sweep. Returns the roles that were cleared.
    pub fn apply_change(&mut self, change: &Change, store: &DocumentStore) -> Vec<Role> {
        let mut cleared = self.follow(change);
        cleared.extend(self.sweep(store));
        cleared
    }

    /// Relocate or clear links for one change without looking at the store.
    ///
    /// A batch of changes must be followed in order before [`Links::sweep`]
    /// runs, since intermediate positions need not resolve in the final tree.
    pub fn follow(&mut self, change: &Change) -> Vec<Role> {
        let mut cleared = Vec::new();

        match change {
            Change::Removed { path } => cleared.extend(self.clear_under(path, &Role::ALL)),
            Change::Spliced {
                path,
                start,
                removed,
                inserted,
            } => {
                let depth = path.len();
                let end = start + removed;
                for role in Role::ALL {
                    let Some(link) = self.map.get(&role) else {
                        continue;
                    };
                    if !link.starts_with(path) {
                        continue;
                    }
                    let Some(Segment::Index(index)) = link.segments().get(depth) else {
                        continue;
                    };
                    let index = *index;
                    if index >= *start && index < end {
                        self.map.remove(&role);
                        cleared.push(role);
                    } else if index >= end && removed != inserted {
                        let moved = index + inserted - removed;
                        let relocated = link.with_segment(depth, Segment::Index(moved));
                        tracing::trace!(%role, from = %link, to = %relocated, "link relocated");
                        self.map.insert(role, relocated);
                    }
                }
            }
            Change::Set { .. } => {}
        }

        if !cleared.is_empty() {
            tracing::debug!(?cleared, "links cleared");
        }
        cleared
    }

    /// Clear links that do not resolve in `store`
    pub fn sweep(&mut self, store: &DocumentStore) -> Vec<Role> {
        let dangling: Vec<Role> = self
            .map
            .iter()
            .filter(|(_, link)| !store.resolves(link))
            .map(|(role, _)| *role)
            .collect();
        for role in &dangling {
            self.map.remove(role);
        }
        if !dangling.is_empty() {
            tracing::debug!(?dangling, "dangling links cleared");
        }
        dangling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(text: &str) -> Path {
        Path::parse(text).unwrap()
    }

    fn store_with_widgets(n: usize) -> DocumentStore {
        let widgets: Vec<_> = (0..n).map(|i| json!({ "type": "label", "text": format!("'{}'", i) })).collect();
        DocumentStore::with_report(json!({ "type": "page", "widgets": widgets }))
    }

    #[test]
    fn test_splice_clears_removed_and_relocates_later() {
        let mut store = store_with_widgets(3);
        let mut links = Links::new();
        links.set(Role::Widget, p("report.widgets[1]"));
        links.set(Role::Expr, p("report.widgets[2].text"));

        store.splice(&p("report.widgets"), 1, 1, vec![]).unwrap();
        let change = Change::Spliced { path: p("report.widgets"), start: 1, removed: 1, inserted: 0 };
        let cleared = links.apply_change(&change, &store);

        assert_eq!(cleared, vec![Role::Widget]);
        assert_eq!(links.get(Role::Expr), Some(&p("report.widgets[1].text")));
    }

    #[test]
    fn test_insert_shifts_later_links() {
        let mut store = store_with_widgets(2);
        let mut links = Links::new();
        links.set(Role::Widget, p("report.widgets[0]"));
        links.set(Role::Expr, p("report.widgets[1].text"));

        store.splice(&p("report.widgets"), 1, 0, vec![json!({ "type": "image" })]).unwrap();
        let change = Change::Spliced { path: p("report.widgets"), start: 1, removed: 0, inserted: 1 };
        assert!(links.apply_change(&change, &store).is_empty());
        assert_eq!(links.get(Role::Widget), Some(&p("report.widgets[0]")));
        assert_eq!(links.get(Role::Expr), Some(&p("report.widgets[2].text")));
    }

    #[test]
    fn test_replacing_parent_clears_unresolvable_links() {
        let mut store = store_with_widgets(1);
        let mut links = Links::new();
        links.set(Role::Expr, p("report.widgets[0].text"));
        links.set(Role::Data, p("report"));

        store.set(&p("report.widgets[0]"), json!({ "type": "image", "url": "'x'" })).unwrap();
        let cleared = links.apply_change(&Change::Set { path: p("report.widgets[0]") }, &store);
        assert_eq!(cleared, vec![Role::Expr]);
        assert_eq!(links.get(Role::Data), Some(&p("report")));
    }

    #[test]
    fn test_batch_followed_before_sweep_keeps_untouched_sibling() {
        // [container, label, label]; move the container from 0 to 1
        let mut store = DocumentStore::with_report(json!({
            "type": "page",
            "widgets": [
                { "type": "container", "widgets": [] },
                { "type": "label", "text": "'b'" },
                { "type": "label", "text": "'c'" }
            ]
        }));
        let mut links = Links::new();
        links.set(Role::Expr, p("report.widgets[2].text"));

        let list = p("report.widgets");
        let moved = store.splice(&list, 0, 1, vec![]).unwrap();
        store.splice(&list, 1, 0, moved).unwrap();
        let changes = [
            Change::Spliced { path: list.clone(), start: 0, removed: 1, inserted: 0 },
            Change::Spliced { path: list, start: 1, removed: 0, inserted: 1 },
        ];

        for change in &changes {
            assert!(links.follow(change).is_empty());
        }
        assert!(links.sweep(&store).is_empty());
        assert_eq!(links.get(Role::Expr), Some(&p("report.widgets[2].text")));
    }

    #[test]
    fn test_removed_key_clears_links_under_it() {
        let mut store = DocumentStore::with_report(json!({ "footer": { "widgets": [{}] } }));
        let mut links = Links::new();
        links.set(Role::Widget, p("report.footer.widgets[0]"));
        store.remove(&p("report.footer")).unwrap();
        let cleared = links.apply_change(&Change::Removed { path: p("report.footer") }, &store);
        assert_eq!(cleared, vec![Role::Widget]);
        assert!(links.is_empty());
    }
}
