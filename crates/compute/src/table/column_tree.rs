//! Hierarchical namespace of every observed field, with selection state.
//!
//! Node ids are `/`-delimited paths. Ids ending in `/` are categories
//! (`/metrics/api_calls/`); anything else is a leaf backed by a real field
//! (`/metadata/agent_name`) or by one of its side channels
//! (`/metrics/latency/max_value`).
//!
//! Nodes live in an arena. Parents are always created before their children,
//! so a reverse index walk visits every child before its parent.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

use canon_core::{Entry, FieldValue, Fields, FILES_FIELD};

pub const ROOT_ID: &str = "/";
pub const METADATA_PREFIX: &str = "/metadata/";
pub const METRICS_PREFIX: &str = "/metrics/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionState {
    /// Everything under the node is selected. A selected leaf stays `All`
    /// whatever its side channels are set to.
    All,
    #[default]
    None,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableColumnUnit {
    Timestamp,
    Numerical,
    String,
}

/// A selected leaf, ready to become a table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableColumn {
    /// Node id, e.g. `/metrics/api_calls/env_init/count`.
    pub column_id: String,
    /// Display name: the id without its `/metadata/` or `/metrics/` prefix.
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<TableColumnUnit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnNode {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub state: SelectionState,
    /// Whether the node itself was selected, independent of its children.
    selected: bool,
    children: Vec<usize>,
}

impl ColumnNode {
    fn new(id: String, name: &str, description: Option<String>) -> Self {
        Self {
            id,
            name: name.to_string(),
            description,
            state: SelectionState::None,
            selected: false,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        !self.id.ends_with('/')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnTree {
    nodes: Vec<ColumnNode>,
    index: HashMap<String, usize>,
}

/// Leaf id → (description, side channel names).
type LeafSpecs = BTreeMap<String, (Option<String>, BTreeSet<&'static str>)>;

impl ColumnTree {
    /// Build the tree from every metadata and metrics field across `entries`.
    pub fn build(entries: &[Entry]) -> Self {
        let mut leaves: LeafSpecs = BTreeMap::new();
        for entry in entries {
            collect_leaves(&mut leaves, METADATA_PREFIX, &entry.metadata, true);
            collect_leaves(&mut leaves, METRICS_PREFIX, &entry.metrics, false);
        }

        let mut tree = ColumnTree {
            nodes: vec![ColumnNode::new(ROOT_ID.to_string(), ROOT_ID, None)],
            index: HashMap::from([(ROOT_ID.to_string(), 0)]),
        };

        for (id, (description, subfields)) in leaves {
            let parent = tree.ensure_categories(&id);
            let leaf = tree.attach(parent, id.clone(), last_segment(&id), description);
            for sub in subfields {
                tree.attach(leaf, format!("{id}/{sub}"), sub, None);
            }
        }
        tree
    }

    /// Create the category chain above a leaf id and return the deepest one.
    fn ensure_categories(&mut self, leaf_id: &str) -> usize {
        let mut parent = 0;
        let mut offset = ROOT_ID.len();
        while let Some(pos) = leaf_id[offset..].find('/') {
            let end = offset + pos + 1;
            let category_id = &leaf_id[..end];
            parent = match self.index.get(category_id) {
                Some(&idx) => idx,
                None => {
                    let name = &leaf_id[offset..end - 1];
                    self.attach(parent, category_id.to_string(), name, None)
                }
            };
            offset = end;
        }
        parent
    }

    fn attach(
        &mut self,
        parent: usize,
        id: String,
        name: &str,
        description: Option<String>,
    ) -> usize {
        if let Some(&existing) = self.index.get(&id) {
            return existing;
        }
        let idx = self.nodes.len();
        self.index.insert(id.clone(), idx);
        self.nodes.push(ColumnNode::new(id, name, description));
        self.nodes[parent].children.push(idx);
        idx
    }

    pub fn root(&self) -> &ColumnNode {
        &self.nodes[0]
    }

    pub fn get(&self, id: &str) -> Option<&ColumnNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn children<'a>(
        &'a self,
        node: &'a ColumnNode,
    ) -> impl Iterator<Item = &'a ColumnNode> + 'a {
        node.children.iter().map(|&idx| &self.nodes[idx])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Select nodes by id. A category selects its whole subtree including side
    /// channels; a leaf selects only itself.
    pub fn add_selection<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            let Some(idx) = self.lookup(id.as_ref()) else {
                continue;
            };
            if self.nodes[idx].is_leaf() {
                self.nodes[idx].selected = true;
            } else {
                self.set_subtree(idx, true);
            }
        }
        self.propagate();
    }

    /// Deselect nodes by id, always including the whole subtree.
    pub fn remove_selection<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            if let Some(idx) = self.lookup(id.as_ref()) {
                self.set_subtree(idx, false);
            }
        }
        self.propagate();
    }

    fn lookup(&self, id: &str) -> Option<usize> {
        let found = self.index.get(id).copied();
        if found.is_none() {
            warn!(column_id = id, "Unknown column id in selection");
        }
        found
    }

    fn set_subtree(&mut self, idx: usize, selected: bool) {
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current];
            node.selected = selected;
            stack.extend(node.children.iter().copied());
        }
    }

    /// Recompute every state bottom-up from the selection flags.
    fn propagate(&mut self) {
        for idx in (0..self.nodes.len()).rev() {
            let node = &self.nodes[idx];
            let own = if node.selected {
                SelectionState::All
            } else {
                SelectionState::None
            };

            let state = if node.children.is_empty() {
                own
            } else if node.is_leaf() && node.selected {
                SelectionState::All
            } else {
                let mut states: Vec<SelectionState> =
                    node.children.iter().map(|&c| self.nodes[c].state).collect();
                if node.is_leaf() {
                    states.push(own);
                }
                combine(&states)
            };
            self.nodes[idx].state = state;
        }
    }

    /// Selected leaves in depth-first order. Units are left unset.
    pub fn selection(&self) -> Vec<TableColumn> {
        let mut columns = Vec::new();
        let mut stack = vec![0];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.state == SelectionState::None {
                continue;
            }
            if node.is_leaf() && node.state == SelectionState::All {
                columns.push(TableColumn {
                    column_id: node.id.clone(),
                    name: display_name(&node.id).to_string(),
                    description: node.description.clone(),
                    unit: None,
                });
            }
            stack.extend(node.children.iter().rev().copied());
        }
        columns
    }
}

fn combine(states: &[SelectionState]) -> SelectionState {
    if states.iter().all(|s| *s == SelectionState::All) {
        SelectionState::All
    } else if states.iter().all(|s| *s == SelectionState::None) {
        SelectionState::None
    } else {
        SelectionState::Partial
    }
}

fn collect_leaves(leaves: &mut LeafSpecs, prefix: &str, fields: &Fields, skip_files: bool) {
    for (key, field) in fields {
        if skip_files && key == FILES_FIELD {
            continue;
        }
        let spec = leaves.entry(format!("{prefix}{key}")).or_insert_with(|| {
            let description = field.as_annotated().and_then(|a| a.description.clone());
            (description, BTreeSet::new())
        });
        if let FieldValue::Annotated(a) = field {
            spec.1.extend(a.aggregate_subfields());
        }
    }
}

fn last_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Strip the `/metadata/` or `/metrics/` prefix from a column id.
pub fn display_name(id: &str) -> &str {
    id.strip_prefix(METADATA_PREFIX)
        .or_else(|| id.strip_prefix(METRICS_PREFIX))
        .unwrap_or(id)
}

// ── Serialization ───────────────────────────────────────────────────

struct NodeView<'a> {
    tree: &'a ColumnTree,
    idx: usize,
}

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = &self.tree.nodes[self.idx];
        let children: Vec<NodeView<'_>> = node
            .children
            .iter()
            .map(|&idx| NodeView {
                tree: self.tree,
                idx,
            })
            .collect();

        let mut s = serializer.serialize_struct("ColumnNode", 5)?;
        s.serialize_field("column_node_id", &node.id)?;
        s.serialize_field("name", &node.name)?;
        s.serialize_field("selection_state", &node.state)?;
        s.serialize_field("children", &children)?;
        s.serialize_field("description", &node.description)?;
        s.end()
    }
}

/// Serializes as the nested node structure rooted at `/`.
impl Serialize for ColumnTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        NodeView { tree: self, idx: 0 }.serialize(serializer)
    }
}
