//! Structured values and the tree that stores them.

use super::DataPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An immutable structured value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataNode {
    Leaf {
        name: String,
        value: String,
    },
    Container {
        name: String,
        children: BTreeMap<String, DataNode>,
    },
}

impl DataNode {
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        DataNode::Leaf {
            name: name.into(),
            value: value.into(),
        }
    }

    /// An empty container.
    pub fn container(name: impl Into<String>) -> Self {
        DataNode::Container {
            name: name.into(),
            children: BTreeMap::new(),
        }
    }

    /// Builder-style helper: returns a copy with `child` added. No-op on leaves.
    pub fn with_child(mut self, child: DataNode) -> Self {
        if let DataNode::Container { children, .. } = &mut self {
            children.insert(child.name().to_string(), child);
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            DataNode::Leaf { name, .. } | DataNode::Container { name, .. } => name,
        }
    }

    pub fn child(&self, name: &str) -> Option<&DataNode> {
        match self {
            DataNode::Container { children, .. } => children.get(name),
            DataNode::Leaf { .. } => None,
        }
    }
}

/// Errors raised by tree modifications.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("node named {found:?} cannot be stored at {path}")]
    NameMismatch { path: DataPath, found: String },
    #[error("the root can only hold a container")]
    LeafAtRoot,
    #[error("{path} is a leaf and cannot have children")]
    ParentIsLeaf { path: DataPath },
}

/// One datastore of a device.
///
/// The root is implicit: it is an unnamed container whose children are stored here. Reading
/// the root of an empty tree returns `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataTree {
    children: BTreeMap<String, DataNode>,
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, path: &DataPath) -> Option<DataNode> {
        let Some((first, rest)) = path.segments().split_first() else {
            if self.children.is_empty() {
                return None;
            }
            return Some(DataNode::Container {
                name: String::new(),
                children: self.children.clone(),
            });
        };
        let mut node = self.children.get(first)?;
        for segment in rest {
            node = node.child(segment)?;
        }
        Some(node.clone())
    }

    /// Replaces whatever is at `path` with `node`, creating missing parent containers.
    pub fn put(&mut self, path: &DataPath, node: DataNode) -> Result<(), TreeError> {
        let slot = self.slot(path, &node)?;
        match slot {
            Slot::Root(children) => {
                if let DataNode::Container { children: new, .. } = node {
                    *children = new;
                }
            }
            Slot::Child(children) => {
                children.insert(node.name().to_string(), node);
            }
        }
        Ok(())
    }

    /// Merges `node` into whatever is at `path`: containers merge child by child, anything
    /// else is replaced.
    pub fn merge(&mut self, path: &DataPath, node: DataNode) -> Result<(), TreeError> {
        let slot = self.slot(path, &node)?;
        match (slot, node) {
            (Slot::Root(children), DataNode::Container { children: new, .. }) => {
                merge_children(children, new);
            }
            (Slot::Root(_), DataNode::Leaf { .. }) => {}
            (Slot::Child(children), node) => {
                let name = node.name().to_string();
                match children.remove(&name) {
                    Some(existing) => {
                        children.insert(name, merge_node(existing, node));
                    }
                    None => {
                        children.insert(name, node);
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes the subtree at `path`. Removing something absent is not an error.
    pub fn remove(&mut self, path: &DataPath) {
        let Some((parent, last)) = path.split_last() else {
            self.children.clear();
            return;
        };
        let mut children = &mut self.children;
        for segment in parent {
            match children.get_mut(segment) {
                Some(DataNode::Container { children: next, .. }) => children = next,
                _ => return,
            }
        }
        children.remove(last);
    }

    /// Finds the map a node for `path` should be inserted into, validating names and creating
    /// missing intermediate containers.
    fn slot(&mut self, path: &DataPath, node: &DataNode) -> Result<Slot<'_>, TreeError> {
        let Some((parent, last)) = path.split_last() else {
            return match node {
                DataNode::Container { .. } => Ok(Slot::Root(&mut self.children)),
                DataNode::Leaf { .. } => Err(TreeError::LeafAtRoot),
            };
        };
        if node.name() != last {
            return Err(TreeError::NameMismatch {
                path: path.clone(),
                found: node.name().to_string(),
            });
        }

        let mut children = &mut self.children;
        let mut walked = DataPath::root();
        for segment in parent {
            walked = walked.child(segment.clone());
            let entry = children
                .entry(segment.clone())
                .or_insert_with(|| DataNode::container(segment.clone()));
            match entry {
                DataNode::Container { children: next, .. } => children = next,
                DataNode::Leaf { .. } => return Err(TreeError::ParentIsLeaf { path: walked }),
            }
        }
        Ok(Slot::Child(children))
    }
}

enum Slot<'a> {
    Root(&'a mut BTreeMap<String, DataNode>),
    Child(&'a mut BTreeMap<String, DataNode>),
}

fn merge_children(into: &mut BTreeMap<String, DataNode>, from: BTreeMap<String, DataNode>) {
    for (name, node) in from {
        match into.remove(&name) {
            Some(existing) => {
                into.insert(name, merge_node(existing, node));
            }
            None => {
                into.insert(name, node);
            }
        }
    }
}

fn merge_node(existing: DataNode, incoming: DataNode) -> DataNode {
    match (existing, incoming) {
        (
            DataNode::Container { name, mut children },
            DataNode::Container {
                children: incoming, ..
            },
        ) => {
            merge_children(&mut children, incoming);
            DataNode::Container { name, children }
        }
        (_, incoming) => incoming,
    }
}
