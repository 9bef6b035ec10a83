use stage_proto::{ROOT_PATH, WireChildren, WireNode};
use std::fmt;

/// How much is known about a node's children.
///
/// Transitions only go `Unknown -> Loading -> Loaded | Empty`; the only way
/// back is discarding the whole tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChildState {
    #[default]
    Unknown,
    Loading,
    Loaded(Vec<SceneNode>),
    Empty,
}

impl ChildState {
    pub fn is_settled(&self) -> bool {
        matches!(self, ChildState::Loaded(_) | ChildState::Empty)
    }

    fn settle(children: Vec<SceneNode>) -> Self {
        if children.is_empty() {
            ChildState::Empty
        } else {
            ChildState::Loaded(children)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub path: String,
    pub name: Option<String>,
    pub children: ChildState,
}

impl PartialEq for SceneNode {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for SceneNode {}

impl SceneNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: None,
            children: ChildState::Unknown,
        }
    }

    pub fn is_leaf(&self) -> bool {
        match &self.children {
            ChildState::Empty => true,
            ChildState::Loaded(children) => children.is_empty(),
            ChildState::Unknown | ChildState::Loading => false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .unwrap_or_else(|| self.path.rsplit('/').next().unwrap_or(&self.path))
    }
}

impl From<WireNode> for SceneNode {
    fn from(node: WireNode) -> Self {
        let children = match node.children {
            WireChildren::Unexpanded => ChildState::Unknown,
            WireChildren::Listed(list) => {
                ChildState::settle(list.into_iter().map(SceneNode::from).collect())
            }
        };
        Self {
            path: node.path,
            name: node.name,
            children,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Children were attached; carries the paths of that batch in order.
    Merged(Vec<String>),
    /// The target path is no longer in the tree.
    Stale,
    /// The target had already settled; nothing changed.
    AlreadySettled,
}

/// The locally mirrored stage hierarchy. The root itself is implicit; only
/// its child state is tracked.
///
/// A fresh tree takes any listing for an `Unknown` node. Once the tree has
/// been discarded, only nodes with a request in flight (`Loading`) accept
/// listings, so replies addressed to the previous stage cannot repopulate it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneTree {
    root: ChildState,
    requested_only: bool,
}

fn is_root(path: Option<&str>) -> bool {
    matches!(path, None | Some(ROOT_PATH))
}

impl SceneTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.root = ChildState::Unknown;
        self.requested_only = true;
    }

    pub fn root_state(&self) -> &ChildState {
        &self.root
    }

    pub fn top_level(&self) -> &[SceneNode] {
        match &self.root {
            ChildState::Loaded(children) => children,
            _ => &[],
        }
    }

    /// Depth-first, pre-order; the first match wins.
    pub fn find_node_by_path(&self, path: &str) -> Option<&SceneNode> {
        find_in(self.top_level(), path)
    }

    fn find_node_mut(&mut self, path: &str) -> Option<&mut SceneNode> {
        match &mut self.root {
            ChildState::Loaded(children) => find_in_mut(children, path),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.find_node_by_path(path).is_some()
    }

    fn state_mut(&mut self, path: Option<&str>) -> Option<&mut ChildState> {
        if is_root(path) {
            return Some(&mut self.root);
        }
        self.find_node_mut(path?).map(|node| &mut node.children)
    }

    /// Marks `path` as having an outstanding child request. Returns false when
    /// the node is unknown to the tree or is not in `Unknown` state.
    pub fn begin_loading(&mut self, path: Option<&str>) -> bool {
        match self.state_mut(path) {
            Some(state) if matches!(state, ChildState::Unknown) => {
                *state = ChildState::Loading;
                true
            }
            _ => false,
        }
    }

    /// Attaches a child listing. `None` or the root path target the top level.
    pub fn merge_children(&mut self, path: Option<&str>, children: Vec<WireNode>) -> MergeOutcome {
        let requested_only = self.requested_only;
        let Some(state) = self.state_mut(path) else {
            return MergeOutcome::Stale;
        };
        if state.is_settled() {
            return MergeOutcome::AlreadySettled;
        }
        if requested_only && *state == ChildState::Unknown {
            return MergeOutcome::Stale;
        }
        let batch: Vec<SceneNode> = children.into_iter().map(SceneNode::from).collect();
        let paths = batch.iter().map(|node| node.path.clone()).collect();
        *state = ChildState::settle(batch);
        MergeOutcome::Merged(paths)
    }
}

fn find_in<'a>(nodes: &'a [SceneNode], path: &str) -> Option<&'a SceneNode> {
    for node in nodes {
        if node.path == path {
            return Some(node);
        }
        if let ChildState::Loaded(children) = &node.children {
            if let Some(found) = find_in(children, path) {
                return Some(found);
            }
        }
    }
    None
}

fn find_in_mut<'a>(nodes: &'a mut [SceneNode], path: &str) -> Option<&'a mut SceneNode> {
    for node in nodes {
        if node.path == path {
            return Some(node);
        }
        if let ChildState::Loaded(children) = &mut node.children {
            if let Some(found) = find_in_mut(children, path) {
                return Some(found);
            }
        }
    }
    None
}

impl fmt::Display for SceneTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{ROOT_PATH} {}", state_marker(&self.root))?;
        write_nodes(f, self.top_level(), 1)
    }
}

fn state_marker(state: &ChildState) -> &'static str {
    match state {
        ChildState::Unknown => "[+]",
        ChildState::Loading => "[...]",
        ChildState::Loaded(_) => "",
        ChildState::Empty => "[-]",
    }
}

fn write_nodes(f: &mut fmt::Formatter<'_>, nodes: &[SceneNode], depth: usize) -> fmt::Result {
    for node in nodes {
        writeln!(
            f,
            "{:indent$}{} ({}) {}",
            "",
            node.display_name(),
            node.path,
            state_marker(&node.children),
            indent = depth * 2
        )?;
        if let ChildState::Loaded(children) = &node.children {
            write_nodes(f, children, depth + 1)?;
        }
    }
    Ok(())
}
