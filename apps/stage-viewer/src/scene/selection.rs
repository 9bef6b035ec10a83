use std::collections::BTreeSet;

/// Paths of the currently selected nodes. Membership is by path so the set
/// survives any re-materialization of node values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    paths: BTreeSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `path` if absent, removes it otherwise. Returns true when the path
    /// is selected afterwards.
    pub fn toggle(&mut self, path: &str) -> bool {
        if self.paths.remove(path) {
            false
        } else {
            self.paths.insert(path.to_string());
            true
        }
    }

    pub fn replace<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.paths = paths.into_iter().collect();
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.iter().cloned().collect()
    }
}
