use serde::Deserialize;

/// A stage the user can ask the remote application to open.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetEntry {
    pub name: String,
    pub url: String,
}

impl AssetEntry {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    fn file_name(&self) -> Option<&str> {
        file_name(&self.url)
    }
}

/// Ordered asset list plus the entry currently selected. The first entry is
/// selected initially.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetCatalog {
    entries: Vec<AssetEntry>,
    selected: usize,
}

impl AssetCatalog {
    /// Returns `None` for an empty list; a catalog always has a selection.
    pub fn new(entries: Vec<AssetEntry>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        Some(Self {
            entries,
            selected: 0,
        })
    }

    pub fn entries(&self) -> &[AssetEntry] {
        &self.entries
    }

    pub fn selected(&self) -> &AssetEntry {
        &self.entries[self.selected]
    }

    /// Matches a remote stage url against the catalog by file name, since the
    /// remote reports whatever absolute path it resolved the stage to.
    pub fn resolve(&self, url: &str) -> Option<usize> {
        let wanted = file_name(url)?;
        self.entries
            .iter()
            .position(|entry| entry.file_name() == Some(wanted))
    }

    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.name == name)
    }

    /// Returns true when the selection actually moved.
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.entries.len() || index == self.selected {
            return false;
        }
        self.selected = index;
        true
    }
}

fn file_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
}
