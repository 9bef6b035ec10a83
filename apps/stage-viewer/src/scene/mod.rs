pub mod catalog;
pub mod loading;
pub mod selection;
pub mod synchronizer;
pub mod tree;

use std::fmt;
use thiserror::Error;

pub use catalog::{AssetCatalog, AssetEntry};
pub use loading::{AssetLoadState, LoadingState};
pub use selection::SelectionSet;
pub use synchronizer::SceneSynchronizer;
pub use tree::{ChildState, MergeOutcome, SceneNode, SceneTree};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SceneError {
    #[error("no node at path {0} in the local tree")]
    UnknownPath(String),
    #[error("no asset named {0:?} in the catalog")]
    UnknownAsset(String),
    #[error("asset catalog is empty")]
    EmptyCatalog,
}

/// Owned copy of the synchronizer's state for display.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSnapshot {
    pub tree: SceneTree,
    pub selection: Vec<String>,
    pub loading: LoadingState,
    pub asset: AssetEntry,
    pub remote_ready: bool,
}

impl fmt::Display for SceneSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "asset: {} ({})", self.asset.name, self.asset.url)?;
        writeln!(
            f,
            "remote: {} | load: {:?} {}% {}",
            if self.remote_ready { "ready" } else { "waiting" },
            self.loading.asset_load_state,
            self.loading.progress,
            self.loading.activity_text
        )?;
        write!(f, "{}", self.tree)?;
        if self.selection.is_empty() {
            writeln!(f, "selection: none")
        } else {
            writeln!(f, "selection: {}", self.selection.join(", "))
        }
    }
}
