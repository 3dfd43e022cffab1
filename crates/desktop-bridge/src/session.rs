//! Shell state that outlives a window
//!
//! The selection and view preferences live in one serializable value,
//! loaded at startup and written back after every change and at shutdown.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const MAX_GRID_COLUMNS: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFilter {
    #[default]
    All,
    Video,
    Audio,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub view_mode: ViewMode,
    pub grid_columns: u8,
    pub media_filter: MediaFilter,
    pub sort_order: SortOrder,
    /// Where conversions go when a request names no folder
    pub convert_output_folder: Option<PathBuf>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::Grid,
            grid_columns: 4,
            media_filter: MediaFilter::All,
            sort_order: SortOrder::Newest,
            convert_output_folder: None,
        }
    }
}

impl Preferences {
    fn validate(&self) -> Result<()> {
        if self.grid_columns == 0 || self.grid_columns > MAX_GRID_COLUMNS {
            return Err(BridgeError::BadRequest(format!(
                "gridColumns must be between 1 and {}",
                MAX_GRID_COLUMNS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShellState {
    /// Selected asset ids in the order they were selected
    pub selection: Vec<String>,
    pub preferences: Preferences,
}

/// [`ShellState`] bound to its file
pub struct SessionStore {
    path: PathBuf,
    state: RwLock<ShellState>,
}

impl SessionStore {
    /// Load the saved state; a missing or unreadable file starts fresh
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = ?path, error = %e, "Session file unreadable, using defaults");
                ShellState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ShellState::default(),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read session file, using defaults");
                ShellState::default()
            }
        };
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    pub async fn snapshot(&self) -> ShellState {
        self.state.read().await.clone()
    }

    /// Replace the selection; repeated ids keep their first position
    pub async fn set_selection(&self, ids: Vec<String>) -> Result<ShellState> {
        let mut state = self.state.write().await;
        let mut selection: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if !id.is_empty() && !selection.contains(&id) {
                selection.push(id);
            }
        }
        state.selection = selection;
        write_state(&self.path, &state).await?;
        Ok(state.clone())
    }

    pub async fn update_preferences(&self, preferences: Preferences) -> Result<ShellState> {
        preferences.validate()?;
        let mut state = self.state.write().await;
        state.preferences = preferences;
        write_state(&self.path, &state).await?;
        Ok(state.clone())
    }

    pub async fn save(&self) -> Result<()> {
        let state = self.state.read().await;
        write_state(&self.path, &state).await
    }
}

async fn write_state(path: &Path, state: &ShellState) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = ?path, "Session saved");
    Ok(())
}
