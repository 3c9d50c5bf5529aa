use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What was on screen last, so a restarted player can pick up where it left.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    pub last_cycle_id: Option<String>,
    pub last_asset_id: Option<String>,
}

pub struct StateManager {
    state: PersistentState,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let state = Self::load_persistent(&state_file);
        Self { state, state_file }
    }

    pub fn get_state(&self) -> &PersistentState {
        &self.state
    }

    /// The asset to resume at, if the last run was presenting `cycle_id`.
    pub fn resume_asset(&self, cycle_id: &str) -> Option<&str> {
        if self.state.last_cycle_id.as_deref() == Some(cycle_id) {
            self.state.last_asset_id.as_deref()
        } else {
            None
        }
    }

    pub async fn set_presented(&mut self, cycle_id: &str, asset_id: &str) -> anyhow::Result<()> {
        self.state.last_cycle_id = Some(cycle_id.to_string());
        self.state.last_asset_id = Some(asset_id.to_string());
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&self.state)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return persistent;
            }
        }
        PersistentState::default()
    }
}
