//! Replay journaling
//!
//! Accumulates the lobby data, every per-tick spectator snapshot, and the
//! final results in memory, then writes one composite JSON document when
//! the match finishes. Competitive matches additionally get a sibling
//! `*_results` file with the ranked list and a validity flag.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay file {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("replay I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("replay serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct ReplayJournal {
    path: PathBuf,
    /// Written alongside the replay for competitive (non-sandbox) matches
    results_path: Option<PathBuf>,
    lobby_data: Value,
    game_states: Vec<Value>,
}

impl ReplayJournal {
    /// Open a journal for writing. Refuses to clobber an existing file
    /// unless `overwrite` is set.
    pub fn create(path: &Path, overwrite: bool, competitive: bool) -> Result<Self, ReplayError> {
        if path.exists() && !overwrite {
            return Err(ReplayError::AlreadyExists(path.to_path_buf()));
        }
        let results_path = competitive.then(|| results_path_for(path));
        if let Some(results) = &results_path {
            if results.exists() && !overwrite {
                return Err(ReplayError::AlreadyExists(results.clone()));
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            results_path,
            lobby_data: Value::Null,
            game_states: Vec::new(),
        })
    }

    pub fn record_lobby(&mut self, lobby_data: Value) {
        self.lobby_data = lobby_data;
    }

    /// Append one tick's spectator snapshot
    pub fn record_tick(&mut self, game_state: Value) {
        self.game_states.push(game_state);
    }

    /// Write the composite document and, for competitive matches, the
    /// results file. `valid` is false when any player dropped mid-match.
    pub fn finalize(self, game_end: Value, valid: bool) -> Result<(), ReplayError> {
        let document = json!({
            "lobbyData": self.lobby_data,
            "gameStates": self.game_states,
            "gameEnd": game_end,
        });
        fs::write(&self.path, serde_json::to_string(&document)?)?;
        info!(path = %self.path.display(), ticks = document["gameStates"].as_array().map(Vec::len).unwrap_or(0), "replay written");

        if let Some(results_path) = &self.results_path {
            let results = json!({
                "players": game_end.get("players").cloned().unwrap_or(Value::Null),
                "valid": valid,
            });
            fs::write(results_path, serde_json::to_string(&results)?)?;
            info!(path = %results_path.display(), valid, "results written");
        }
        Ok(())
    }
}

fn results_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "replay".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}_results.{}", stem, ext.to_string_lossy()),
        None => format!("{stem}_results"),
    };
    path.with_file_name(name)
}
