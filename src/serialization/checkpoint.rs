//! Periodic graph archives written during training.

use super::{Archive, SerializationError};
use crate::train::{EpochEnd, Listener};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, SerializationError>;

const PREFIX: &str = "checkpoint_epoch";
const EXTENSION: &str = "sdz";

/// Parses `checkpoint_epoch<E>_iter<I>.sdz`.
fn parse_name(path: &Path) -> Option<(usize, usize)> {
    if path.extension()? != EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (epoch, iteration) = stem.strip_prefix(PREFIX)?.split_once("_iter")?;
    Some((epoch.parse().ok()?, iteration.parse().ok()?))
}

/// Writes archives into one directory and keeps only the newest ones.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    pub base_dir: PathBuf,
    /// Number of archives kept; `0` keeps every archive.
    pub max_to_keep: usize,
}

impl CheckpointManager {
    pub fn new(base_dir: impl AsRef<Path>, max_to_keep: usize) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            max_to_keep,
        }
    }

    pub fn path_for(&self, epoch: usize, iteration: usize) -> PathBuf {
        self.base_dir.join(format!("{PREFIX}{epoch}_iter{iteration}.{EXTENSION}"))
    }

    /// Writes `archive` and removes the oldest archives beyond `max_to_keep`.
    pub fn save(&self, archive: &Archive, epoch: usize, iteration: usize) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir)?;
        let path = self.path_for(epoch, iteration);
        archive.save(&path)?;
        info!(path = %path.display(), "checkpoint saved");

        if self.max_to_keep > 0 {
            let existing = self.checkpoints()?;
            let excess = existing.len().saturating_sub(self.max_to_keep);
            for old in &existing[..excess] {
                debug!(path = %old.display(), "removing old checkpoint");
                fs::remove_file(old)?;
            }
        }
        Ok(path)
    }

    /// Existing archives, oldest first.
    pub fn checkpoints(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut found: Vec<((usize, usize), PathBuf)> = fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| parse_name(&path).map(|key| (key, path)))
            .collect();
        found.sort();
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    pub fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.checkpoints()?.pop())
    }

    pub fn load_latest(&self, with_updater: bool) -> Result<Option<Archive>> {
        match self.latest()? {
            Some(path) => Ok(Some(Archive::load(path, with_updater)?)),
            None => Ok(None),
        }
    }
}

/// Saves an archive every `frequency` epochs through a [`CheckpointManager`].
#[derive(Debug, Clone)]
pub struct CheckpointListener {
    manager: CheckpointManager,
    frequency: usize,
    save_updater: bool,
}

impl CheckpointListener {
    pub fn new(manager: CheckpointManager, frequency: usize) -> Self {
        Self {
            manager,
            frequency: frequency.max(1),
            save_updater: true,
        }
    }

    pub fn with_updater_state(mut self, save_updater: bool) -> Self {
        self.save_updater = save_updater;
        self
    }
}

impl Listener for CheckpointListener {
    fn epoch_end(&mut self, state: &EpochEnd<'_>) -> crate::Result<()> {
        if (state.epoch + 1) % self.frequency != 0 {
            return Ok(());
        }
        let archive = Archive {
            graph: state.graph.clone(),
            loss_variables: state.loss_variables.to_vec(),
            training_config: Some(state.config.clone()),
            updater_state: if self.save_updater {
                state.updater.map(|u| u.state())
            } else {
                None
            },
        };
        self.manager.save(&archive, state.epoch, state.iteration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn names_parse_back() {
        let manager = CheckpointManager::new("ckpt", 2);
        let path = manager.path_for(3, 120);
        assert_eq!(path, Path::new("ckpt").join("checkpoint_epoch3_iter120.sdz"));
        assert_eq!(parse_name(&path), Some((3, 120)));
        assert_eq!(parse_name(Path::new("checkpoint_epoch3_iter120.json")), None);
        assert_eq!(parse_name(Path::new("model.sdz")), None);
    }

    #[test]
    fn keeps_only_newest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path(), 2);
        let archive = Archive {
            graph: Graph::new(),
            loss_variables: vec![],
            training_config: None,
            updater_state: None,
        };
        for epoch in 0..4 {
            manager.save(&archive, epoch, epoch * 10).unwrap();
        }
        let kept = manager.checkpoints().unwrap();
        assert_eq!(kept, vec![manager.path_for(2, 20), manager.path_for(3, 30)]);
        assert_eq!(manager.latest().unwrap(), Some(manager.path_for(3, 30)));
    }
}
