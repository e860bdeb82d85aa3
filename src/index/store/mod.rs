
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::index::{IndexArtifacts, IndexPair};

const CURRENT_FILE: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";
const MANIFEST_FILE: &str = "manifest.json";

/// File-backed persistence for per-project index pairs
///
/// Every write lands in a fresh generation directory; the `CURRENT` pointer
/// is then swapped with a rename, so a reader always sees one complete pair.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

fn write_error(path: &Path, error: &std::io::Error) -> PipelineError {
    PipelineError::index_write(format!("{}: {}", path.display(), error))
}

fn read_error(path: &Path, error: &std::io::Error) -> PipelineError {
    PipelineError::index_unavailable(format!("{}: {}", path.display(), error))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let mut file = File::create(path).map_err(|e| write_error(path, &e))?;
    file.write_all(bytes).map_err(|e| write_error(path, &e))?;
    file.sync_all().map_err(|e| write_error(path, &e))
}

/// Best effort: directories cannot be opened for syncing on every platform
fn sync_dir(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}

impl IndexStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn project_dir(&self, user_id: i64, project_id: i64) -> PathBuf {
        self.root
            .join(format!("user_{user_id}"))
            .join(format!("project_{project_id}"))
    }

    fn generations_dir(&self, user_id: i64, project_id: i64) -> PathBuf {
        self.project_dir(user_id, project_id).join(GENERATIONS_DIR)
    }

    /// Persist `pair` as the project's current index, returning the new generation id
    pub fn write(
        &self,
        user_id: i64,
        project_id: i64,
        pair: &IndexPair,
    ) -> Result<String, PipelineError> {
        let artifacts = pair.to_artifacts()?;
        let project_dir = self.project_dir(user_id, project_id);
        let generations_dir = self.generations_dir(user_id, project_id);
        fs::create_dir_all(&generations_dir).map_err(|e| write_error(&generations_dir, &e))?;

        let previous = self.current_generation(user_id, project_id)?;
        let generation = Uuid::new_v4().to_string();
        let generation_dir = generations_dir.join(&generation);

        if let Err(e) = write_generation(&generation_dir, &artifacts) {
            warn!(
                "Failed to write index generation {}, removing it: {}",
                generation, e
            );
            match fs::remove_dir_all(&generation_dir) {
                Err(cleanup) if cleanup.kind() != ErrorKind::NotFound => warn!(
                    "Failed to remove partial generation {}: {}",
                    generation_dir.display(),
                    cleanup
                ),
                _ => {}
            }
            return Err(e);
        }
        sync_dir(&generations_dir);

        if let Err(e) = swap_current(&project_dir, &generation) {
            let _ = fs::remove_dir_all(&generation_dir);
            return Err(e);
        }

        info!(
            "Stored index generation {} for user {} project {} ({} vectors)",
            generation,
            user_id,
            project_id,
            pair.len()
        );

        self.prune(user_id, project_id, &generation, previous.as_deref());
        Ok(generation)
    }

    /// The generation `CURRENT` points at, if any
    #[inline]
    pub fn current_generation(
        &self,
        user_id: i64,
        project_id: i64,
    ) -> Result<Option<String>, PipelineError> {
        let current_path = self.project_dir(user_id, project_id).join(CURRENT_FILE);
        match fs::read_to_string(&current_path) {
            Ok(contents) => {
                let generation = contents.trim().to_string();
                if Uuid::parse_str(&generation).is_err() {
                    return Err(PipelineError::index_unavailable(format!(
                        "{} does not name a generation",
                        current_path.display()
                    )));
                }
                Ok(Some(generation))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(&current_path, &e)),
        }
    }

    #[inline]
    pub fn exists(&self, user_id: i64, project_id: i64) -> bool {
        matches!(self.current_generation(user_id, project_id), Ok(Some(_)))
    }

    /// Load and verify the project's current index pair
    pub fn read(&self, user_id: i64, project_id: i64) -> Result<IndexPair, PipelineError> {
        let Some(generation) = self.current_generation(user_id, project_id)? else {
            return Err(PipelineError::index_unavailable(format!(
                "no index has been built for project {project_id}"
            )));
        };

        let generation_dir = self.generations_dir(user_id, project_id).join(&generation);
        let read = |name: &str| {
            let path = generation_dir.join(name);
            fs::read(&path).map_err(|e| read_error(&path, &e))
        };

        let artifacts = IndexArtifacts {
            vectors: read(VECTORS_FILE)?,
            chunks: read(CHUNKS_FILE)?,
            manifest: read(MANIFEST_FILE)?,
        };

        let pair = IndexPair::from_artifacts(&artifacts)?;
        debug!(
            "Loaded index generation {} for project {} ({} vectors)",
            generation,
            project_id,
            pair.len()
        );
        Ok(pair)
    }

    /// Delete every persisted generation of the project
    #[inline]
    pub fn remove(&self, user_id: i64, project_id: i64) -> Result<bool, PipelineError> {
        let project_dir = self.project_dir(user_id, project_id);
        match fs::remove_dir_all(&project_dir) {
            Ok(()) => {
                info!("Removed index for user {} project {}", user_id, project_id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(write_error(&project_dir, &e)),
        }
    }

    /// Generation ids present on disk, sorted
    #[inline]
    pub fn generations(&self, user_id: i64, project_id: i64) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.generations_dir(user_id, project_id)) else {
            return Vec::new();
        };
        let mut generations: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        generations.sort();
        generations
    }

    /// Remove every generation except the current one and the one it replaced
    fn prune(&self, user_id: i64, project_id: i64, current: &str, previous: Option<&str>) {
        let generations_dir = self.generations_dir(user_id, project_id);
        for generation in self.generations(user_id, project_id) {
            if generation == current || Some(generation.as_str()) == previous {
                continue;
            }
            let path = generations_dir.join(&generation);
            match fs::remove_dir_all(&path) {
                Ok(()) => debug!("Pruned index generation {}", generation),
                Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
            }
        }
    }
}

fn write_generation(dir: &Path, artifacts: &IndexArtifacts) -> Result<(), PipelineError> {
    fs::create_dir_all(dir).map_err(|e| write_error(dir, &e))?;
    write_synced(&dir.join(VECTORS_FILE), &artifacts.vectors)?;
    write_synced(&dir.join(CHUNKS_FILE), &artifacts.chunks)?;
    // The manifest goes last: a generation without one is never valid
    write_synced(&dir.join(MANIFEST_FILE), &artifacts.manifest)?;
    sync_dir(dir);
    Ok(())
}

fn swap_current(project_dir: &Path, generation: &str) -> Result<(), PipelineError> {
    let temp_path = project_dir.join(format!("{CURRENT_FILE}.tmp"));
    let current_path = project_dir.join(CURRENT_FILE);

    write_synced(&temp_path, generation.as_bytes())?;
    fs::rename(&temp_path, &current_path).map_err(|e| write_error(&current_path, &e))?;
    sync_dir(project_dir);
    Ok(())
}
