use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use stack::{ResourceName, ResourceState, StackName, StateBackend, StateError};

/// Version written into every state document.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// On-disk form of one stack's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    pub stack: StackName,
    #[serde(default)]
    pub resources: Vec<ResourceState>,
}

/// State persisted to `<dir>/<stack>.json`.
///
/// The whole document is loaded once and rewritten after every mutation via a
/// temporary file and a rename, so a crash mid-write leaves the previous
/// document intact.
#[derive(Debug)]
pub struct FileStateBackend {
    path: PathBuf,
    stack: StackName,
    records: Mutex<Vec<ResourceState>>,
}

impl FileStateBackend {
    /// Opens the state for `stack` under `dir`, starting empty if no file exists.
    pub async fn open(dir: &Path, stack: &StackName) -> Result<Self, StateError> {
        let path = dir.join(format!("{stack}.json"));
        let records = match fs::read_to_string(&path).await {
            Ok(content) => Self::parse(&path, stack, &content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(StateError::Io { path, source }),
        };

        tracing::debug!(path = %path.display(), resources = records.len(), "opened state");
        Ok(Self {
            path,
            stack: stack.clone(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(path: &Path, stack: &StackName, content: &str) -> Result<Vec<ResourceState>, StateError> {
        let document: StateDocument =
            serde_json::from_str(content).map_err(|e| StateError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if document.version != STATE_FORMAT_VERSION {
            return Err(StateError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("unsupported state version {}", document.version),
            });
        }
        if &document.stack != stack {
            return Err(StateError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("file belongs to stack '{}'", document.stack),
            });
        }
        Ok(document.resources)
    }

    async fn persist(&self, records: &[ResourceState]) -> Result<(), StateError> {
        let io_error = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let document = StateDocument {
            version: STATE_FORMAT_VERSION,
            stack: self.stack.clone(),
            resources: records.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, content).await.map_err(io_error)?;
        fs::rename(&temp, &self.path).await.map_err(io_error)?;
        Ok(())
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn get(&self, name: &ResourceName) -> Result<Option<ResourceState>, StateError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| &r.name == name).cloned())
    }

    async fn put(&self, state: ResourceState) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        super::upsert(&mut records, state);
        self.persist(&records).await
    }

    async fn remove(&self, name: &ResourceName) -> Result<Option<ResourceState>, StateError> {
        let mut records = self.records.lock().await;
        let removed = super::take(&mut records, name);
        if removed.is_some() {
            self.persist(&records).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<ResourceState>, StateError> {
        Ok(self.records.lock().await.clone())
    }
}
