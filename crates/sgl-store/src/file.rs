//! Directory-backed block store: one file per stream.
//!
//! Layout: `{root}/{dataset_id}/{stream_type}/{name}`. Writes go to a
//! temporary sibling and are renamed into place, so a reader never sees a
//! half-written stream.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sgl_error::{Result, SubgridError};
use sgl_types::GranuleRef;
use tracing::{debug, info};

use crate::{BlockStore, StreamKey, StreamRead, granules_for};

/// Block store rooted at a filesystem directory.
///
/// Granule indices are write sequence numbers for this handle; the file
/// system, not the index, locates a stream.
#[derive(Debug)]
pub struct FileBlockStore {
    root: PathBuf,
    next_granule: Mutex<u32>,
}

impl FileBlockStore {
    /// Open (creating if needed) a store under `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| SubgridError::StorageWrite {
            key: root.display().to_string(),
            detail: err.to_string(),
        })?;
        info!(root = %root.display(), "opened file block store");
        Ok(Self {
            root,
            next_granule: Mutex::new(0),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path holding the stream for `key`.
    #[must_use]
    pub fn path_for(&self, key: &StreamKey) -> PathBuf {
        self.root
            .join(key.dataset_id.to_string())
            .join(key.stream_type.as_str())
            .join(&key.name)
    }

    fn allocate(&self, key: &StreamKey, len: usize) -> Result<GranuleRef> {
        let count = granules_for(len);
        let mut next = self.next_granule.lock();
        let granule = GranuleRef {
            index: *next,
            count,
        };
        *next = next
            .checked_add(count)
            .ok_or_else(|| SubgridError::StorageWrite {
                key: key.to_string(),
                detail: "granule space exhausted".to_owned(),
            })?;
        Ok(granule)
    }

    fn read_now(&self, key: &StreamKey, granule_hint: Option<GranuleRef>) -> Result<StreamRead> {
        let path = self.path_for(key);
        let bytes = fs::read(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                SubgridError::NotFound {
                    key: key.to_string(),
                }
            } else {
                SubgridError::StorageRead {
                    key: key.to_string(),
                    detail: err.to_string(),
                }
            }
        })?;
        let count = granules_for(bytes.len());
        let granule = match granule_hint {
            Some(hint) if hint.count == count => hint,
            _ => GranuleRef { index: 0, count },
        };
        debug!(%key, len = bytes.len(), "read stream file");
        Ok(StreamRead { bytes, granule })
    }

    fn write_now(&self, key: &StreamKey, bytes: &[u8]) -> Result<GranuleRef> {
        let path = self.path_for(key);
        let write_err = |err: std::io::Error| SubgridError::StorageWrite {
            key: key.to_string(),
            detail: err.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes).map_err(write_err)?;
        fs::rename(&staging, &path).map_err(write_err)?;
        let granule = self.allocate(key, bytes.len())?;
        debug!(%key, len = bytes.len(), %granule, "wrote stream file");
        Ok(granule)
    }

    fn remove_now(&self, key: &StreamKey) -> Result<bool> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(SubgridError::StorageWrite {
                key: key.to_string(),
                detail: err.to_string(),
            }),
        }
    }
}

impl BlockStore for FileBlockStore {
    async fn read_stream(
        &self,
        key: &StreamKey,
        granule_hint: Option<GranuleRef>,
    ) -> Result<StreamRead> {
        self.read_now(key, granule_hint)
    }

    async fn write_stream(&self, key: &StreamKey, bytes: Vec<u8>) -> Result<GranuleRef> {
        self.write_now(key, &bytes)
    }

    async fn remove_stream(&self, key: &StreamKey) -> Result<bool> {
        self.remove_now(key)
    }
}
