//! In-memory block store.

use std::collections::HashMap;

use parking_lot::Mutex;
use sgl_error::{Result, SubgridError};
use sgl_types::GranuleRef;
use tracing::debug;

use crate::{BlockStore, StreamKey, StreamRead, granules_for};

#[derive(Debug, Default)]
struct MemoryState {
    streams: HashMap<StreamKey, (GranuleRef, Vec<u8>)>,
    next_granule: u32,
    fail_reads: bool,
    fail_writes: bool,
}

/// Block store backed by a map. Every write allocates fresh granules, the
/// way an append-only granule file would.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    state: Mutex<MemoryState>,
}

impl MemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.state.lock().streams.len()
    }

    #[must_use]
    pub fn contains(&self, key: &StreamKey) -> bool {
        self.state.lock().streams.contains_key(key)
    }

    /// Make every subsequent read fail with `StorageRead`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Make every subsequent write fail with `StorageWrite`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    fn read_now(&self, key: &StreamKey, granule_hint: Option<GranuleRef>) -> Result<StreamRead> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(SubgridError::StorageRead {
                key: key.to_string(),
                detail: "injected read failure".to_owned(),
            });
        }
        let (granule, bytes) = state.streams.get(key).ok_or_else(|| SubgridError::NotFound {
            key: key.to_string(),
        })?;
        if granule_hint.is_some_and(|hint| hint != *granule) {
            debug!(%key, %granule, "stale granule hint ignored");
        }
        Ok(StreamRead {
            bytes: bytes.clone(),
            granule: *granule,
        })
    }

    fn write_now(&self, key: &StreamKey, bytes: Vec<u8>) -> Result<GranuleRef> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(SubgridError::StorageWrite {
                key: key.to_string(),
                detail: "injected write failure".to_owned(),
            });
        }
        let count = granules_for(bytes.len());
        let granule = GranuleRef {
            index: state.next_granule,
            count,
        };
        state.next_granule = state.next_granule.checked_add(count).ok_or_else(|| {
            SubgridError::StorageWrite {
                key: key.to_string(),
                detail: "granule space exhausted".to_owned(),
            }
        })?;
        state.streams.insert(key.clone(), (granule, bytes));
        Ok(granule)
    }
}

impl BlockStore for MemoryBlockStore {
    async fn read_stream(
        &self,
        key: &StreamKey,
        granule_hint: Option<GranuleRef>,
    ) -> Result<StreamRead> {
        self.read_now(key, granule_hint)
    }

    async fn write_stream(&self, key: &StreamKey, bytes: Vec<u8>) -> Result<GranuleRef> {
        self.write_now(key, bytes)
    }

    async fn remove_stream(&self, key: &StreamKey) -> Result<bool> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(SubgridError::StorageWrite {
                key: key.to_string(),
                detail: "injected write failure".to_owned(),
            });
        }
        Ok(state.streams.remove(key).is_some())
    }
}
