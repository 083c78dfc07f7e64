//! Identifier allocator.
//!
//! A monotonic counter with batch reservation. The high-water mark stored
//! under [`KEY_NEXT_INO`] is always at or above every identifier handed out,
//! so a remount resumes past anything a previous mount could have used.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::codec::{decode, encode};
use crate::error::FsResult;
use crate::store::{KEY_NEXT_INO, KvStore};
use crate::types::Ino;

/// First identifier ever handed out. 0 and 1 are reserved.
pub const FIRST_INO: u64 = 2;

/// Default number of identifiers reserved per persisted high-water update.
pub const DEFAULT_BATCH: u64 = 1024;

#[derive(Debug)]
struct Reservation {
    next: u64,
    ceiling: u64,
}

/// Hands out identifiers that never repeat for the life of the store.
pub struct InoAllocator {
    store: Arc<dyn KvStore>,
    state: Mutex<Reservation>,
    batch: u64,
}

impl std::fmt::Debug for InoAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InoAllocator")
            .field("state", &*self.state.lock())
            .field("batch", &self.batch)
            .finish()
    }
}

impl InoAllocator {
    /// Resume from the high-water mark persisted in `store`.
    pub fn resume(store: Arc<dyn KvStore>, batch: u64) -> FsResult<Self> {
        let key = KEY_NEXT_INO.as_bytes();
        let next = match store.get(key)? {
            Some(bytes) => decode::<u64>(key, &bytes)?.max(FIRST_INO),
            None => FIRST_INO,
        };
        tracing::debug!(next, batch, "resuming ino allocator");
        Ok(Self {
            store,
            // empty reservation: the first allocate persists a new ceiling
            state: Mutex::new(Reservation { next, ceiling: next }),
            batch: batch.max(1),
        })
    }

    /// Hand out a fresh identifier.
    ///
    /// When the current reservation is exhausted, the new ceiling is
    /// persisted before any identifier from it is returned.
    pub fn allocate(&self) -> FsResult<Ino> {
        let mut state = self.state.lock();
        if state.next >= state.ceiling {
            let ceiling = state.next + self.batch;
            self.store.put(KEY_NEXT_INO.as_bytes(), &encode(&ceiling)?)?;
            tracing::debug!(ceiling, "reserved ino batch");
            state.ceiling = ceiling;
        }
        let ino = Ino::new(state.next);
        state.next += 1;
        Ok(ino)
    }

    /// Number of identifiers handed out by this store so far, including
    /// reservations abandoned by earlier mounts.
    pub fn issued(&self) -> u64 {
        self.state.lock().next - FIRST_INO
    }
}
