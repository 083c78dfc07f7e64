//! Record encoding.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{FsError, FsResult};

/// Encode a record for the substrate.
pub(crate) fn encode<T: Serialize>(value: &T) -> FsResult<Vec<u8>> {
    Ok(postcard::to_allocvec(value)?)
}

/// Decode a record read from `key`.
///
/// A record that does not decode means the store holds something this engine
/// never wrote there, which is reported as an inconsistency.
pub(crate) fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> FsResult<T> {
    postcard::from_bytes(bytes).map_err(|e| {
        FsError::inconsistent(format!(
            "undecodable record at {}: {e}",
            String::from_utf8_lossy(key)
        ))
    })
}
