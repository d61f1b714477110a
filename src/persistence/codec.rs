//! Value encoding for the typed store API.
//!
//! Byte values go through [`CacheStore`](super::CacheStore) untouched. Typed
//! values are JSON, so unsigned integers are stored as plain decimal text and
//! stay usable as counters.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use super::{CacheError, CacheResult};

pub fn encode<T>(value: &T) -> CacheResult<Bytes>
where
    T: Serialize + ?Sized,
{
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub fn decode<T>(bytes: &[u8]) -> CacheResult<T>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_slice(bytes)?)
}

/// Parses a stored counter. Surrounding ASCII whitespace is ignored.
pub(crate) fn parse_counter(key: &str, bytes: &[u8]) -> CacheResult<u64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| CacheError::NotNumeric {
            key: key.to_owned(),
        })
}
