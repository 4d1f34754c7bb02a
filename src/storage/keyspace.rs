//! In-memory keyspace
//!
//! A single keyspace guarded by an RwLock, shared between the event loop
//! and the replica link thread. Expired entries are treated as absent on
//! read; a GET reaps the entry it hit and the periodic sweep catches the
//! rest.

use crate::error::{CommandError, Result};
use crate::storage::stream::{AppendId, StreamEntry, StreamId, StreamLog};
use crate::storage::value::{now_ms, StoredValue, Value, ValueType};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Shared key-value store
pub struct Store {
    data: RwLock<HashMap<Vec<u8>, StoredValue>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Set a key, replacing any existing value and its expiry
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<()> {
        let stored = match ttl_ms {
            Some(ttl) => StoredValue::with_ttl(Value::String(value), ttl),
            None => StoredValue::new(Value::String(value)),
        };
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.insert(key, stored);
        Ok(())
    }

    /// Insert a value with an absolute expiry, used when loading a snapshot.
    /// Entries already expired at load time are skipped.
    pub fn restore(&self, key: Vec<u8>, value: Value, expires_at_ms: Option<u64>) -> Result<()> {
        let stored = StoredValue::with_expiry_at(value, expires_at_ms);
        if stored.is_expired() {
            return Ok(());
        }
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.insert(key, stored);
        Ok(())
    }

    /// Get a string value. Returns Ok(None) for missing keys. An expired
    /// entry is removed on the spot rather than waiting for the sweep.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let data = self.data.read().map_err(|_| poisoned())?;
            match data.get(key) {
                Some(stored) if !stored.is_expired() => {
                    return match &stored.value {
                        Value::String(bytes) => Ok(Some(bytes.clone())),
                        _ => Err(CommandError::WrongType.into()),
                    };
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // The entry expired; re-check under the write lock and reap it
        let mut data = self.data.write().map_err(|_| poisoned())?;
        if data.get(key).map(|s| s.is_expired()).unwrap_or(false) {
            data.remove(key);
        }
        Ok(None)
    }

    /// Increment a string value holding an integer; missing keys start at 0
    pub fn incr(&self, key: &[u8]) -> Result<i64> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        match data.get_mut(key) {
            Some(stored) if !stored.is_expired() => {
                let current = match &stored.value {
                    Value::String(_) => stored
                        .value
                        .as_integer()
                        .ok_or(CommandError::NotInteger)?,
                    _ => return Err(CommandError::WrongType.into()),
                };
                let next = current.checked_add(1).ok_or(CommandError::NotInteger)?;
                stored.value = Value::String(next.to_string().into_bytes());
                Ok(next)
            }
            _ => {
                data.insert(key.to_vec(), StoredValue::new(Value::string("1")));
                Ok(1)
            }
        }
    }

    /// Delete keys, returning how many existed
    pub fn del(&self, keys: &[Vec<u8>]) -> Result<i64> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let mut removed = 0;
        for key in keys {
            match data.remove(key.as_slice()) {
                Some(stored) if !stored.is_expired() => removed += 1,
                _ => {}
            }
        }
        Ok(removed)
    }

    /// Type of the value at key, if any
    pub fn value_type(&self, key: &[u8]) -> Result<Option<ValueType>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        match data.get(key) {
            Some(stored) if !stored.is_expired() => Ok(Some(stored.value.value_type())),
            _ => Ok(None),
        }
    }

    /// All live keys. Only the `*` pattern is supported.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data
            .iter()
            .filter(|(_, stored)| !stored.is_expired())
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Append to a list, creating it if absent. Returns the new length.
    pub fn rpush(&self, key: &[u8], values: Vec<Vec<u8>>) -> Result<i64> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let stored = data
            .entry(key.to_vec())
            .or_insert_with(|| StoredValue::new(Value::empty_list()));
        if stored.is_expired() {
            *stored = StoredValue::new(Value::empty_list());
        }
        match &mut stored.value {
            Value::List(list) => {
                list.extend(values);
                Ok(list.len() as i64)
            }
            _ => Err(CommandError::WrongType.into()),
        }
    }

    /// Slice of a list with Redis-style index semantics: negative indexes
    /// count from the tail, out-of-range bounds clamp, inverted ranges are
    /// empty. A missing key is an empty list.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        let list: &VecDeque<Vec<u8>> = match data.get(key) {
            Some(stored) if !stored.is_expired() => match &stored.value {
                Value::List(list) => list,
                _ => return Err(CommandError::WrongType.into()),
            },
            _ => return Ok(Vec::new()),
        };

        let len = list.len() as i64;
        let start = clamp_index(start, len);
        let stop = clamp_index(stop, len);
        if start > stop || start >= len {
            return Ok(Vec::new());
        }

        let stop = stop.min(len - 1);
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    /// Append an entry to a stream, creating the stream if absent
    pub fn xadd(
        &self,
        key: &[u8],
        id: AppendId,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<StreamId> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let stored = data
            .entry(key.to_vec())
            .or_insert_with(|| StoredValue::new(Value::empty_stream()));
        if stored.is_expired() {
            *stored = StoredValue::new(Value::empty_stream());
        }
        match &mut stored.value {
            Value::Stream(log) => Ok(log.append(id, fields)?),
            _ => Err(CommandError::WrongType.into()),
        }
    }

    /// Inclusive stream range. A missing key yields no entries.
    pub fn xrange(&self, key: &[u8], start: StreamId, end: StreamId) -> Result<Vec<StreamEntry>> {
        self.with_stream(key, |log| log.range(start, end))
    }

    /// Stream entries strictly after `after`
    pub fn xread_after(&self, key: &[u8], after: StreamId) -> Result<Vec<StreamEntry>> {
        self.with_stream(key, |log| log.read_after(after))
    }

    /// Last id of the stream at key; 0-0 if the key is missing or empty
    pub fn stream_last_id(&self, key: &[u8]) -> Result<StreamId> {
        let data = self.data.read().map_err(|_| poisoned())?;
        match data.get(key) {
            Some(stored) if !stored.is_expired() => match &stored.value {
                Value::Stream(log) => Ok(log.last_id()),
                _ => Err(CommandError::WrongType.into()),
            },
            _ => Ok(StreamId::zero()),
        }
    }

    fn with_stream<F, T>(&self, key: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&StreamLog) -> T,
        T: Default,
    {
        let data = self.data.read().map_err(|_| poisoned())?;
        match data.get(key) {
            Some(stored) if !stored.is_expired() => match &stored.value {
                Value::Stream(log) => Ok(f(log)),
                _ => Err(CommandError::WrongType.into()),
            },
            _ => Ok(T::default()),
        }
    }

    /// Remove entries whose expiry has passed. Returns the number reaped.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let before = data.len();
        data.retain(|_, stored| match stored.expires_at_ms {
            Some(at) => now < at,
            None => true,
        });
        Ok(before - data.len())
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data
            .read()
            .map(|data| data.values().filter(|s| !s.is_expired()).count())
            .unwrap_or(0)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> crate::error::RubidiumError {
    crate::error::RubidiumError::Internal("keyspace lock poisoned".into())
}

fn clamp_index(index: i64, len: i64) -> i64 {
    if index < 0 {
        (len + index).max(0)
    } else {
        index
    }
}
