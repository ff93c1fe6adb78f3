use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::batch_error;
use crate::coordinator::UnitId;
use crate::error::{BatchError, BatchResult, ErrorKind};
use crate::hooks::lookup::BulkLoader;
use crate::hooks::mutation::{BulkWriter, RowFailure, WriteReport};

/// Row mutation understood by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMutation<K, V> {
    /// Inserts a new row. Fails with [`ErrorKind::Conflict`] if the key exists.
    Insert(K, V),
    /// Replaces an existing row. Fails with [`ErrorKind::NotFound`] if the key is missing.
    Update(K, V),
    /// Deletes an existing row. Fails with [`ErrorKind::NotFound`] if the key is missing.
    Delete(K),
}

#[derive(Debug)]
struct Inner<K, V> {
    rows: HashMap<K, V>,
    load_calls: usize,
    write_calls: usize,
}

/// In-memory keyed store implementing [`BulkLoader`] and [`BulkWriter`].
///
/// Every bulk call is counted, which makes the store handy to check that lookups and writes
/// of a whole cohort were coalesced. Row failures of a write do not prevent the other rows
/// from being applied.
#[derive(Clone)]
pub struct MemoryStore<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> MemoryStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Creates an empty [`MemoryStore`].
    pub fn new() -> Self {
        Self::with_rows(std::iter::empty())
    }

    /// Creates a [`MemoryStore`] holding `rows`.
    pub fn with_rows(rows: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                rows: rows.into_iter().collect(),
                load_calls: 0,
                write_calls: 0,
            })),
        }
    }

    /// Returns the row stored under `key`.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().await.rows.get(key).cloned()
    }

    /// Returns the number of stored rows.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.rows.len()
    }

    /// Returns how many times [`BulkLoader::load`] was called.
    pub async fn load_calls(&self) -> usize {
        self.inner.lock().await.load_calls
    }

    /// Returns how many times [`BulkWriter::write`] was called.
    pub async fn write_calls(&self) -> usize {
        self.inner.lock().await.write_calls
    }
}

impl<K, V> Default for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for MemoryStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl<K, V> BulkLoader for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Key = K;
    type Value = V;

    async fn load(&self, keys: Vec<K>) -> BatchResult<HashMap<K, V>> {
        let mut inner = self.inner.lock().await;
        inner.load_calls += 1;

        debug!(keys = keys.len(), "loading rows from memory store");

        Ok(keys
            .into_iter()
            .filter_map(|key| inner.rows.get(&key).cloned().map(|value| (key, value)))
            .collect())
    }
}

impl<K, V> BulkWriter for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Mutation = RowMutation<K, V>;

    async fn write(&self, mutations: Vec<(UnitId, RowMutation<K, V>)>) -> BatchResult<WriteReport> {
        let mut inner = self.inner.lock().await;
        inner.write_calls += 1;

        debug!(rows = mutations.len(), "writing rows to memory store");

        let mut report = WriteReport::default();
        for (unit, mutation) in mutations {
            let outcome = match mutation {
                RowMutation::Insert(key, value) => {
                    if inner.rows.contains_key(&key) {
                        Err(row_error(ErrorKind::Conflict, "Row already exists", &key))
                    } else {
                        inner.rows.insert(key, value);
                        Ok(())
                    }
                }
                RowMutation::Update(key, value) => match inner.rows.get_mut(&key) {
                    Some(row) => {
                        *row = value;
                        Ok(())
                    }
                    None => Err(row_error(ErrorKind::NotFound, "Row not found", &key)),
                },
                RowMutation::Delete(key) => match inner.rows.remove(&key) {
                    Some(_) => Ok(()),
                    None => Err(row_error(ErrorKind::NotFound, "Row not found", &key)),
                },
            };

            match outcome {
                Ok(()) => report.applied += 1,
                Err(error) => report.failures.push(RowFailure { unit, error }),
            }
        }

        Ok(report)
    }
}

fn row_error<K: fmt::Debug>(kind: ErrorKind, description: &'static str, key: &K) -> BatchError {
    batch_error!(kind, description, detail = format!("{key:?}"))
}
