use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::batch_error;
use crate::coordinator::{CohortView, PhaseHook, UnitId};
use crate::error::{BatchResult, ErrorKind};

/// Store able to fetch many rows by key in a single round trip.
pub trait BulkLoader {
    /// Key a row is fetched by.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    /// Row returned for a key.
    type Value: Clone + Send + Sync + 'static;

    /// Loads every row matching `keys`.
    ///
    /// Keys without a matching row are simply absent from the returned map. `keys` never
    /// contains duplicates.
    fn load(
        &self,
        keys: Vec<Self::Key>,
    ) -> impl Future<Output = BatchResult<HashMap<Self::Key, Self::Value>>> + Send;
}

/// Per-unit table of by-key lookups, embedded in the unit context.
///
/// A unit registers the keys it needs with [`LookupTable::request`], calls
/// [`crate::coordinator::PhaseSyncer::phase`], and then reads the values with
/// [`LookupTable::get`].
#[derive(Debug, Clone)]
pub struct LookupTable<K, V> {
    requested: HashSet<K>,
    resolved: HashMap<K, Option<V>>,
}

impl<K, V> LookupTable<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty [`LookupTable`].
    pub fn new() -> Self {
        Self {
            requested: HashSet::new(),
            resolved: HashMap::new(),
        }
    }

    /// Registers `key` for the next bulk lookup. Keys already resolved are not fetched again.
    pub fn request(&mut self, key: K) {
        if !self.resolved.contains_key(&key) {
            self.requested.insert(key);
        }
    }

    /// Returns the looked up value of `key`.
    ///
    /// `Some(Some(value))` when the row was found, `Some(None)` when it was looked up and is
    /// missing, and `None` when the key was never looked up.
    pub fn get(&self, key: &K) -> Option<Option<&V>> {
        self.resolved.get(key).map(Option::as_ref)
    }

    /// Returns `true` if keys are waiting for the next bulk lookup.
    pub fn has_pending(&self) -> bool {
        !self.requested.is_empty()
    }

    fn take_requested(&mut self) -> HashSet<K> {
        std::mem::take(&mut self.requested)
    }

    fn resolve(&mut self, key: K, value: Option<V>) {
        self.resolved.insert(key, value);
    }
}

impl<K, V> Default for LookupTable<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Unit context exposing a [`LookupTable`] to [`KeyedLookupHook`].
pub trait LookupContext<K, V> {
    fn lookups(&mut self) -> &mut LookupTable<K, V>;
}

/// Phase hook resolving the keys registered by every pending unit with one
/// [`BulkLoader::load`] call.
#[derive(Debug, Clone)]
pub struct KeyedLookupHook<L> {
    loader: L,
}

impl<L> KeyedLookupHook<L> {
    /// Creates a new [`KeyedLookupHook`] backed by `loader`.
    pub fn new(loader: L) -> Self {
        Self { loader }
    }

    /// Returns the underlying loader.
    pub fn loader(&self) -> &L {
        &self.loader
    }
}

#[async_trait]
impl<C, L> PhaseHook<C> for KeyedLookupHook<L>
where
    C: LookupContext<L::Key, L::Value> + Send + 'static,
    L: BulkLoader + Send + Sync + 'static,
{
    async fn before_phase(&self, cohort: &CohortView<'_, C>) -> BatchResult<()> {
        let mut requests: Vec<(UnitId, HashSet<L::Key>)> = Vec::new();
        let mut keys = HashSet::new();

        for (id, context) in cohort.pending_contexts() {
            let requested = {
                let mut context = context.lock().await;
                context.lookups().take_requested()
            };

            if requested.is_empty() {
                continue;
            }

            keys.extend(requested.iter().cloned());
            requests.push((id, requested));
        }

        if keys.is_empty() {
            return Ok(());
        }

        debug!(
            phase = cohort.phase(),
            keys = keys.len(),
            units = requests.len(),
            "resolving coalesced lookups"
        );

        let rows = match self.loader.load(keys.into_iter().collect()).await {
            Ok(rows) => rows,
            Err(err) => {
                error!(phase = cohort.phase(), error = %err, "bulk lookup failed");
                return Err(batch_error!(
                    ErrorKind::HookFailed,
                    "Bulk lookup failed",
                    detail = format!("phase {}", cohort.phase()),
                    source: err
                ));
            }
        };

        for (id, requested) in requests {
            let Some(context) = cohort.context(id) else {
                continue;
            };

            let mut context = context.lock().await;
            let lookups = context.lookups();
            for key in requested {
                let value = rows.get(&key).cloned();
                lookups.resolve(key, value);
            }
        }

        Ok(())
    }
}
