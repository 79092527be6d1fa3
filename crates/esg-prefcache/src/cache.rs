//! ClientPreferenceCache — durable per-user table preferences on the client.
//!
//! Blobs are JSON values in a single redb table. A table's preferences are
//! stored in field-ID space once its field mapping is known and in
//! field-name space until then; mappings are fetched in the background and
//! never block a save.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use esg_core::types::TableFieldMapping;
use esg_prefs::{Clock, system_clock};

use crate::error::{CacheError, CacheResult};
use crate::migration::{
    KeySpace, TablePreferences, convert_preferences_from_field_ids,
    convert_preferences_to_field_ids, transition,
};
use crate::remote::{MappingFetcher, PreferenceSync};
use crate::tables::{BLOBS, mapping_key, prefs_key};

macro_rules! map_err {
    ($variant:ident) => {
        |e| CacheError::$variant(e.to_string())
    };
}

/// Age after which a cached mapping is reported as stale.
pub const MAPPING_MAX_AGE_DAYS: i64 = 7;

/// A cached value, tagged with whether it is past its soft expiry.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead<T> {
    Fresh(T),
    Stale(T),
}

impl<T> CacheRead<T> {
    pub fn is_stale(&self) -> bool {
        matches!(self, CacheRead::Stale(_))
    }

    pub fn get(&self) -> &T {
        match self {
            CacheRead::Fresh(value) | CacheRead::Stale(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            CacheRead::Fresh(value) | CacheRead::Stale(value) => value,
        }
    }
}

/// One user's preference cache. Clones share the database.
#[derive(Clone)]
pub struct ClientPreferenceCache {
    db: Arc<Database>,
    user_id: Arc<str>,
    fetcher: Option<Arc<dyn MappingFetcher>>,
    remote: Option<Arc<dyn PreferenceSync>>,
    /// Tables with a background mapping fetch in progress.
    in_flight: Arc<Mutex<HashSet<String>>>,
    clock: Clock,
}

impl ClientPreferenceCache {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path, user_id: &str) -> CacheResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let cache = Self::with_db(db, user_id);
        cache.ensure_tables()?;
        debug!(?path, %user_id, "preference cache opened");
        Ok(cache)
    }

    /// Create an ephemeral in-memory cache (for testing).
    pub fn open_in_memory(user_id: &str) -> CacheResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let cache = Self::with_db(db, user_id);
        cache.ensure_tables()?;
        debug!(%user_id, "in-memory preference cache opened");
        Ok(cache)
    }

    fn with_db(db: Database, user_id: &str) -> Self {
        Self {
            db: Arc::new(db),
            user_id: Arc::from(user_id),
            fetcher: None,
            remote: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            clock: system_clock(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn MappingFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_remote(mut self, remote: Arc<dyn PreferenceSync>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn ensure_tables(&self) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(BLOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Blob storage ───────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, keys: &[String]) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            for key in keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Mappings ───────────────────────────────────────────────────

    /// The cached mapping of `table_id`, stale after seven days.
    pub fn mapping(&self, table_id: &str) -> CacheResult<Option<CacheRead<TableFieldMapping>>> {
        let Some(mapping) = self.get_json::<TableFieldMapping>(&mapping_key(table_id))? else {
            return Ok(None);
        };
        let max_age = chrono::Duration::days(MAPPING_MAX_AGE_DAYS);
        if mapping.is_older_than(max_age, (self.clock)()) {
            Ok(Some(CacheRead::Stale(mapping)))
        } else {
            Ok(Some(CacheRead::Fresh(mapping)))
        }
    }

    pub fn store_mapping(&self, mapping: &TableFieldMapping) -> CacheResult<()> {
        self.put_json(&mapping_key(&mapping.table_id), mapping)?;
        debug!(table_id = %mapping.table_id, fields = mapping.fields.len(), "field mapping cached");
        Ok(())
    }

    /// Fetch the mapping now and cache it. `None` when the server has none
    /// or no fetcher is configured.
    pub async fn refresh_mapping(&self, table_id: &str) -> CacheResult<Option<TableFieldMapping>> {
        let Some(fetcher) = self.fetcher.as_ref() else {
            debug!(%table_id, "no mapping fetcher configured");
            return Ok(None);
        };
        let mapping = fetcher.fetch_mapping(table_id).await?;
        match mapping.as_ref() {
            Some(mapping) => self.store_mapping(mapping)?,
            None => debug!(%table_id, "no field mapping available"),
        }
        Ok(mapping)
    }

    /// Start a mapping fetch for `table_id` unless one is already running.
    fn spawn_mapping_fetch(&self, table_id: &str) {
        if self.fetcher.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(%table_id, "no runtime, skipping background mapping fetch");
            return;
        };
        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !in_flight.insert(table_id.to_string()) {
                return;
            }
        }
        let cache = self.clone();
        let table_id = table_id.to_string();
        handle.spawn(async move {
            if let Err(e) = cache.refresh_mapping(&table_id).await {
                warn!(%table_id, error = %e, "background mapping fetch failed");
            }
            cache
                .in_flight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&table_id);
        });
    }

    // ── Preferences ────────────────────────────────────────────────

    /// Persist `prefs` (keyed by field name) for `table_id`.
    ///
    /// Returns the blob as stored, which is in field-ID space when a mapping
    /// is cached.
    pub fn save(&self, table_id: &str, prefs: &TablePreferences) -> CacheResult<TablePreferences> {
        let mapping = self.mapping(table_id)?;
        if mapping.as_ref().is_some_and(CacheRead::is_stale) {
            debug!(%table_id, "saving with a stale field mapping");
        }

        let mut input = prefs.clone();
        input.using_field_ids = false;
        let stored = match (transition(input.key_space(), mapping.is_some()), mapping) {
            (KeySpace::FieldIds, Some(mapping)) => {
                convert_preferences_to_field_ids(&input, mapping.get())
            }
            _ => {
                self.spawn_mapping_fetch(table_id);
                input
            }
        };

        self.put_json(&prefs_key(table_id), &stored)?;
        info!(%table_id, using_field_ids = stored.using_field_ids, "table preferences saved");
        self.spawn_push(table_id, &stored);
        Ok(stored)
    }

    /// Load preferences for `table_id`, keyed by field name.
    pub fn load(&self, table_id: &str) -> CacheResult<Option<TablePreferences>> {
        let Some(stored) = self.get_json::<TablePreferences>(&prefs_key(table_id))? else {
            return Ok(None);
        };
        if stored.key_space() == KeySpace::FieldNames {
            return Ok(Some(stored));
        }
        match self.mapping(table_id)? {
            Some(mapping) => Ok(Some(convert_preferences_from_field_ids(&stored, mapping.get()))),
            None => {
                warn!(%table_id, "preferences stored by field ID but no mapping is cached");
                self.spawn_mapping_fetch(table_id);
                Ok(Some(stored))
            }
        }
    }

    /// Forget the preferences and mapping of `table_id`.
    pub fn clear(&self, table_id: &str) -> CacheResult<()> {
        self.remove(&[prefs_key(table_id), mapping_key(table_id)])?;
        debug!(%table_id, "table cache cleared");
        Ok(())
    }

    fn spawn_push(&self, table_id: &str, stored: &TablePreferences) {
        let Some(remote) = self.remote.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(%table_id, "no runtime, skipping preference push");
            return;
        };
        let user_id = self.user_id.clone();
        let table_id = table_id.to_string();
        let stored = stored.clone();
        handle.spawn(async move {
            if let Err(e) = remote.push(&user_id, &table_id, &stored).await {
                warn!(%table_id, error = %e, "preference push failed");
            }
        });
    }

    /// Replace the local blob with the remote copy, then load it.
    pub async fn pull_remote(&self, table_id: &str) -> CacheResult<Option<TablePreferences>> {
        let Some(remote) = self.remote.as_ref() else {
            return self.load(table_id);
        };
        match remote.pull(&self.user_id, table_id).await? {
            Some(blob) => {
                self.put_json(&prefs_key(table_id), &blob)?;
                debug!(%table_id, "remote preferences pulled");
            }
            None => debug!(%table_id, "no remote preferences"),
        }
        self.load(table_id)
    }
}
