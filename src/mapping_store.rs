use std::sync::Arc;

use rearch::CapsuleHandle;
use time::OffsetDateTime;
use tracing::{debug, instrument};

use crate::{
    kv::{self, KeyValueStore, key_value_store_capsule},
    model::{Mappings, ShortCode, UrlRecord},
};

/// Key of the blob holding the whole mapping table.
pub const MAPPINGS_KEY: &str = "urlMappings";

pub fn mapping_store_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn MappingStore> {
    let kv = Arc::clone(get.as_ref(key_value_store_capsule));
    Arc::new(KvMappingStore::new(kv))
}

/// The short code → [`UrlRecord`] table.
///
/// Expired records are still returned by every lookup;
/// callers decide what expiry means via [`UrlRecord::is_expired_at`].
pub trait MappingStore: Send + Sync {
    fn get_all(&self) -> anyhow::Result<Mappings>;
    fn exists(&self, code: &str) -> anyhow::Result<bool>;
    fn get(&self, code: &str) -> anyhow::Result<Option<UrlRecord>>;

    /// Inserts or overwrites the record stored under `code`.
    fn save(&self, code: &ShortCode, record: UrlRecord) -> anyhow::Result<()>;

    /// Returns whether a record was removed.
    fn remove(&self, code: &str) -> anyhow::Result<bool>;

    /// Counts one click on `code` right now.
    /// Returns `false`, leaving the table untouched, if `code` does not exist.
    fn increment_click(&self, code: &str) -> anyhow::Result<bool>;

    /// Removes every record that has expired as of `now`, returning how many were removed.
    fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<usize>;
}

#[cfg(test)]
mockall::mock! {
    pub MappingStore {}

    impl MappingStore for MappingStore {
        fn get_all(&self) -> anyhow::Result<Mappings>;
        fn exists(&self, code: &str) -> anyhow::Result<bool>;
        fn get(&self, code: &str) -> anyhow::Result<Option<UrlRecord>>;
        fn save(&self, code: &ShortCode, record: UrlRecord) -> anyhow::Result<()>;
        fn remove(&self, code: &str) -> anyhow::Result<bool>;
        fn increment_click(&self, code: &str) -> anyhow::Result<bool>;
        fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<usize>;
    }
}

/// A [`MappingStore`] that keeps the table as one JSON blob in a [`KeyValueStore`].
///
/// Every operation loads the entire table, mutates it, and writes it back.
pub struct KvMappingStore {
    kv: Arc<dyn KeyValueStore>,
}

impl KvMappingStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn load(&self) -> anyhow::Result<Mappings> {
        kv::load_json(self.kv.as_ref(), MAPPINGS_KEY)
    }

    fn store(&self, mappings: &Mappings) -> anyhow::Result<()> {
        kv::store_json(self.kv.as_ref(), MAPPINGS_KEY, mappings)
    }
}

impl MappingStore for KvMappingStore {
    fn get_all(&self) -> anyhow::Result<Mappings> {
        self.load()
    }

    fn exists(&self, code: &str) -> anyhow::Result<bool> {
        Ok(self.load()?.contains_key(code))
    }

    fn get(&self, code: &str) -> anyhow::Result<Option<UrlRecord>> {
        Ok(self.load()?.remove(code))
    }

    #[instrument(skip(self, record))]
    fn save(&self, code: &ShortCode, record: UrlRecord) -> anyhow::Result<()> {
        let mut mappings = self.load()?;
        mappings.insert(code.clone(), record);
        self.store(&mappings)
    }

    #[instrument(skip(self))]
    fn remove(&self, code: &str) -> anyhow::Result<bool> {
        let mut mappings = self.load()?;
        if mappings.remove(code).is_none() {
            return Ok(false);
        }
        self.store(&mappings)?;
        Ok(true)
    }

    #[instrument(skip(self))]
    fn increment_click(&self, code: &str) -> anyhow::Result<bool> {
        let mut mappings = self.load()?;
        let Some(record) = mappings.get_mut(code) else {
            debug!("Ignoring click on unknown code");
            return Ok(false);
        };
        record.record_click(OffsetDateTime::now_utc());
        self.store(&mappings)?;
        Ok(true)
    }

    #[instrument(skip(self))]
    fn purge_expired(&self, now: OffsetDateTime) -> anyhow::Result<usize> {
        let mut mappings = self.load()?;
        let before = mappings.len();
        mappings.retain(|_, record| !record.is_expired_at(now));
        let purged = before - mappings.len();
        if purged > 0 {
            self.store(&mappings)?;
        }
        Ok(purged)
    }
}
