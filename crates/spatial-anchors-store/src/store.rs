//! Count-indexed anchor record store.
//!
//! Records live under contiguous keys `{prefix}0 .. {prefix}{count-1}` with
//! the count itself under a separate key. The backend offers no range
//! queries or transactions, so lookups are linear scans and removal rewrites
//! the whole index.
//!
//! Every mutation is flushed before it returns. If the flush fails, the keys
//! it touched are restored in the backend and the error is returned, so the
//! next successful flush never publishes a write the caller saw fail.

use spatial_anchors_config::{CorruptRecordPolicy, StoreConfig};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::prefs::{KeyValueStore, PrefValue};
use crate::record::AnchorRecord;

/// Prior values of the keys a mutation touched, oldest first.
type Undo = Vec<(String, Option<PrefValue>)>;

/// Durable, ordered mapping from anchor identifier to display name.
///
/// Mutating operations take `&mut self`; the read-count / write-record /
/// write-count sequence of [`append`](Self::append) can therefore never
/// interleave with another mutation.
#[derive(Debug)]
pub struct AnchorPersistenceStore<K> {
    prefs: K,
    config: StoreConfig,
}

impl<K: KeyValueStore> AnchorPersistenceStore<K> {
    /// Store using the default key layout (`numUuids` / `uuid{i}`).
    pub fn new(prefs: K) -> Self {
        Self::with_config(prefs, StoreConfig::default())
    }

    pub fn with_config(prefs: K, config: StoreConfig) -> Self {
        Self { prefs, config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn prefs(&self) -> &K {
        &self.prefs
    }

    /// Direct backend access. Writing record keys through this bypasses the
    /// store's invariants.
    pub fn prefs_mut(&mut self) -> &mut K {
        &mut self.prefs
    }

    pub fn into_prefs(self) -> K {
        self.prefs
    }

    /// Number of stored records; 0 when the counter was never written.
    pub fn count(&self) -> Result<usize> {
        match self.prefs.get_int(&self.config.count_key)? {
            None => Ok(0),
            Some(n) => usize::try_from(n).map_err(|_| StoreError::InvalidCount(n)),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// Write `record` at index `count()` and bump the counter.
    ///
    /// Not idempotent: appending the same record twice stores it twice.
    pub fn append(&mut self, record: &AnchorRecord) -> Result<usize> {
        if !self.prefs.has_key(&self.config.count_key) {
            tracing::debug!(
                "Anchor counter '{}' not found, starting at 0",
                self.config.count_key
            );
        }

        let index = self.count()?;
        let next = i64::try_from(index + 1).map_err(|_| StoreError::InvalidCount(i64::MAX))?;
        let key = self.config.record_key(index);
        let value = record.to_string();

        let mut undo = Undo::new();
        self.record_undo(&mut undo, &key);
        self.record_undo(&mut undo, &self.config.count_key.clone());
        self.prefs.set_string(&key, &value);
        self.prefs.set_int(&self.config.count_key, next);
        self.commit(undo)?;

        tracing::debug!("Saved anchor record '{}' under key '{}'", value, key);
        Ok(index)
    }

    fn read_entry(&self, index: usize) -> Result<AnchorRecord> {
        let value = self
            .prefs
            .get_string(&self.config.record_key(index))?
            .ok_or(StoreError::MissingRecord { index })?;
        value
            .parse()
            .map_err(|source| StoreError::CorruptRecord {
                index,
                value,
                source,
            })
    }

    /// Indices of every record key present in the backend, ascending.
    fn present_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .prefs
            .keys()
            .iter()
            .filter_map(|key| self.config.record_index(key))
            .collect();
        indices.sort_unstable();
        indices
    }

    /// Every stored record, in append order.
    ///
    /// A corrupt or missing entry aborts the read unless the store is
    /// configured with [`CorruptRecordPolicy::Skip`].
    pub fn read_all(&self) -> Result<Vec<AnchorRecord>> {
        self.read_with_policy(self.config.on_corrupt)
    }

    /// Every readable record, skipping corrupt and missing entries whatever
    /// the configured policy.
    ///
    /// An invalid counter is ignored and every record key is read.
    pub fn read_all_lenient(&self) -> Result<Vec<AnchorRecord>> {
        self.read_with_policy(CorruptRecordPolicy::Skip)
    }

    fn read_with_policy(&self, policy: CorruptRecordPolicy) -> Result<Vec<AnchorRecord>> {
        if policy == CorruptRecordPolicy::Abort {
            // Stops at the first missing key, so a wild counter cannot run long.
            let count = self.count()?;
            let mut records = Vec::new();
            for index in 0..count {
                records.push(self.read_entry(index)?);
            }
            return Ok(records);
        }

        let limit = match self.count() {
            Ok(count) => Some(count),
            Err(StoreError::InvalidCount(n)) => {
                tracing::warn!("Ignoring invalid anchor count {}", n);
                None
            }
            Err(err) => return Err(err),
        };
        let indices: Vec<usize> = self
            .present_indices()
            .into_iter()
            .filter(|index| limit.map_or(true, |count| *index < count))
            .collect();
        if let Some(count) = limit {
            if indices.len() < count {
                tracing::warn!(
                    "Skipping {} missing anchor records",
                    count - indices.len()
                );
            }
        }

        let mut records = Vec::with_capacity(indices.len());
        for index in indices {
            match self.read_entry(index) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!("Skipping unreadable anchor record: {}", err),
            }
        }
        Ok(records)
    }

    /// Identifiers of every stored record, in append order.
    pub fn read_identifiers(&self) -> Result<Vec<Uuid>> {
        Ok(self.read_all()?.into_iter().map(|r| r.id).collect())
    }

    /// First record with the given identifier.
    pub fn find_by_identifier(&self, id: Uuid) -> Result<Option<AnchorRecord>> {
        Ok(self.read_all()?.into_iter().find(|r| r.id == id))
    }

    /// First record whose name contains `fragment`.
    pub fn find_by_name_contains(&self, fragment: &str) -> Result<Option<AnchorRecord>> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|r| r.name.contains(fragment)))
    }

    /// Delete every record key, then the counter.
    ///
    /// Works from the keys actually present, so over-counted, negative or
    /// absurd counters can always be cleared.
    pub fn clear_all(&mut self) -> Result<usize> {
        let mut undo = Undo::new();
        let removed = self.delete_records(&mut undo);
        let count_key = self.config.count_key.clone();
        self.record_undo(&mut undo, &count_key);
        self.prefs.delete_key(&count_key);
        self.commit(undo)?;

        tracing::debug!("Cleared {} anchor records", removed);
        Ok(removed)
    }

    /// Keep only the readable records for which `keep` returns `true`,
    /// compacting them to indices `0..n` in their original order.
    ///
    /// Unreadable entries are dropped. Returns the number of readable
    /// records removed.
    pub fn retain<F>(&mut self, mut keep: F) -> Result<usize>
    where
        F: FnMut(&AnchorRecord) -> bool,
    {
        let records = self.read_all_lenient()?;
        let total = records.len();
        let kept: Vec<AnchorRecord> = records.into_iter().filter(|r| keep(r)).collect();

        let mut undo = Undo::new();
        self.delete_records(&mut undo);
        for (index, record) in kept.iter().enumerate() {
            let key = self.config.record_key(index);
            self.record_undo(&mut undo, &key);
            self.prefs.set_string(&key, &record.to_string());
        }
        let count_key = self.config.count_key.clone();
        self.record_undo(&mut undo, &count_key);
        if kept.is_empty() {
            self.prefs.delete_key(&count_key);
        } else {
            let count = i64::try_from(kept.len()).map_err(|_| StoreError::InvalidCount(i64::MAX))?;
            self.prefs.set_int(&count_key, count);
        }
        self.commit(undo)?;

        let removed = total - kept.len();
        tracing::debug!("Removed {} anchor records, kept {}", removed, kept.len());
        Ok(removed)
    }

    fn delete_records(&mut self, undo: &mut Undo) -> usize {
        let keys: Vec<String> = self
            .prefs
            .keys()
            .into_iter()
            .filter(|key| self.config.record_index(key).is_some())
            .collect();
        for key in &keys {
            self.record_undo(undo, key);
            self.prefs.delete_key(key);
        }
        keys.len()
    }

    fn record_undo(&self, undo: &mut Undo, key: &str) {
        undo.push((key.to_string(), self.prefs.get_value(key)));
    }

    /// Flush, or put every touched key back and report the failure.
    fn commit(&mut self, undo: Undo) -> Result<()> {
        let err = match self.prefs.flush() {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        for (key, value) in undo.into_iter().rev() {
            match value {
                Some(value) => self.prefs.set_value(&key, value),
                None => {
                    self.prefs.delete_key(&key);
                }
            }
        }
        tracing::warn!("Anchor store flush failed, write rolled back: {}", err);
        Err(err.into())
    }
}
