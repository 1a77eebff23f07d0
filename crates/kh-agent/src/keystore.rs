//! In-memory key store.
//!
//! The [`KeyStore`] holds every key the agent knows about, ordered by
//! protocol version and then by public blob. A record may hold the
//! cleartext private key, an encrypted key file it can be recovered from,
//! or both; never neither.
//!
//! The store itself never replies to anyone. Removing a record hands it
//! back to the caller, which is responsible for failing the operations
//! still blocked on it.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

use bytes::Bytes;
use tracing::debug;

use kh_core::{DialogId, KeyVersion};

use crate::keys::{KeyMaterial, PpkFile};
use crate::ops::OpId;

/// Sort key of a record: protocol version, then public blob
pub type SortKey = (KeyVersion, Bytes);

/// One key known to the agent
#[derive(Debug)]
pub struct KeyRecord {
    version: KeyVersion,
    blob: Bytes,
    /// Display comment
    pub comment: String,
    /// Decrypted private key, if currently held
    pub cleartext: Option<KeyMaterial>,
    /// Encrypted PPK file the private key can be recovered from
    pub encrypted: Option<PpkFile>,
    /// Passphrase prompt currently open for this key
    pub prompt: Option<DialogId>,
    /// Sign operations waiting for this key to be decrypted, oldest first
    pub blocked: VecDeque<OpId>,
}

impl KeyRecord {
    fn new(version: KeyVersion, blob: Bytes, comment: String) -> Self {
        Self {
            version,
            blob,
            comment,
            cleartext: None,
            encrypted: None,
            prompt: None,
            blocked: VecDeque::new(),
        }
    }

    pub fn version(&self) -> KeyVersion {
        self.version
    }

    pub fn blob(&self) -> &Bytes {
        &self.blob
    }

    pub fn sort_key(&self) -> SortKey {
        (self.version, self.blob.clone())
    }

    /// True if the private key is currently available in cleartext
    pub fn has_cleartext(&self) -> bool {
        self.cleartext.is_some()
    }

    /// Drop the cleartext private key, if it can be recovered later.
    ///
    /// Returns false for SSH-1 keys and keys without an encrypted form.
    /// Succeeds when the key is already encrypted-only. Any passphrase
    /// prompt open for the key is detached from it.
    pub fn reencrypt(&mut self) -> bool {
        if self.version != KeyVersion::Ssh2 || self.encrypted.is_none() {
            return false;
        }
        self.cleartext = None;
        // an answer to a prompt opened before now must not decrypt the key
        self.prompt = None;
        true
    }
}

/// Result of inserting key material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// A new record was created
    Added,
    /// An existing record gained the missing half (cleartext or key file)
    Upgraded,
    /// The record already held what was offered
    AlreadyPresent,
}

impl AddOutcome {
    /// Whether the store changed
    pub fn changed(&self) -> bool {
        !matches!(self, AddOutcome::AlreadyPresent)
    }
}

/// Ordered key collection
#[derive(Debug, Default)]
pub struct KeyStore {
    records: BTreeMap<SortKey, KeyRecord>,
}

fn version_range(version: KeyVersion) -> (Bound<SortKey>, Bound<SortKey>) {
    let start = Bound::Included((version, Bytes::new()));
    let end = match version {
        KeyVersion::Ssh1 => Bound::Excluded((KeyVersion::Ssh2, Bytes::new())),
        KeyVersion::Ssh2 => Bound::Unbounded,
    };
    (start, end)
}

impl KeyStore {
    /// Create an empty key store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a cleartext key.
    ///
    /// An SSH-2 record that only holds an encrypted key file gains the
    /// cleartext; any other existing record is left alone.
    pub fn add(
        &mut self,
        version: KeyVersion,
        blob: Bytes,
        material: KeyMaterial,
        comment: String,
    ) -> AddOutcome {
        let key = (version, blob);
        if let Some(record) = self.records.get_mut(&key) {
            if version == KeyVersion::Ssh2 && !record.has_cleartext() {
                record.cleartext = Some(material);
                debug!(version = %version, "keystore: attached cleartext to encrypted key");
                return AddOutcome::Upgraded;
            }
            return AddOutcome::AlreadyPresent;
        }

        let mut record = KeyRecord::new(version, key.1.clone(), comment);
        record.cleartext = Some(material);
        self.records.insert(key, record);
        debug!(version = %version, total = self.records.len(), "keystore: adding key");
        AddOutcome::Added
    }

    /// Insert an encrypted SSH-2 key file.
    ///
    /// Creates an encrypted-only record, or attaches the file to an existing
    /// record that has none.
    pub fn add_encrypted(&mut self, blob: Bytes, comment: String, file: PpkFile) -> AddOutcome {
        let key = (KeyVersion::Ssh2, blob);
        if let Some(record) = self.records.get_mut(&key) {
            if record.encrypted.is_none() {
                record.encrypted = Some(file);
                debug!("keystore: attached encrypted key file to existing key");
                return AddOutcome::Upgraded;
            }
            return AddOutcome::AlreadyPresent;
        }

        let mut record = KeyRecord::new(KeyVersion::Ssh2, key.1.clone(), comment);
        record.encrypted = Some(file);
        self.records.insert(key, record);
        debug!(total = self.records.len(), "keystore: adding encrypted-only key");
        AddOutcome::Added
    }

    /// Look up a record
    pub fn find(&self, version: KeyVersion, blob: &[u8]) -> Option<&KeyRecord> {
        self.records.get(&(version, Bytes::copy_from_slice(blob)))
    }

    /// Look up a record for modification
    pub fn find_mut(&mut self, version: KeyVersion, blob: &[u8]) -> Option<&mut KeyRecord> {
        self.records
            .get_mut(&(version, Bytes::copy_from_slice(blob)))
    }

    /// Look up a record by sort key
    pub fn get(&self, key: &SortKey) -> Option<&KeyRecord> {
        self.records.get(key)
    }

    /// Look up a record by sort key for modification
    pub fn get_mut(&mut self, key: &SortKey) -> Option<&mut KeyRecord> {
        self.records.get_mut(key)
    }

    /// Records of one version, in blob order
    pub fn iter_version(&self, version: KeyVersion) -> impl Iterator<Item = &KeyRecord> {
        self.records.range(version_range(version)).map(|(_, r)| r)
    }

    /// Every record, SSH-1 first
    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.values()
    }

    /// Every record, for modification
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut KeyRecord> {
        self.records.values_mut()
    }

    /// Number of records of one version
    pub fn count(&self, version: KeyVersion) -> usize {
        self.iter_version(version).count()
    }

    /// The `index`-th record of one version
    pub fn nth(&self, version: KeyVersion, index: usize) -> Option<&KeyRecord> {
        self.iter_version(version).nth(index)
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the store has no keys.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove one record
    pub fn remove(&mut self, version: KeyVersion, blob: &[u8]) -> Option<KeyRecord> {
        self.records
            .remove(&(version, Bytes::copy_from_slice(blob)))
    }

    /// Remove every record of one version
    pub fn remove_all(&mut self, version: KeyVersion) -> Vec<KeyRecord> {
        let keys: Vec<SortKey> = self
            .records
            .range(version_range(version))
            .map(|(k, _)| k.clone())
            .collect();
        let removed: Vec<KeyRecord> = keys
            .iter()
            .filter_map(|k| self.records.remove(k))
            .collect();
        debug!(version = %version, removed = removed.len(), "keystore: removed all keys");
        removed
    }

    /// Remove every record
    pub fn clear(&mut self) -> Vec<KeyRecord> {
        std::mem::take(&mut self.records).into_values().collect()
    }
}
