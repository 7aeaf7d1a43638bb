//! Top-level multi-model engine façade.
//!
//! [`Engine`] owns the page store, the single generic ordered-byte-key
//! B+Tree every other component is built on, the commit sequence, and
//! the row-lock table. [`EngineTransaction`] is the `txn` handle every
//! index manager's transactional operations take, matching the shape
//! described for the MVCC Transaction Manager: snapshot reads, buffered
//! writes, pessimistic row locks, atomic publish on commit.

use crate::primitives::pager::{PageStore, Pager, PagerOptions, ReadGuard};
use crate::storage::btree::{BTree, BTreeOptions, KeyCodec, ValCodec};
use crate::storage::change_feed::{self, ChangeEventKind};
use crate::storage::mvcc::{flags, CommitId, VersionHeader, COMMIT_MAX};
use crate::types::{Result, SombraError};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Raw byte key stored verbatim; ordering matches the key schema's
/// lexicographic byte order, so it needs no transformation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BytesKey(pub Vec<u8>);

impl KeyCodec for BytesKey {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.0);
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(BytesKey(bytes.to_vec()))
    }
}

/// Raw byte value stored verbatim (the bytes are a serialized
/// [`VersionChain`]).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BytesVal(pub Vec<u8>);

impl ValCodec for BytesVal {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.0);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(BytesVal(src.to_vec()))
    }
}

/// An ordered list of historical versions for one logical key, newest
/// first. Every committed write appends a version and closes the
/// previous head's validity window; nothing is physically removed
/// until a vacuum pass trims versions older than the oldest active
/// snapshot.
#[derive(Clone, Debug, Default)]
struct VersionChain {
    versions: Vec<(VersionHeader, Vec<u8>)>,
}

impl VersionChain {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.versions.len() as u32).to_be_bytes());
        for (header, payload) in &self.versions {
            let mut h = *header;
            h.payload_len = payload.len().min(u16::MAX as usize) as u16;
            h.encode_into(&mut out);
            out.extend_from_slice(payload);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(SombraError::Corruption("version chain truncated"));
        }
        let count = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let mut off = 4;
        let mut versions = Vec::with_capacity(count);
        for _ in 0..count {
            let header = VersionHeader::decode(&bytes[off..])?;
            off += crate::storage::mvcc::VERSION_HEADER_LEN;
            let len = header.payload_len as usize;
            let payload = bytes
                .get(off..off + len)
                .ok_or(SombraError::Corruption("version chain payload truncated"))?
                .to_vec();
            off += len;
            versions.push((header, payload));
        }
        Ok(VersionChain { versions })
    }

    /// Returns the payload visible at `snapshot`, if any (`None` if the
    /// live version at that snapshot is a tombstone or absent).
    fn visible_at(&self, snapshot: CommitId) -> Option<&[u8]> {
        self.versions
            .iter()
            .find(|(header, _)| header.visible_at(snapshot))
            .filter(|(header, _)| !header.is_tombstone())
            .map(|(_, payload)| payload.as_slice())
    }

    fn push(&mut self, commit_id: CommitId, payload: Option<Vec<u8>>) {
        if let Some((prev_header, _)) = self.versions.first_mut() {
            if prev_header.end == COMMIT_MAX {
                prev_header.end = commit_id;
            }
        }
        let flag_bits = if payload.is_none() { flags::TOMBSTONE } else { 0 };
        let header = VersionHeader::new(commit_id, COMMIT_MAX, flag_bits, 0);
        self.versions
            .insert(0, (header, payload.unwrap_or_default()));
    }

    /// Drops versions that can no longer be observed by any snapshot at
    /// or after `oldest_visible`.
    fn vacuum(&mut self, oldest_visible: CommitId) {
        self.versions
            .retain(|(header, _)| header.end == COMMIT_MAX || header.end > oldest_visible);
    }
}

/// Programmatic configuration, mirroring the engine's external
/// configuration surface. Loading these from a file or environment is
/// the request layer's job, not the engine's.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub storage: StorageOptions,
    pub timeseries: TimeseriesOptions,
    pub vector: VectorOptions,
    pub transactions: TransactionOptions,
    pub change_feed: ChangeFeedOptions,
    pub cache: CacheOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            timeseries: TimeseriesOptions::default(),
            vector: VectorOptions::default(),
            transactions: TransactionOptions::default(),
            change_feed: ChangeFeedOptions::default(),
            cache: CacheOptions::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
}

#[derive(Clone, Debug)]
pub struct StorageOptions {
    pub compression_default: Compression,
    pub compression_bottommost: Compression,
    pub blob_size_threshold: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            compression_default: Compression::None,
            compression_bottommost: Compression::Zstd,
            blob_size_threshold: 4096,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TsCompression {
    None,
    Gorilla,
}

#[derive(Clone, Debug)]
pub struct TimeseriesOptions {
    pub compression: TsCompression,
    pub chunk_size_hours: u32,
}

impl Default for TimeseriesOptions {
    fn default() -> Self {
        Self {
            compression: TsCompression::Gorilla,
            chunk_size_hours: 24,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Quantization {
    None,
    Sq8,
    Auto,
}

#[derive(Clone, Debug)]
pub struct VectorOptions {
    pub quantization: Quantization,
    pub auto_threshold: usize,
    pub dimension: usize,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self {
            quantization: Quantization::Auto,
            auto_threshold: 100_000,
            dimension: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransactionOptions {
    pub lock_timeout_ms: u64,
    pub deadlock_detect: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            deadlock_detect: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChangeFeedOptions {
    pub retention_hours: u64,
    pub long_poll_granularity_ms: u64,
}

impl Default for ChangeFeedOptions {
    fn default() -> Self {
        Self {
            retention_hours: 168,
            long_poll_granularity_ms: 50,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheOptions {
    pub max_entries: usize,
    pub ttl_seconds: u64,
    pub similarity_threshold: f32,
    pub enable_exact_match: bool,
    pub enable_similarity_match: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl_seconds: 300,
            similarity_threshold: 0.95,
            enable_exact_match: true,
            enable_similarity_match: true,
        }
    }
}

struct LockTable {
    held: Mutex<HashMap<Vec<u8>, u64>>,
    released: Condvar,
}

impl LockTable {
    fn new() -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Condvar::new(),
        }
    }

    /// Acquires the row lock for `key` on behalf of `owner`, blocking up
    /// to `timeout`. Re-entrant for the same owner.
    fn acquire(&self, key: &[u8], owner: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.held.lock().unwrap();
        loop {
            match guard.get(key) {
                Some(&holder) if holder == owner => return Ok(()),
                None => {
                    guard.insert(key.to_vec(), owner);
                    return Ok(());
                }
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SombraError::Timeout(format!(
                            "lock wait on key exceeded {}ms",
                            timeout.as_millis()
                        )));
                    }
                    let (g, _) = self
                        .released
                        .wait_timeout(guard, deadline - now)
                        .unwrap();
                    guard = g;
                }
            }
        }
    }

    fn release_all(&self, owner: u64) {
        let mut guard = self.held.lock().unwrap();
        guard.retain(|_, holder| *holder != owner);
        self.released.notify_all();
    }
}

/// The engine's single generic ordered key/value substrate plus the
/// bookkeeping every transaction needs.
pub struct Engine {
    store: Arc<Pager>,
    tree: BTree<BytesKey, BytesVal>,
    next_commit_id: AtomicU64,
    oldest_active_snapshot: Mutex<CommitId>,
    locks: Arc<LockTable>,
    next_tx_id: AtomicU64,
    pub options: EngineOptions,
}

impl Engine {
    /// Opens (creating if absent) the engine's backing store at `path`.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let path = path.as_ref();
        let store: Arc<Pager> = Arc::new(if path.exists() {
            Pager::open(path, PagerOptions::default())?
        } else {
            Pager::create(path, PagerOptions::default())?
        });
        let page_store: Arc<dyn PageStore> = store.clone();
        let tree = BTree::open_or_create(&page_store, BTreeOptions::default())?;
        tracing::info!(path = ?path, "opened multi-model engine");
        Ok(Self {
            store,
            tree,
            next_commit_id: AtomicU64::new(1),
            oldest_active_snapshot: Mutex::new(0),
            locks: Arc::new(LockTable::new()),
            next_tx_id: AtomicU64::new(1),
            options,
        })
    }

    /// Begins a new snapshot-isolated transaction.
    pub fn begin(&self) -> Result<EngineTransaction<'_>> {
        let read = self.store.begin_latest_committed_read()?;
        let snapshot = self.next_commit_id.load(AtomicOrdering::SeqCst).saturating_sub(1);
        let tx_id = self.next_tx_id.fetch_add(1, AtomicOrdering::SeqCst);
        {
            let mut oldest = self.oldest_active_snapshot.lock().unwrap();
            if *oldest == 0 || snapshot < *oldest {
                *oldest = snapshot;
            }
        }
        Ok(EngineTransaction {
            engine: self,
            tx_id,
            snapshot,
            read,
            writes: Vec::new(),
            locked_keys: Vec::new(),
            change_log: Vec::new(),
        })
    }

    fn read_chain(&self, read: &ReadGuard, key: &[u8]) -> Result<Option<VersionChain>> {
        match self.tree.get(read, &BytesKey(key.to_vec()))? {
            Some(val) => Ok(Some(VersionChain::decode(&val.0)?)),
            None => Ok(None),
        }
    }
}

fn in_bounds(key: &[u8], lo: &Bound<Vec<u8>>, hi: &Bound<Vec<u8>>) -> bool {
    let lo_ok = match lo {
        Bound::Unbounded => true,
        Bound::Included(b) => key >= b.as_slice(),
        Bound::Excluded(b) => key > b.as_slice(),
    };
    let hi_ok = match hi {
        Bound::Unbounded => true,
        Bound::Included(b) => key <= b.as_slice(),
        Bound::Excluded(b) => key < b.as_slice(),
    };
    lo_ok && hi_ok
}

/// Smallest key greater than every key starting with `prefix`, or
/// `None` if `prefix` is empty or all `0xFF` (the range is then
/// naturally unbounded above).
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bytes = prefix.to_vec();
    for i in (0..bytes.len()).rev() {
        if bytes[i] != 0xFF {
            bytes[i] += 1;
            bytes.truncate(i + 1);
            return Some(bytes);
        }
    }
    None
}

/// A transaction handle: the `txn` parameter every index manager's
/// operations take, per the MVCC Transaction Manager contract.
pub struct EngineTransaction<'a> {
    engine: &'a Engine,
    tx_id: u64,
    snapshot: CommitId,
    read: ReadGuard,
    writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    locked_keys: Vec<Vec<u8>>,
    change_log: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl<'a> EngineTransaction<'a> {
    /// The commit-sequence snapshot this transaction reads at.
    pub fn snapshot(&self) -> CommitId {
        self.snapshot
    }

    /// Reads `key` as of this transaction's snapshot, including any
    /// write this same transaction has already buffered.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for (k, v) in self.writes.iter().rev() {
            if k == key {
                return Ok(v.clone());
            }
        }
        match self.engine.read_chain(&self.read, key)? {
            Some(chain) => Ok(chain.visible_at(self.snapshot).map(|p| p.to_vec())),
            None => Ok(None),
        }
    }

    /// Scans every key beginning with `prefix`, ascending, returning the
    /// `(key, value)` pair visible at this transaction's snapshot for
    /// each — including this transaction's own buffered writes, so a
    /// `put` followed by a scan in the same transaction sees its own
    /// write without needing a commit first.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let hi = match prefix_upper_bound(prefix) {
            Some(bytes) => Bound::Excluded(bytes),
            None => Bound::Unbounded,
        };
        self.scan_range(Bound::Included(prefix.to_vec()), hi)
    }

    /// Scans the byte-key range `[lo, hi)` (per the given bound kinds),
    /// ascending, returning the `(key, value)` pair visible at this
    /// transaction's snapshot for each, overlaid with this
    /// transaction's own buffered writes in that range.
    pub fn scan_range(&self, lo: Bound<Vec<u8>>, hi: Bound<Vec<u8>>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let lo_key = lo.clone().map(BytesKey);
        let hi_key = hi.clone().map(BytesKey);
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut cursor = self.engine.tree.range(&self.read, lo_key, hi_key)?;
        while let Some((key, val)) = cursor.next()? {
            let chain = VersionChain::decode(&val.0)?;
            if let Some(payload) = chain.visible_at(self.snapshot) {
                out.push((key.0, payload.to_vec()));
            }
        }
        for (key, value) in &self.writes {
            if !in_bounds(key, &lo, &hi) {
                continue;
            }
            out.retain(|(existing, _)| existing != key);
            if let Some(value) = value {
                out.push((key.clone(), value.clone()));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Acquires the row lock for `key` and buffers a write, published
    /// atomically at [`commit`](Self::commit).
    pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.lock(key)?;
        self.writes.push((key.to_vec(), Some(value)));
        Ok(())
    }

    /// Acquires the row lock for `key` and buffers a delete.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.lock(key)?;
        self.writes.push((key.to_vec(), None));
        Ok(())
    }

    /// Records a primary-entity mutation (`value: Some` for a put,
    /// `None` for a delete) to be published as a change-feed record at
    /// commit time, stamped with the real commit id rather than a
    /// placeholder. Called by the index managers right alongside their
    /// primary/index writes so that a commit produces exactly one
    /// change-feed record per entity mutation, published in the same
    /// atomic batch as the primary row and its index entries.
    pub fn stage_change_event(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.change_log.push((key, value));
    }

    fn lock(&mut self, key: &[u8]) -> Result<()> {
        if self.locked_keys.iter().any(|k| k == key) {
            return Ok(());
        }
        let timeout = Duration::from_millis(self.engine.options.transactions.lock_timeout_ms);
        self.engine.locks.acquire(key, self.tx_id, timeout)?;
        self.locked_keys.push(key.to_vec());
        // Pessimistic write-write conflict check: once the lock is ours,
        // if some other transaction has since published a version newer
        // than our snapshot, our view of this key is stale.
        let latest_read = self.engine.store.begin_latest_committed_read()?;
        if let Some(chain) = self.engine.read_chain(&latest_read, key)? {
            if let Some((newest, _)) = chain.versions.first() {
                if newest.begin > self.snapshot {
                    self.engine.locks.release_all(self.tx_id);
                    return Err(SombraError::Conflict(
                        "write-write conflict: key modified by a newer commit".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Publishes all buffered writes atomically at a new commit
    /// sequence number, or returns a conflict if a concurrent
    /// transaction committed first (under pessimistic locking this only
    /// happens across process restarts or lock-table bypass). Any
    /// change events staged via [`stage_change_event`](Self::stage_change_event)
    /// are appended to the change feed with this commit's real id,
    /// published in the same write batch as the primary and index
    /// writes that triggered them.
    pub fn commit(mut self) -> Result<CommitId> {
        if self.writes.is_empty() && self.change_log.is_empty() {
            self.engine.locks.release_all(self.tx_id);
            return Ok(self.snapshot);
        }
        let commit_id = self
            .engine
            .next_commit_id
            .fetch_add(1, AtomicOrdering::SeqCst);
        for (key, value) in std::mem::take(&mut self.change_log) {
            let kind = if value.is_some() { ChangeEventKind::Put } else { ChangeEventKind::Delete };
            change_feed::append(kind, commit_id, &key, value, &mut self)?;
        }
        let mut write_guard = self.engine.store.begin_write()?;
        for (key, value) in std::mem::take(&mut self.writes) {
            let mut chain = self
                .engine
                .read_chain(&self.read, &key)?
                .unwrap_or_default();
            chain.push(commit_id, value);
            let encoded = chain.encode();
            self.engine
                .tree
                .put(&mut write_guard, &BytesKey(key), &BytesVal(encoded))?;
        }
        self.engine.store.commit(write_guard)?;
        self.engine.locks.release_all(self.tx_id);
        tracing::debug!(commit_id, tx_id = self.tx_id, "transaction committed");
        Ok(commit_id)
    }

    /// Discards all buffered writes; always safe.
    pub fn rollback(self) {
        self.engine.locks.release_all(self.tx_id);
    }
}
