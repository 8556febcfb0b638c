//! RocksDB backend
//!
//! # Column Families
//!
//! - `listings` - Listing rows (key: listing_id)
//! - `claims` - Append-only claim records (key: claim_id)
//! - `indices` - Secondary indices:
//!   - `L || listing_id || sequence` -> claim_id
//!   - `A || len(actor) || actor || claim_id` -> empty
//!
//! A claim commit writes the listing row, the claim row and both index
//! entries in a single `WriteBatch`, so a crash leaves all or none of them.

use super::{
    sort_newest_first, CancelToken, ClaimLedger, ListingTxn, ResourceStore, StorageStats,
    TxnWrites,
};
use crate::{
    error::{Error, Result},
    types::{ActorId, ClaimId, ClaimRecord, Listing, ListingId},
    Config,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;

/// Column family names
const CF_LISTINGS: &str = "listings";
const CF_CLAIMS: &str = "claims";
const CF_INDICES: &str = "indices";

/// Index key tags
const IDX_LISTING: u8 = b'L';
const IDX_ACTOR: u8 = b'A';

/// Durable claim store backed by RocksDB
pub struct RocksStore {
    db: Arc<DB>,
    row_locks: DashMap<ListingId, Arc<Mutex<()>>>,
    sync_writes: bool,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_LISTINGS, Self::cf_options_listings()),
            ColumnFamilyDescriptor::new(CF_CLAIMS, Self::cf_options_claims()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, sync_writes = config.rocksdb.sync_writes, "Opened claim store");

        Ok(Self {
            db: Arc::new(db),
            row_locks: DashMap::new(),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_listings() -> Options {
        let mut opts = Options::default();
        // Hot rows, read on every attempt
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_claims() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    fn row_lock(&self, id: &ListingId) -> Arc<Mutex<()>> {
        self.row_locks.entry(*id).or_default().clone()
    }

    /// Drop the lock entry once no attempt holds or waits on it.
    ///
    /// Both this and `row_lock` run under the map's shard lock, so a waiter
    /// always keeps the count above one.
    fn release_row_lock(&self, id: &ListingId) {
        self.row_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Body of `transact`; the caller holds the row lock
    fn transact_locked<T, E, F>(
        &self,
        id: &ListingId,
        cancel: &CancelToken,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ListingTxn) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let snapshot = self.read_listing(id)?;
        let mut txn = ListingTxn::new(snapshot);
        let out = f(&mut txn)?;

        if let Some(writes) = txn.into_writes()? {
            if cancel.is_cancelled() {
                tracing::debug!(listing_id = %id, "Attempt abandoned before commit");
                return Err(Error::Cancelled.into());
            }
            self.commit(&writes)?;
        }

        Ok(out)
    }

    fn read_listing(&self, id: &ListingId) -> Result<Option<Listing>> {
        let cf = self.cf_handle(CF_LISTINGS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn read_claim(&self, id: &[u8]) -> Result<ClaimRecord> {
        let cf = self.cf_handle(CF_CLAIMS)?;
        let value = self.db.get_cf(cf, id)?.ok_or_else(|| {
            Error::InvariantViolation(format!("index references missing claim {:?}", id))
        })?;
        Ok(bincode::deserialize(&value)?)
    }

    /// Keys and values under `prefix`, in key order
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }

        Ok(entries)
    }

    fn commit(&self, writes: &TxnWrites) -> Result<()> {
        let mut batch = WriteBatch::default();

        // 1. Listing row
        let cf_listings = self.cf_handle(CF_LISTINGS)?;
        batch.put_cf(
            cf_listings,
            writes.listing.id.as_bytes(),
            bincode::serialize(&writes.listing)?,
        );

        let cf_claims = self.cf_handle(CF_CLAIMS)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;

        for claim in &writes.claims {
            // 2. Ledger row
            batch.put_cf(cf_claims, claim.id.as_bytes(), bincode::serialize(claim)?);

            // 3. Indices
            batch.put_cf(
                cf_indices,
                Self::index_key_listing_claim(&claim.listing_id, Some(claim.sequence)),
                claim.id.as_bytes(),
            );
            batch.put_cf(
                cf_indices,
                Self::index_key_actor_claim(&claim.actor_id, Some(&claim.id)),
                b"",
            );
        }

        // Atomic commit
        self.db.write_opt(batch, &self.write_options())?;

        Ok(())
    }

    // Index key helpers

    fn index_key_listing_claim(listing_id: &ListingId, sequence: Option<u32>) -> Vec<u8> {
        let mut key = Vec::with_capacity(21);
        key.push(IDX_LISTING);
        key.extend_from_slice(listing_id.as_bytes());
        if let Some(seq) = sequence {
            key.extend_from_slice(&seq.to_be_bytes());
        }
        key
    }

    fn index_key_actor_claim(actor: &ActorId, claim_id: Option<&ClaimId>) -> Vec<u8> {
        let actor_bytes = actor.as_str().as_bytes();
        let mut key = Vec::with_capacity(1 + 4 + actor_bytes.len() + 16);
        key.push(IDX_ACTOR);
        // Length prefix keeps one actor's prefix from matching another's
        key.extend_from_slice(&(actor_bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(actor_bytes);
        if let Some(id) = claim_id {
            key.extend_from_slice(id.as_bytes());
        }
        key
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_listings: self.approximate_count(self.cf_handle(CF_LISTINGS)?)?,
            total_claims: self.approximate_count(self.cf_handle(CF_CLAIMS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("Claim store closed gracefully");
        Ok(())
    }
}

impl ResourceStore for RocksStore {
    fn get(&self, id: &ListingId) -> Result<Option<Listing>> {
        self.read_listing(id)
    }

    fn insert_listing(&self, listing: &Listing) -> Result<()> {
        listing.check_invariants()?;

        let lock = self.row_lock(&listing.id);
        let _row = lock.lock();

        if self.read_listing(&listing.id)?.is_some() {
            return Err(Error::DuplicateListing(listing.id.to_string()));
        }

        let cf = self.cf_handle(CF_LISTINGS)?;
        self.db.put_cf_opt(
            cf,
            listing.id.as_bytes(),
            bincode::serialize(listing)?,
            &self.write_options(),
        )?;

        tracing::debug!(listing_id = %listing.id, quantity = listing.quantity, "Listing stored");

        Ok(())
    }

    fn list_listings(&self) -> Result<Vec<Listing>> {
        let cf = self.cf_handle(CF_LISTINGS)?;
        let mut listings = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            listings.push(bincode::deserialize(&value)?);
        }
        Ok(listings)
    }

    fn transact<T, E, F>(
        &self,
        id: &ListingId,
        cancel: &CancelToken,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ListingTxn) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let lock = self.row_lock(id);
        let result = {
            let _row = lock.lock();
            self.transact_locked(id, cancel, f)
        };
        drop(lock);
        self.release_row_lock(id);
        result
    }
}

impl ClaimLedger for RocksStore {
    fn list_by_listing(&self, id: &ListingId) -> Result<Vec<ClaimRecord>> {
        let prefix = Self::index_key_listing_claim(id, None);

        self.scan_prefix(CF_INDICES, &prefix)?
            .into_iter()
            .map(|(_, claim_id)| self.read_claim(&claim_id))
            .collect()
    }

    fn list_by_actor(&self, actor: &ActorId) -> Result<Vec<ClaimRecord>> {
        let prefix = Self::index_key_actor_claim(actor, None);

        let mut claims = Vec::new();
        for (key, _) in self.scan_prefix(CF_INDICES, &prefix)? {
            let suffix = &key[prefix.len()..];
            if suffix.len() != 16 {
                return Err(Error::InvariantViolation(format!(
                    "malformed actor index key for {}",
                    actor
                )));
            }
            claims.push(self.read_claim(suffix)?);
        }

        sort_newest_first(&mut claims);
        Ok(claims)
    }

    fn count_by_listing(&self, id: &ListingId) -> Result<u64> {
        let prefix = Self::index_key_listing_claim(id, None);
        Ok(self.scan_prefix(CF_INDICES, &prefix)?.len() as u64)
    }
}
