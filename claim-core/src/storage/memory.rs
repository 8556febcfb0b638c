//! In-process backend with the same transaction contract as `RocksStore`.
//!
//! Each listing row sits behind its own mutex; holding it is the row lock.
//! A listing's ledger rows live next to it and are appended only by the
//! holder of that row lock. The per-actor index is sharded. Nothing
//! survives the process.

use super::{
    sort_newest_first, CancelToken, ClaimLedger, ListingTxn, ResourceStore, StorageStats,
};
use crate::{
    error::{Error, Result},
    types::{ActorId, ClaimRecord, Listing, ListingId},
};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A listing and its ledger, in commit order
#[derive(Debug)]
struct Row {
    listing: Mutex<Listing>,
    claims: RwLock<Vec<ClaimRecord>>,
}

/// Volatile claim store
#[derive(Default)]
pub struct MemoryStore {
    rows: DashMap<ListingId, Arc<Row>>,
    by_actor: DashMap<ActorId, Vec<ClaimRecord>>,
    total_claims: AtomicU64,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, id: &ListingId) -> Option<Arc<Row>> {
        // Clone out so the shard lock is released before the row lock is taken
        self.rows.get(id).map(|row| row.value().clone())
    }

    /// Get storage statistics
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            total_listings: self.rows.len() as u64,
            total_claims: self.total_claims.load(Ordering::Relaxed),
        }
    }
}

impl ResourceStore for MemoryStore {
    fn get(&self, id: &ListingId) -> Result<Option<Listing>> {
        Ok(self.row(id).map(|row| row.listing.lock().clone()))
    }

    fn insert_listing(&self, listing: &Listing) -> Result<()> {
        listing.check_invariants()?;

        match self.rows.entry(listing.id) {
            Entry::Occupied(_) => Err(Error::DuplicateListing(listing.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Row {
                    listing: Mutex::new(listing.clone()),
                    claims: RwLock::new(Vec::new()),
                }));
                Ok(())
            }
        }
    }

    fn list_listings(&self) -> Result<Vec<Listing>> {
        let rows: Vec<_> = self.rows.iter().map(|r| r.value().clone()).collect();
        Ok(rows.iter().map(|row| row.listing.lock().clone()).collect())
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
        let Some(row) = self.row(id) else {
            let mut txn = ListingTxn::new(None);
            let out = f(&mut txn)?;
            txn.into_writes()?;
            return Ok(out);
        };

        let mut current = row.listing.lock();
        let mut txn = ListingTxn::new(Some(current.clone()));
        let out = f(&mut txn)?;

        if let Some(writes) = txn.into_writes()? {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled.into());
            }
            for claim in &writes.claims {
                self.by_actor
                    .entry(claim.actor_id.clone())
                    .or_default()
                    .push(claim.clone());
            }
            self.total_claims
                .fetch_add(writes.claims.len() as u64, Ordering::Relaxed);
            row.claims.write().extend(writes.claims);
            *current = writes.listing;
        }

        Ok(out)
    }
}

impl ClaimLedger for MemoryStore {
    fn list_by_listing(&self, id: &ListingId) -> Result<Vec<ClaimRecord>> {
        Ok(self
            .row(id)
            .map(|row| row.claims.read().clone())
            .unwrap_or_default())
    }

    fn list_by_actor(&self, actor: &ActorId) -> Result<Vec<ClaimRecord>> {
        let mut claims = self
            .by_actor
            .get(actor)
            .map(|claims| claims.value().clone())
            .unwrap_or_default();
        sort_newest_first(&mut claims);
        Ok(claims)
    }

    fn count_by_listing(&self, id: &ListingId) -> Result<u64> {
        Ok(self
            .row(id)
            .map(|row| row.claims.read().len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DecrementOutcome;
    use crate::types::{ListingDetails, NewListing};
    use chrono::Utc;

    fn listing(quantity: u32) -> Listing {
        Listing::from_new(
            ActorId::new("owner"),
            NewListing {
                quantity,
                deadline: None,
                details: ListingDetails::titled("Apples"),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_commit_and_ledger() {
        let store = MemoryStore::new();
        let l = listing(2);
        store.insert_listing(&l).unwrap();

        let record = store
            .transact(&l.id, &CancelToken::new(), |txn| {
                assert_eq!(txn.try_decrement(1)?, DecrementOutcome::Committed(1));
                txn.append_claim(ActorId::new("bob"), Utc::now())
            })
            .unwrap();

        assert_eq!(record.sequence, 1);
        assert_eq!(store.get(&l.id).unwrap().unwrap().quantity, 1);
        assert_eq!(store.list_by_listing(&l.id).unwrap(), vec![record.clone()]);
        assert_eq!(store.list_by_actor(&ActorId::new("bob")).unwrap(), vec![record]);
        assert_eq!(store.stats().total_claims, 1);
    }

    #[test]
    fn test_duplicate_listing_rejected() {
        let store = MemoryStore::new();
        let l = listing(1);
        store.insert_listing(&l).unwrap();
        assert!(matches!(
            store.insert_listing(&l),
            Err(Error::DuplicateListing(_))
        ));
    }

    #[test]
    fn test_rejected_listing_input() {
        let store = MemoryStore::new();
        let mut l = listing(1);
        l.quantity = 0;
        assert!(store.insert_listing(&l).is_err());
        assert_eq!(store.stats().total_listings, 0);
    }

    #[test]
    fn test_missing_listing_transaction() {
        let store = MemoryStore::new();
        let outcome: Result<DecrementOutcome> = store
            .transact(&ListingId::new(), &CancelToken::new(), |txn| txn.try_decrement(1));
        assert_eq!(outcome.unwrap(), DecrementOutcome::NotFound);
    }

    #[test]
    fn test_cancelled_attempt_does_not_commit() {
        let store = MemoryStore::new();
        let l = listing(1);
        store.insert_listing(&l).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = store.transact(&l.id, &cancel, |txn| {
            txn.try_decrement(1)?;
            txn.append_claim(ActorId::new("a"), Utc::now())
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.get(&l.id).unwrap().unwrap().quantity, 1);
        assert_eq!(store.count_by_listing(&l.id).unwrap(), 0);
    }

    #[test]
    fn test_parallel_decrements_never_oversell() {
        let store = Arc::new(MemoryStore::new());
        let l = listing(5);
        store.insert_listing(&l).unwrap();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                let id = l.id;
                std::thread::spawn(move || {
                    store.transact(&id, &CancelToken::new(), |txn| {
                        match txn.try_decrement(1)? {
                            DecrementOutcome::Committed(_) => txn
                                .append_claim(ActorId::new(format!("actor-{}", i)), Utc::now())
                                .map(Some),
                            _ => Ok::<_, Error>(None),
                        }
                    })
                })
            })
            .collect();

        let won = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap().unwrap())
            .count();

        assert_eq!(won, 5);
        assert_eq!(store.get(&l.id).unwrap().unwrap().quantity, 0);
        assert_eq!(store.count_by_listing(&l.id).unwrap(), 5);
    }

    #[test]
    fn test_locked_row_does_not_block_other_listings() {
        let store = Arc::new(MemoryStore::new());
        let busy = listing(3);
        let other = listing(3);
        store.insert_listing(&busy).unwrap();
        store.insert_listing(&other).unwrap();

        // Hold the busy listing's row lock and its ledger
        let row = store.row(&busy.id).unwrap();
        let _held = row.listing.lock();
        let _ledger = row.claims.write();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = {
            let store = store.clone();
            let id = other.id;
            std::thread::spawn(move || {
                let result = store.transact(&id, &CancelToken::new(), |txn| {
                    txn.try_decrement(1)?;
                    txn.append_claim(ActorId::new("carol"), Utc::now())
                });
                done_tx.send(result.is_ok()).unwrap();
            })
        };

        let committed = done_rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("commit on another listing waited for the held row");
        assert!(committed);
        worker.join().unwrap();

        assert_eq!(store.list_by_actor(&ActorId::new("carol")).unwrap().len(), 1);
        assert_eq!(store.get(&other.id).unwrap().unwrap().quantity, 2);
    }

    #[test]
    fn test_ledger_reads_per_listing() {
        let store = MemoryStore::new();
        let a = listing(2);
        let b = listing(2);
        store.insert_listing(&a).unwrap();
        store.insert_listing(&b).unwrap();

        for (id, actor) in [(a.id, "x"), (b.id, "x"), (a.id, "y")] {
            store
                .transact(&id, &CancelToken::new(), |txn| {
                    txn.try_decrement(1)?;
                    txn.append_claim(ActorId::new(actor), Utc::now())
                })
                .unwrap();
        }

        let on_a = store.list_by_listing(&a.id).unwrap();
        assert_eq!(on_a.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.count_by_listing(&b.id).unwrap(), 1);
        assert_eq!(store.count_by_listing(&ListingId::new()).unwrap(), 0);
        assert_eq!(store.list_by_actor(&ActorId::new("x")).unwrap().len(), 2);
        assert_eq!(store.stats().total_claims, 3);
    }
}
