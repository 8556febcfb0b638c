//! Storage layer: resource store and claim ledger
//!
//! Every claim attempt runs inside one listing transaction:
//!
//! ```text
//! transact(listing_id)
//!   ├─ lock row (per listing, never global)
//!   ├─ load fresh snapshot ──► ListingTxn
//!   ├─ caller validates, try_decrement(), append_claim()
//!   └─ commit staged listing + claim rows as one atomic write
//! ```
//!
//! If the closure fails, or the attempt was cancelled, nothing is written.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::{
    error::{Error, Result},
    types::{ActorId, ClaimId, ClaimRecord, Listing, ListingId, ListingStatus},
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of a conditional decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// Decrement staged; carries the new quantity
    Committed(u32),
    /// Quantity fell below the expected minimum
    Conflict,
    /// Listing does not exist
    NotFound,
}

/// Abandonment flag shared between a caller and its store transaction.
///
/// Checked under the row lock right before the atomic write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, live token
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the attempt
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the attempt was abandoned
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Staged writes produced by a successful transaction
#[derive(Debug)]
pub(crate) struct TxnWrites {
    pub(crate) listing: Listing,
    pub(crate) claims: Vec<ClaimRecord>,
}

/// Read-check-write view of one listing row, held under its row lock
#[derive(Debug)]
pub struct ListingTxn {
    snapshot: Option<Listing>,
    staged: Option<Listing>,
    claims: Vec<ClaimRecord>,
}

impl ListingTxn {
    pub(crate) fn new(snapshot: Option<Listing>) -> Self {
        Self {
            snapshot,
            staged: None,
            claims: Vec::new(),
        }
    }

    /// Current view of the listing, including staged changes
    pub fn listing(&self) -> Option<&Listing> {
        self.staged.as_ref().or(self.snapshot.as_ref())
    }

    /// Decrement by one if quantity is still at least `expected_min`.
    ///
    /// Status is recomputed in the same step.
    pub fn try_decrement(&mut self, expected_min: u32) -> Result<DecrementOutcome> {
        let Some(current) = self.listing() else {
            return Ok(DecrementOutcome::NotFound);
        };

        if current.quantity < expected_min.max(1) {
            return Ok(DecrementOutcome::Conflict);
        }

        let mut next = current.clone();
        next.quantity = next.quantity.checked_sub(1).ok_or_else(|| {
            Error::InvariantViolation(format!("listing {} quantity underflow", next.id))
        })?;
        next.status = ListingStatus::from_quantity(next.quantity);

        let quantity = next.quantity;
        self.staged = Some(next);
        Ok(DecrementOutcome::Committed(quantity))
    }

    /// Stage a ledger row for one staged decrement
    pub fn append_claim(
        &mut self,
        actor_id: ActorId,
        created_at: DateTime<Utc>,
    ) -> Result<ClaimRecord> {
        let (Some(before), Some(after)) = (self.snapshot.as_ref(), self.staged.as_ref()) else {
            return Err(Error::InvariantViolation(
                "claim appended without a staged decrement".to_string(),
            ));
        };

        let pending = before.quantity - after.quantity;
        if self.claims.len() as u32 >= pending {
            return Err(Error::InvariantViolation(format!(
                "listing {}: more claims than decrements",
                after.id
            )));
        }

        let record = ClaimRecord {
            id: ClaimId::new(),
            listing_id: after.id,
            actor_id,
            sequence: before.claimed() + self.claims.len() as u32 + 1,
            created_at,
        };

        self.claims.push(record.clone());
        Ok(record)
    }

    /// Validate staged writes; `None` when nothing changed
    pub(crate) fn into_writes(self) -> Result<Option<TxnWrites>> {
        let Some(listing) = self.staged else {
            if !self.claims.is_empty() {
                return Err(Error::InvariantViolation(
                    "ledger rows staged without a decrement".to_string(),
                ));
            }
            return Ok(None);
        };

        let before = self.snapshot.as_ref().map(|l| l.quantity).unwrap_or(0);
        let decremented = before.saturating_sub(listing.quantity) as usize;
        if decremented != self.claims.len() {
            return Err(Error::InvariantViolation(format!(
                "listing {}: {} decrements but {} ledger rows",
                listing.id,
                decremented,
                self.claims.len()
            )));
        }

        listing.check_invariants()?;

        Ok(Some(TxnWrites {
            listing,
            claims: self.claims,
        }))
    }
}

/// Durable storage of listings with one atomic read-check-write per attempt
pub trait ResourceStore: Send + Sync + 'static {
    /// Get listing by ID
    fn get(&self, id: &ListingId) -> Result<Option<Listing>>;

    /// Store a newly posted listing
    fn insert_listing(&self, listing: &Listing) -> Result<()>;

    /// All listings (unordered)
    fn list_listings(&self) -> Result<Vec<Listing>>;

    /// Run `f` against a fresh snapshot under the listing's row lock and
    /// commit its staged writes atomically if it returns `Ok`.
    fn transact<T, E, F>(
        &self,
        id: &ListingId,
        cancel: &CancelToken,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ListingTxn) -> std::result::Result<T, E>,
        E: From<Error>;
}

/// Append-only record of successful claims
pub trait ClaimLedger: Send + Sync + 'static {
    /// Claims on a listing, in commit order
    fn list_by_listing(&self, id: &ListingId) -> Result<Vec<ClaimRecord>>;

    /// Claims by an actor, newest first
    fn list_by_actor(&self, actor: &ActorId) -> Result<Vec<ClaimRecord>>;

    /// Number of claims on a listing
    fn count_by_listing(&self, id: &ListingId) -> Result<u64> {
        Ok(self.list_by_listing(id)?.len() as u64)
    }
}

/// Backend providing both halves of the claim transaction
pub trait ClaimStore: ResourceStore + ClaimLedger {}

impl<T: ResourceStore + ClaimLedger> ClaimStore for T {}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Listings stored
    pub total_listings: u64,
    /// Ledger rows stored
    pub total_claims: u64,
}

/// Newest first, ties broken by ID
pub(crate) fn sort_newest_first(claims: &mut [ClaimRecord]) {
    claims.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ListingDetails, NewListing};

    fn listing(quantity: u32) -> Listing {
        Listing::from_new(
            ActorId::new("owner"),
            NewListing {
                quantity,
                deadline: None,
                details: ListingDetails::titled("Soup"),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_decrement_recomputes_status() {
        let mut txn = ListingTxn::new(Some(listing(1)));
        assert_eq!(txn.try_decrement(1).unwrap(), DecrementOutcome::Committed(0));
        assert_eq!(txn.listing().unwrap().status, ListingStatus::Exhausted);

        // Second decrement in the same txn sees the staged quantity
        assert_eq!(txn.try_decrement(1).unwrap(), DecrementOutcome::Conflict);
    }

    #[test]
    fn test_decrement_missing_listing() {
        let mut txn = ListingTxn::new(None);
        assert_eq!(txn.try_decrement(1).unwrap(), DecrementOutcome::NotFound);
        assert!(txn.into_writes().unwrap().is_none());
    }

    #[test]
    fn test_expected_min_is_respected() {
        let mut txn = ListingTxn::new(Some(listing(2)));
        assert_eq!(txn.try_decrement(3).unwrap(), DecrementOutcome::Conflict);
        assert!(txn.into_writes().unwrap().is_none());
    }

    #[test]
    fn test_claim_requires_decrement() {
        let mut txn = ListingTxn::new(Some(listing(2)));
        assert!(txn.append_claim(ActorId::new("a"), Utc::now()).is_err());
    }

    #[test]
    fn test_decrement_without_claim_fails_closed() {
        let mut txn = ListingTxn::new(Some(listing(2)));
        txn.try_decrement(1).unwrap();
        assert!(matches!(
            txn.into_writes(),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_paired_writes_and_sequence() {
        let mut l = listing(3);
        l.quantity = 2;
        let mut txn = ListingTxn::new(Some(l));
        txn.try_decrement(1).unwrap();
        let record = txn.append_claim(ActorId::new("a"), Utc::now()).unwrap();
        assert_eq!(record.sequence, 2);

        // Only one row per decrement
        assert!(txn.append_claim(ActorId::new("b"), Utc::now()).is_err());

        let writes = txn.into_writes().unwrap().unwrap();
        assert_eq!(writes.listing.quantity, 1);
        assert_eq!(writes.claims.len(), 1);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!shared.is_cancelled());
        token.cancel();
        assert!(shared.is_cancelled());
    }
}
