//! Claim engine
//!
//! Validates and commits claim attempts end to end. It is the only mutator
//! of listing quantity/status and the only writer of claim records.
//!
//! # Example
//!
//! ```no_run
//! use claim_core::{ClaimEngine, Config, RocksStore};
//! use claim_core::types::{ActorId, ListingDetails, NewListing};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let store = Arc::new(RocksStore::open(&config)?);
//!     let engine = ClaimEngine::new(store, config.engine.clone())?;
//!
//!     let now = chrono::Utc::now();
//!     let listing = engine.post_listing(
//!         ActorId::new("donor"),
//!         NewListing { quantity: 3, deadline: None, details: ListingDetails::titled("Bagels") },
//!         now,
//!     )?;
//!
//!     let record = engine.claim(listing.id, Some(ActorId::new("neighbour")), now).await?;
//!     println!("claimed unit #{}", record.sequence);
//!     Ok(())
//! }
//! ```

use crate::{
    config::EngineConfig,
    error::{ClaimFailure, Error, Result},
    metrics::Metrics,
    notifier::{InvalidationNotifier, NoopNotifier, StaleSignal},
    storage::{CancelToken, ClaimStore, DecrementOutcome, ListingTxn},
    types::{
        ActorId, ClaimRecord, ClaimView, Listing, ListingAudit, ListingId, ListingSetId,
        NewListing,
    },
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Raises the attempt's cancel flag if the caller stops waiting before
/// the store answered.
struct AbandonGuard {
    token: CancelToken,
    armed: bool,
}

impl AbandonGuard {
    fn new(token: CancelToken) -> Self {
        Self { token, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

/// Transactional claim decision procedure over a claim store
pub struct ClaimEngine<S> {
    store: Arc<S>,
    notifier: Arc<dyn InvalidationNotifier>,
    metrics: Metrics,
    config: EngineConfig,
}

impl<S: ClaimStore> ClaimEngine<S> {
    /// Create engine with no invalidation consumer
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        Ok(Self {
            store,
            notifier: Arc::new(NoopNotifier),
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Set invalidation notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn InvalidationNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Post a new listing on behalf of `owner`
    pub fn post_listing(
        &self,
        owner: ActorId,
        new: NewListing,
        now: DateTime<Utc>,
    ) -> Result<Listing> {
        if new.quantity == 0 {
            return Err(Error::InvalidListing(
                "quantity must be at least 1".to_string(),
            ));
        }

        if matches!(new.deadline, Some(deadline) if deadline <= now) {
            return Err(Error::InvalidListing(
                "deadline must be in the future".to_string(),
            ));
        }

        if new.details.title.trim().is_empty() {
            return Err(Error::InvalidListing("title is required".to_string()));
        }

        let listing = Listing::from_new(owner, new, now);
        self.store.insert_listing(&listing)?;
        self.metrics.record_listing_posted();

        tracing::info!(
            listing_id = %listing.id,
            owner = %listing.owner,
            quantity = listing.quantity,
            "Listing posted"
        );

        self.notify(StaleSignal {
            listing_id: listing.id,
            listing_set: ListingSetId::for_owner(&listing.owner),
        });

        Ok(listing)
    }

    /// Claim one unit of a listing.
    ///
    /// Fails with `Unauthorized` before touching the store when `actor` is
    /// absent. Never retries: on timeout the attempt is abandoned and
    /// `StoreUnavailable` returned, even though the store may still commit
    /// if it was already past its cancellation check.
    pub async fn claim(
        &self,
        listing_id: ListingId,
        actor: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> std::result::Result<ClaimRecord, ClaimFailure> {
        let started = Instant::now();
        let result = self.attempt(listing_id, actor, now).await;
        self.metrics
            .record_claim_duration(started.elapsed().as_secs_f64());

        match &result {
            Ok(record) => {
                self.metrics.record_claim_committed();
                tracing::info!(
                    listing_id = %listing_id,
                    claim_id = %record.id,
                    actor = %record.actor_id,
                    sequence = record.sequence,
                    "Claim committed"
                );
            }
            Err(failure) => {
                self.metrics.record_claim_rejected(failure);
                if failure.is_operator_visible() {
                    tracing::error!(listing_id = %listing_id, error = %failure, "Claim attempt failed");
                } else {
                    tracing::debug!(listing_id = %listing_id, reason = failure.as_str(), "Claim rejected");
                }
            }
        }

        result
    }

    async fn attempt(
        &self,
        listing_id: ListingId,
        actor: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> std::result::Result<ClaimRecord, ClaimFailure> {
        let Some(actor) = actor else {
            return Err(ClaimFailure::Unauthorized);
        };

        let cancel = CancelToken::new();
        let guard = AbandonGuard::new(cancel.clone());

        let store = self.store.clone();
        let recheck_clock = self.config.recheck_server_clock;
        let task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || {
                store.transact(&listing_id, &cancel, |txn| {
                    decide(txn, actor, now, recheck_clock)
                })
            }
        });

        let timeout = self.config.store_timeout();
        let outcome = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => Err(Error::Concurrency(join_err.to_string()).into()),
            Err(_) => {
                cancel.cancel();
                Err(Error::Timeout(timeout).into())
            }
        };
        guard.disarm();

        let (record, owner) = outcome?;

        self.notify(StaleSignal {
            listing_id,
            listing_set: ListingSetId::for_owner(&owner),
        });

        Ok(record)
    }

    /// Fire-and-forget invalidation; failures are logged only
    fn notify(&self, signal: StaleSignal) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(listing_id = %signal.listing_id, "No runtime, invalidation skipped");
            return;
        };

        let notifier = self.notifier.clone();
        runtime.spawn(async move {
            let listing_id = signal.listing_id;
            if let Err(e) = notifier.mark_stale(signal).await {
                tracing::warn!(listing_id = %listing_id, error = %e, "Invalidation signal dropped");
            }
        });
    }

    /// Get listing by ID
    pub fn listing(&self, id: &ListingId) -> Result<Option<Listing>> {
        self.store.get(id)
    }

    /// Feed: claimable listings at `now`, newest first
    pub fn available_listings(&self, now: DateTime<Utc>) -> Result<Vec<Listing>> {
        let mut listings: Vec<_> = self
            .store
            .list_listings()?
            .into_iter()
            .filter(|l| !l.is_exhausted() && !l.is_expired(now))
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(listings)
    }

    /// Listings posted by `owner`, newest first
    pub fn listings_by_owner(&self, owner: &ActorId) -> Result<Vec<Listing>> {
        let mut listings: Vec<_> = self
            .store
            .list_listings()?
            .into_iter()
            .filter(|l| l.owner == *owner)
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(listings)
    }

    /// Claims on a listing, in commit order
    pub fn claims_for_listing(&self, id: &ListingId) -> Result<Vec<ClaimRecord>> {
        self.store.list_by_listing(id)
    }

    /// Claims by an actor, newest first
    pub fn claims_for_actor(&self, actor: &ActorId) -> Result<Vec<ClaimRecord>> {
        self.store.list_by_actor(actor)
    }

    /// Claims by an actor joined with their listings, newest first
    pub fn claim_views_for_actor(&self, actor: &ActorId) -> Result<Vec<ClaimView>> {
        let claims = self.store.list_by_actor(actor)?;
        let mut listings: HashMap<ListingId, Listing> = HashMap::new();
        let mut views = Vec::with_capacity(claims.len());

        for claim in claims {
            let listing = match listings.get(&claim.listing_id) {
                Some(listing) => listing.clone(),
                None => {
                    // Listings are never deleted, so a dangling claim is corruption
                    let listing = self.store.get(&claim.listing_id)?.ok_or_else(|| {
                        Error::InvariantViolation(format!(
                            "claim {} references missing listing {}",
                            claim.id, claim.listing_id
                        ))
                    })?;
                    listings.insert(claim.listing_id, listing.clone());
                    listing
                }
            };
            views.push(ClaimView { claim, listing });
        }

        Ok(views)
    }

    /// Check `remaining + claimed == initial` under the listing's row lock
    pub fn audit_listing(&self, id: &ListingId) -> Result<Option<ListingAudit>> {
        let store = &self.store;
        let audit = store.transact(id, &CancelToken::new(), |txn| {
            let Some(listing) = txn.listing() else {
                return Ok(None);
            };
            Ok::<_, Error>(Some(ListingAudit {
                initial: listing.initial_quantity,
                remaining: listing.quantity,
                claimed: store.count_by_listing(id)?,
            }))
        })?;

        if let Some(report) = audit.filter(|a| !a.is_conserved()) {
            tracing::error!(listing_id = %id, ?report, "Listing conservation violated");
        }

        Ok(audit)
    }
}

/// Validation and commit steps run under the row lock
fn decide(
    txn: &mut ListingTxn,
    actor: ActorId,
    requested_at: DateTime<Utc>,
    recheck_clock: bool,
) -> std::result::Result<(ClaimRecord, ActorId), ClaimFailure> {
    let listing = txn.listing().ok_or(ClaimFailure::NotFound)?;
    listing.check_invariants()?;

    let now = if recheck_clock {
        requested_at.max(Utc::now())
    } else {
        requested_at
    };

    if listing.is_expired(now) {
        return Err(ClaimFailure::Expired);
    }

    if listing.is_exhausted() {
        return Err(ClaimFailure::OutOfStock);
    }

    let owner = listing.owner.clone();

    match txn.try_decrement(1)? {
        DecrementOutcome::Committed(_) => {}
        DecrementOutcome::Conflict | DecrementOutcome::NotFound => {
            return Err(ClaimFailure::OutOfStock)
        }
    }

    let record = txn.append_claim(actor, now)?;
    Ok((record, owner))
}
