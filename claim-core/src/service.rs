//! Request boundary used by the web layer
//!
//! Resolves the actor once per request, then hands off to the engine with
//! the server clock.

use crate::{
    engine::ClaimEngine,
    error::{ClaimFailure, Error, Result},
    identity::IdentityResolver,
    storage::ClaimStore,
    types::{ClaimRecord, ClaimView, Listing, ListingId, NewListing},
};
use chrono::Utc;
use std::sync::Arc;

/// Per-request entry points over a shared engine
pub struct ClaimService<S> {
    engine: Arc<ClaimEngine<S>>,
}

impl<S> Clone for ClaimService<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: ClaimStore> ClaimService<S> {
    /// Wrap an engine
    pub fn new(engine: Arc<ClaimEngine<S>>) -> Self {
        Self { engine }
    }

    /// Shared engine
    pub fn engine(&self) -> &ClaimEngine<S> {
        &self.engine
    }

    /// "claim" call
    pub async fn claim(
        &self,
        resolver: &dyn IdentityResolver,
        listing_id: ListingId,
    ) -> std::result::Result<ClaimRecord, ClaimFailure> {
        let actor = resolver.current_actor().await;
        self.engine.claim(listing_id, actor, Utc::now()).await
    }

    /// "claim" call with the listing ID as submitted by the client.
    ///
    /// An ID that does not parse names no listing and fails as `NotFound`,
    /// after the actor check.
    pub async fn claim_by_ref(
        &self,
        resolver: &dyn IdentityResolver,
        listing_ref: &str,
    ) -> std::result::Result<ClaimRecord, ClaimFailure> {
        let actor = resolver.current_actor().await;
        match listing_ref.parse::<ListingId>() {
            Ok(listing_id) => self.engine.claim(listing_id, actor, Utc::now()).await,
            Err(e) => {
                let failure = if actor.is_none() {
                    ClaimFailure::Unauthorized
                } else {
                    ClaimFailure::NotFound
                };
                tracing::debug!(listing_ref, error = %e, "Malformed listing ID");
                self.engine.metrics().record_claim_rejected(&failure);
                Err(failure)
            }
        }
    }

    /// "post listing" call; the current actor becomes the owner
    pub async fn post_listing(
        &self,
        resolver: &dyn IdentityResolver,
        new: NewListing,
    ) -> Result<Listing> {
        let owner = resolver
            .current_actor()
            .await
            .ok_or(Error::Unauthenticated)?;
        self.engine.post_listing(owner, new, Utc::now())
    }

    /// The current actor's claims with listing details, newest first
    pub async fn my_claims(&self, resolver: &dyn IdentityResolver) -> Result<Vec<ClaimView>> {
        let actor = resolver
            .current_actor()
            .await
            .ok_or(Error::Unauthenticated)?;
        self.engine.claim_views_for_actor(&actor)
    }

    /// The current actor's own listings, newest first
    pub async fn my_listings(&self, resolver: &dyn IdentityResolver) -> Result<Vec<Listing>> {
        let owner = resolver
            .current_actor()
            .await
            .ok_or(Error::Unauthenticated)?;
        self.engine.listings_by_owner(&owner)
    }

    /// Public feed
    pub fn feed(&self) -> Result<Vec<Listing>> {
        self.engine.available_listings(Utc::now())
    }
}
