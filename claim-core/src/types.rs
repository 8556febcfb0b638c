//! Core types for the claim core
//!
//! All stored types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Status derived from quantity, never set independently

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Listing identifier (UUIDv7 for time-ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingId(Uuid);

impl ListingId {
    /// Generate a fresh listing ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ListingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ListingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Claim record identifier (UUIDv7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimId(Uuid);

impl ClaimId {
    /// Generate a fresh claim ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated actor identity, owned by the identity provider.
///
/// The core only stores and compares it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    /// Create new actor ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the set of listings owned by one actor.
///
/// Cached owner views ("my listings") are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingSetId(String);

impl ListingSetId {
    /// Listing set of the given owner
    pub fn for_owner(owner: &ActorId) -> Self {
        Self(format!("owner:{}", owner.as_str()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListingSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Listing status (derived from quantity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ListingStatus {
    /// Units remain
    Available = 1,
    /// Quantity reached zero
    Exhausted = 2,
}

impl ListingStatus {
    /// The only valid status for a given quantity
    pub fn from_quantity(quantity: u32) -> Self {
        if quantity == 0 {
            ListingStatus::Exhausted
        } else {
            ListingStatus::Available
        }
    }
}

/// Descriptive payload of a posted listing. Opaque to the claim logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDetails {
    /// Short title shown in the feed
    pub title: String,

    /// Free-form description
    pub description: Option<String>,

    /// Pickup address
    pub address: Option<String>,

    /// Contact phone for pickup
    pub contact_phone: Option<String>,
}

impl ListingDetails {
    /// Details with only a title
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Input of the "post listing" operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    /// Units on offer (must be >= 1)
    pub quantity: u32,

    /// Optional claim deadline; `None` never expires
    pub deadline: Option<DateTime<Utc>>,

    /// Descriptive payload
    pub details: ListingDetails,
}

/// A posted, claimable resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing ID
    pub id: ListingId,

    /// Actor that posted it
    pub owner: ActorId,

    /// Units remaining
    pub quantity: u32,

    /// Units posted
    pub initial_quantity: u32,

    /// Derived status, recomputed on every decrement
    pub status: ListingStatus,

    /// Claim deadline
    pub deadline: Option<DateTime<Utc>>,

    /// Descriptive payload
    pub details: ListingDetails,

    /// Posted timestamp
    pub created_at: DateTime<Utc>,
}

impl Listing {
    /// Build a freshly posted listing
    pub fn from_new(owner: ActorId, new: NewListing, now: DateTime<Utc>) -> Self {
        Self {
            id: ListingId::new(),
            owner,
            quantity: new.quantity,
            initial_quantity: new.quantity,
            status: ListingStatus::from_quantity(new.quantity),
            deadline: new.deadline,
            details: new.details,
            created_at: now,
        }
    }

    /// Deadline reached at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// No units left
    pub fn is_exhausted(&self) -> bool {
        self.status == ListingStatus::Exhausted || self.quantity == 0
    }

    /// Units consumed so far
    pub fn claimed(&self) -> u32 {
        self.initial_quantity.saturating_sub(self.quantity)
    }

    /// Verify the stored row is internally consistent
    pub fn check_invariants(&self) -> crate::Result<()> {
        if self.initial_quantity == 0 {
            return Err(crate::Error::InvariantViolation(format!(
                "listing {} was posted with zero quantity",
                self.id
            )));
        }

        if self.quantity > self.initial_quantity {
            return Err(crate::Error::InvariantViolation(format!(
                "listing {} quantity {} exceeds posted quantity {}",
                self.id, self.quantity, self.initial_quantity
            )));
        }

        if self.status != ListingStatus::from_quantity(self.quantity) {
            return Err(crate::Error::InvariantViolation(format!(
                "listing {} status {:?} disagrees with quantity {}",
                self.id, self.status, self.quantity
            )));
        }

        Ok(())
    }
}

/// Immutable evidence that a claim attempt succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    /// Claim ID
    pub id: ClaimId,

    /// Claimed listing
    pub listing_id: ListingId,

    /// Claiming actor
    pub actor_id: ActorId,

    /// Position in the listing's commit order (1-based)
    pub sequence: u32,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

/// A claim together with the listing it was made on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimView {
    /// The ledger row
    pub claim: ClaimRecord,

    /// Current state of the claimed listing (title, pickup address, contact)
    pub listing: Listing,
}

/// Result of a conservation audit on one listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingAudit {
    /// Units posted
    pub initial: u32,

    /// Units remaining
    pub remaining: u32,

    /// Ledger rows referencing the listing
    pub claimed: u64,
}

impl ListingAudit {
    /// remaining + claimed == initial
    pub fn is_conserved(&self) -> bool {
        u64::from(self.remaining) + self.claimed == u64::from(self.initial)
    }
}
