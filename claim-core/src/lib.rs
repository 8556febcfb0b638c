//! Claim reservation core
//!
//! Lets many concurrent actors claim units of a finite, perishable listing
//! without over-allocation.
//!
//! # Architecture
//!
//! - **Row-scoped transactions**: each attempt locks only its own listing
//! - **Atomic commit**: decrement and ledger row are one write batch
//! - **Derived status**: recomputed with every decrement, never set alone
//! - **Read-time expiry**: deadlines are checked inside the transaction
//!
//! # Invariants
//!
//! - No overselling: claims on a listing never exceed its posted quantity
//! - Conservation: `quantity + claims == posted quantity` for all time
//! - Append-only: claim records are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod notifier;
pub mod service;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::ClaimEngine;
pub use error::{ClaimFailure, Error, Result};
pub use identity::{IdentityResolver, SessionResolver};
pub use notifier::{ChannelNotifier, InvalidationNotifier, NoopNotifier, StaleSignal};
pub use service::ClaimService;
pub use storage::{ClaimLedger, ClaimStore, MemoryStore, ResourceStore, RocksStore};
pub use types::{
    ActorId, ClaimRecord, ClaimView, Listing, ListingId, ListingStatus, NewListing,
};
