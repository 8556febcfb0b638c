//! View invalidation signals
//!
//! After a committed claim the engine tells cached page layers which
//! listing, and which owner listing set, went stale. Delivery is fire and
//! forget: a failed signal is logged and never rolls back the claim.

use crate::{
    config::EngineConfig,
    types::{ListingId, ListingSetId},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// One "mark stale" signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleSignal {
    /// Listing whose state changed
    pub listing_id: ListingId,
    /// Owner's listing set
    pub listing_set: ListingSetId,
}

/// Invalidation delivery errors
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Consumer is not keeping up
    #[error("Invalidation channel full")]
    Full,

    /// Consumer went away
    #[error("Invalidation channel closed")]
    Closed,
}

/// External "mark stale" hook
#[async_trait]
pub trait InvalidationNotifier: Send + Sync {
    /// Signal that cached views of the listing are stale
    async fn mark_stale(&self, signal: StaleSignal) -> Result<(), NotifyError>;
}

/// Discards every signal
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl InvalidationNotifier for NoopNotifier {
    async fn mark_stale(&self, _signal: StaleSignal) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Forwards signals into a bounded channel without waiting
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<StaleSignal>,
}

impl ChannelNotifier {
    /// Notifier plus the receiving end for the cache layer
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StaleSignal>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Channel sized by `invalidation_buffer`
    pub fn for_engine(config: &EngineConfig) -> (Self, mpsc::Receiver<StaleSignal>) {
        Self::channel(config.invalidation_buffer)
    }
}

#[async_trait]
impl InvalidationNotifier for ChannelNotifier {
    async fn mark_stale(&self, signal: StaleSignal) -> Result<(), NotifyError> {
        self.sender.try_send(signal).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::Full,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }
}
