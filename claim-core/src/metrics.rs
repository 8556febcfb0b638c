//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the claim engine.
//!
//! # Metrics
//!
//! - `claims_committed_total` - Claim attempts that committed
//! - `claims_rejected_total{reason}` - Failed attempts by failure kind
//! - `listings_posted_total` - Listings posted
//! - `claim_duration_seconds` - Histogram of claim attempt latencies

use crate::error::ClaimFailure;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed claims
    pub claims_committed: IntCounter,

    /// Rejected claims by reason
    pub claims_rejected: IntCounterVec,

    /// Posted listings
    pub listings_posted: IntCounter,

    /// Claim duration histogram
    pub claim_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let claims_committed =
            IntCounter::new("claims_committed_total", "Claim attempts that committed")?;
        registry.register(Box::new(claims_committed.clone()))?;

        let claims_rejected = IntCounterVec::new(
            Opts::new("claims_rejected_total", "Failed claim attempts by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(claims_rejected.clone()))?;

        let listings_posted = IntCounter::new("listings_posted_total", "Listings posted")?;
        registry.register(Box::new(listings_posted.clone()))?;

        let claim_duration = Histogram::with_opts(
            HistogramOpts::new("claim_duration_seconds", "Histogram of claim latencies")
                .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(claim_duration.clone()))?;

        Ok(Self {
            claims_committed,
            claims_rejected,
            listings_posted,
            claim_duration,
            registry,
        })
    }

    /// Record a committed claim
    pub fn record_claim_committed(&self) {
        self.claims_committed.inc();
    }

    /// Record a failed claim
    pub fn record_claim_rejected(&self, failure: &ClaimFailure) {
        self.claims_rejected
            .with_label_values(&[failure.as_str()])
            .inc();
    }

    /// Record a posted listing
    pub fn record_listing_posted(&self) {
        self.listings_posted.inc();
    }

    /// Record claim duration
    pub fn record_claim_duration(&self, duration_seconds: f64) {
        self.claim_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("claims_committed", &self.claims_committed.get())
            .field("listings_posted", &self.listings_posted.get())
            .finish_non_exhaustive()
    }
}
