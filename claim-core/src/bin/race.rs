//! Contended-claim drill
//!
//! Posts one listing and lets many actors race for it, then prints the
//! conservation audit.
//!
//! Usage: `claim-race [QUANTITY] [CLAIMERS]` (config from `CLAIM_CONFIG`
//! file or `CLAIM_*` environment variables)

use anyhow::Context;
use chrono::{Duration, Utc};
use claim_core::{
    types::{ActorId, ListingDetails, NewListing},
    ChannelNotifier, ClaimEngine, ClaimFailure, Config, RocksStore,
};
use std::collections::BTreeMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let quantity: u32 = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("QUANTITY must be a positive integer")?
        .unwrap_or(10);
    let claimers: usize = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("CLAIMERS must be a positive integer")?
        .unwrap_or(100);

    let config = match std::env::var("CLAIM_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env()?,
    };

    tracing::info!(
        data_dir = ?config.data_dir,
        quantity,
        claimers,
        "Starting claim race"
    );

    let store = Arc::new(RocksStore::open(&config)?);
    let (notifier, mut stale) = ChannelNotifier::for_engine(&config.engine);
    let engine = Arc::new(
        ClaimEngine::new(store, config.engine.clone())?.with_notifier(Arc::new(notifier)),
    );
    let invalidations = tokio::spawn(async move {
        let mut received = 0usize;
        while stale.recv().await.is_some() {
            received += 1;
        }
        received
    });

    let now = Utc::now();
    let listing = engine.post_listing(
        ActorId::new("race-donor"),
        NewListing {
            quantity,
            deadline: Some(now + Duration::minutes(30)),
            details: ListingDetails::titled("Race listing"),
        },
        now,
    )?;

    let handles: Vec<_> = (0..claimers)
        .map(|i| {
            let engine = engine.clone();
            let listing_id = listing.id;
            tokio::spawn(async move {
                engine
                    .claim(listing_id, Some(ActorId::new(format!("racer-{}", i))), Utc::now())
                    .await
            })
        })
        .collect();

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    for handle in handles {
        let label = match handle.await? {
            Ok(_) => "committed",
            Err(failure) => {
                if let ClaimFailure::StoreUnavailable(_) | ClaimFailure::Internal(_) = failure {
                    tracing::warn!(error = %failure, "Operator-visible failure during race");
                }
                failure.as_str()
            }
        };
        *outcomes.entry(label).or_default() += 1;
    }

    let audit = engine
        .audit_listing(&listing.id)?
        .context("listing vanished during race")?;

    // Dropping the engine closes the channel once in-flight signals land
    drop(engine);
    let invalidations = invalidations.await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "listing_id": listing.id,
            "outcomes": outcomes,
            "audit": audit,
            "conserved": audit.is_conserved(),
            "invalidations": invalidations,
        }))?
    );

    if !audit.is_conserved() {
        anyhow::bail!("conservation violated: {:?}", audit);
    }

    tracing::info!("Claim race finished");
    Ok(())
}
