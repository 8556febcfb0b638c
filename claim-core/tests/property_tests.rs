//! Property-based tests for claim invariants
//!
//! These tests use proptest to verify critical invariants:
//! - No overselling: committed claims <= posted quantity
//! - Conservation: quantity + committed claims == posted quantity
//! - Exhaustion: status flips exactly when quantity reaches zero
//! - Durability: state read back after reopen still conserves

use chrono::{Duration, Utc};
use claim_core::{
    storage::{ClaimLedger, ResourceStore},
    types::{ActorId, ListingDetails, ListingStatus, NewListing},
    ClaimEngine, ClaimFailure, Config, MemoryStore, RocksStore,
};
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for actor names
fn actor_strategy() -> impl Strategy<Value = ActorId> {
    "[a-z]{1,8}".prop_map(ActorId::new)
}

fn new_listing(quantity: u32) -> NewListing {
    NewListing {
        quantity,
        deadline: Some(Utc::now() + Duration::hours(1)),
        details: ListingDetails::titled("Surplus sandwiches"),
    }
}

fn memory_engine() -> Arc<ClaimEngine<MemoryStore>> {
    let config = Config::default();
    Arc::new(ClaimEngine::new(Arc::new(MemoryStore::new()), config.engine).unwrap())
}

fn multi_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: concurrent attempts never oversell and always conserve
    #[test]
    fn prop_no_overselling(quantity in 1u32..20, attempts in 1usize..60) {
        let rt = multi_thread_runtime();
        rt.block_on(async {
            let engine = memory_engine();
            let listing = engine
                .post_listing(ActorId::new("donor"), new_listing(quantity), Utc::now())
                .unwrap();

            let handles: Vec<_> = (0..attempts)
                .map(|i| {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        engine
                            .claim(listing.id, Some(ActorId::new(format!("a{}", i))), Utc::now())
                            .await
                    })
                })
                .collect();

            let mut committed = 0usize;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => committed += 1,
                    Err(failure) => prop_assert_eq!(failure, ClaimFailure::OutOfStock),
                }
            }

            let expected = attempts.min(quantity as usize);
            prop_assert_eq!(committed, expected);

            let stored = engine.listing(&listing.id).unwrap().unwrap();
            let claims = engine.claims_for_listing(&listing.id).unwrap();
            prop_assert_eq!(claims.len(), committed);
            prop_assert_eq!(stored.quantity as usize + claims.len(), quantity as usize);
            prop_assert_eq!(
                stored.status == ListingStatus::Exhausted,
                stored.quantity == 0
            );

            // Ledger sequence numbers are a gapless 1..=n
            let sequences: Vec<u32> = claims.iter().map(|c| c.sequence).collect();
            let gapless: Vec<u32> = (1..=committed as u32).collect();
            prop_assert_eq!(sequences, gapless);
            Ok(())
        })?;
    }

    /// Property: sequential claims descend one unit at a time, then stop
    #[test]
    fn prop_sequential_descent(
        quantity in 1u32..10,
        actors in prop::collection::vec(actor_strategy(), 1..15),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let engine = memory_engine();
            let listing = engine
                .post_listing(ActorId::new("donor"), new_listing(quantity), Utc::now())
                .unwrap();

            for (i, actor) in actors.iter().enumerate() {
                let result = engine.claim(listing.id, Some(actor.clone()), Utc::now()).await;
                let stored = engine.listing(&listing.id).unwrap().unwrap();

                if (i as u32) < quantity {
                    prop_assert!(result.is_ok());
                    prop_assert_eq!(stored.quantity, quantity - i as u32 - 1);
                } else {
                    prop_assert_eq!(result, Err(ClaimFailure::OutOfStock));
                    prop_assert_eq!(stored.quantity, 0);
                }

                prop_assert_eq!(
                    stored.status,
                    ListingStatus::from_quantity(stored.quantity)
                );
            }

            let audit = engine.audit_listing(&listing.id).unwrap().unwrap();
            prop_assert!(audit.is_conserved());
            Ok(())
        })?;
    }
}

#[test]
fn test_rocks_race_survives_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;

    let rt = multi_thread_runtime();
    let listing_id = rt.block_on(async {
        let store = Arc::new(RocksStore::open(&config).unwrap());
        let engine = Arc::new(ClaimEngine::new(store, config.engine.clone()).unwrap());
        let listing = engine
            .post_listing(ActorId::new("donor"), new_listing(5), Utc::now())
            .unwrap();

        let handles: Vec<_> = (0..40)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .claim(listing.id, Some(ActorId::new(format!("r{}", i))), Utc::now())
                        .await
                })
            })
            .collect();

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                committed += 1;
            }
        }
        assert_eq!(committed, 5);
        listing.id
    });
    drop(rt);

    // Every engine/store handle is gone; reopen from disk
    let store = RocksStore::open(&config).unwrap();
    let stored = store.get(&listing_id).unwrap().unwrap();
    assert_eq!(stored.quantity, 0);
    assert_eq!(stored.status, ListingStatus::Exhausted);
    assert_eq!(store.count_by_listing(&listing_id).unwrap(), 5);
    assert_eq!(store.list_by_listing(&listing_id).unwrap().len(), 5);
}
