//! Author key discovery against the in-memory store and channel.

mod common;

use std::time::Duration;

use common::{Account, SimEnv, World, write_post};
use proptest::prelude::*;
use veilpost_core::{
    DecryptionRequest, DecryptorConfig, Discovery, DiscoveryConfig, FailureReason, KeyDiscovery,
    Progress,
};
use veilpost_proto::PayloadVersion;

fn bounded(max_attempts: u32) -> DiscoveryConfig {
    DiscoveryConfig { max_attempts, wakeup_timeout: Some(Duration::from_secs(1)) }
}

#[tokio::test]
async fn known_key_needs_no_attempts() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    world.store.put_public_key(alice.id.clone(), alice.public());
    let config = DiscoveryConfig::default();
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);

    let mut seen = Vec::new();
    let found = discovery
        .discover_author_public_key(&alice.id, false, &mut |p: Progress| seen.push(p))
        .await
        .unwrap();

    assert_eq!(found, Discovery::Found(alice.public()));
    assert!(seen.is_empty());
    assert_eq!(world.store.resolve_calls(), 0);
}

#[tokio::test]
async fn cache_fallback_stops_after_one_resolve() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    world.store.set_resolve_failure(true);
    let config = DiscoveryConfig::default();
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);

    let mut seen = Vec::new();
    let outcome = discovery
        .discover_author_public_key(&alice.id, true, &mut |p: Progress| seen.push(p))
        .await;

    // Resolution failures are not errors
    assert_eq!(outcome.unwrap(), Discovery::UseCache);
    assert_eq!(seen, vec![Progress::FindingPersonPublicKey]);
    assert_eq!(world.store.resolve_calls(), 1);
    assert_eq!(world.channel.key_subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_takes_exactly_the_attempt_bound() {
    let (alice, bob) = (Account::new("alice", 1), Account::new("bob", 2));
    let world = World::with_account(&bob);
    let config = DecryptorConfig { discovery: bounded(10) };
    let post = write_post(PayloadVersion::Alpha39, &alice, "who wrote this");
    let request =
        DecryptionRequest { payload: post.text, author: alice.id.clone(), me: bob.id.clone() };

    let mut seen = Vec::new();
    let result = world
        .decryptor_with(config)
        .decrypt(request, &mut |p: Progress| seen.push(p))
        .await
        .unwrap();

    assert_eq!(result.failure_reason(), Some(FailureReason::AuthorKeyNotFound));
    assert_eq!(world.store.resolve_calls(), 10);
    assert_eq!(seen, vec![Progress::FindingPersonPublicKey; 10]);

    // Oracle: every race tore down both of its subscriptions
    assert_eq!(world.channel.key_subscription_count(), 10);
    assert_eq!(world.channel.open_subscriptions(), 0);
    assert_eq!(world.store.watcher_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn keyless_store_change_wakes_the_next_attempt() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    let config = bounded(3);
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);

    let poke = async {
        tokio::task::yield_now().await;
        world.store.touch_person(&alice.id);
    };
    let mut ignore = |_: Progress| {};
    let (outcome, ()) = tokio::join!(
        discovery.discover_author_public_key(&alice.id, false, &mut ignore),
        poke
    );

    // The touch carried no key, so discovery kept going until the bound
    assert_eq!(outcome.unwrap(), Discovery::OutOfChance);
    assert_eq!(world.store.resolve_calls(), 3);
}

#[tokio::test]
async fn channel_announcement_wins_the_race() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    let config = DiscoveryConfig::default();
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);

    let announce = async {
        tokio::task::yield_now().await;
        world.channel.announce_public_key(alice.id.clone(), alice.public());
    };
    let mut ignore = |_: Progress| {};
    let (outcome, ()) = tokio::join!(
        discovery.discover_author_public_key(&alice.id, false, &mut ignore),
        announce
    );

    assert_eq!(outcome.unwrap(), Discovery::Found(alice.public()));
    assert_eq!(world.store.resolve_calls(), 1);
    assert_eq!(world.channel.open_subscriptions(), 0);
    assert_eq!(world.store.watcher_count(), 0);
}

#[tokio::test]
async fn store_learning_the_key_wins_the_race() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    let config = DiscoveryConfig::default();
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);

    let learn = async {
        tokio::task::yield_now().await;
        world.store.put_public_key(alice.id.clone(), alice.public());
    };
    let mut ignore = |_: Progress| {};
    let (outcome, ()) = tokio::join!(
        discovery.discover_author_public_key(&alice.id, false, &mut ignore),
        learn
    );

    assert_eq!(outcome.unwrap(), Discovery::Found(alice.public()));
    assert_eq!(world.channel.open_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn key_learned_while_resolving_wakes_the_wait() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    world.store.learn_after_next_resolve(alice.id.clone(), alice.public());
    let config = DiscoveryConfig::default();
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);

    let mut ignore = |_: Progress| {};
    let search = discovery.discover_author_public_key(&alice.id, false, &mut ignore);
    let outcome = tokio::time::timeout(Duration::from_secs(60), search).await.unwrap();

    assert_eq!(outcome.unwrap(), Discovery::Found(alice.public()));
    assert_eq!(world.store.resolve_calls(), 1);
    assert_eq!(world.channel.open_subscriptions(), 0);
    assert_eq!(world.store.watcher_count(), 0);
}

#[tokio::test]
async fn key_already_on_channel_is_replayed() {
    let alice = Account::new("alice", 1);
    let world = World::new();
    world.channel.announce_public_key(alice.id.clone(), alice.public());
    let config = DiscoveryConfig::default();
    let env = SimEnv::with_seed(7);
    let discovery = KeyDiscovery::new(&world.store, &world.channel, &env, &config);

    let outcome =
        discovery.discover_author_public_key(&alice.id, false, &mut |_: Progress| {}).await;

    assert_eq!(outcome.unwrap(), Discovery::Found(alice.public()));
    assert_eq!(world.store.resolve_calls(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_unknown_author_uses_every_attempt(bound in 1u32..=12) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let alice = Account::new("alice", 1);
        let world = World::new();
        let config = bounded(bound);

        let mut failed_attempts = 0u32;
        let outcome = runtime.block_on(async {
            let discovery = KeyDiscovery::new(&world.store, &world.channel, &world.env, &config);
            discovery
                .discover_author_public_key(&alice.id, false, &mut |_: Progress| {
                    failed_attempts += 1;
                })
                .await
        });

        prop_assert_eq!(outcome.unwrap(), Discovery::OutOfChance);
        prop_assert_eq!(failed_attempts, bound);
        prop_assert_eq!(world.store.resolve_calls(), bound as usize);
        prop_assert_eq!(world.channel.open_subscriptions(), 0);
    }
}
