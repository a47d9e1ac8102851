//! End-to-end decryption scenarios.
//!
//! Each test builds the device state of one reader (store, channel,
//! environment), runs the orchestrator, and ends with oracle checks on:
//! - the result and its provenance
//! - which network paths were taken (queries, subscriptions, resolves)
//! - that no subscription outlives the attempt

mod common;

use std::time::Duration;

use common::{Account, IV, Post, World, content_key, post_id, share_for, write_post};
use veilpost_core::{
    AddressedShare, DecryptError, DecryptionEvent, DecryptionRequest, DecryptionResult,
    DecryptionTask, ExchangeChannel, FailureReason, IgnoreProgress, KeyStore, Progress,
    Provenance,
};
use veilpost_crypto::{LocalKey, SymmetricKey, strategy_for};
use veilpost_proto::{PAYLOAD_MARKER, PayloadVersion, PersonIdentifier};

fn cast() -> (Account, Account, Account) {
    (Account::new("alice", 1), Account::new("bob", 2), Account::new("carol", 3))
}

fn request(post: &Post, author: &Account, me: &Account) -> DecryptionRequest {
    DecryptionRequest { payload: post.text.clone(), author: author.id.clone(), me: me.id.clone() }
}

/// `reader`'s device, already knowing `author`'s public key.
fn reader_world(reader: &Account, author: &Account) -> World {
    let world = World::with_account(reader);
    world.store.put_public_key(author.id.clone(), author.public());
    world
}

async fn decrypt_collecting(
    world: &World,
    request: DecryptionRequest,
) -> (DecryptionResult, Vec<Progress>) {
    let mut seen = Vec::new();
    let result = world.decryptor().decrypt(request, &mut |p: Progress| seen.push(p)).await.unwrap();
    (result, seen)
}

async fn next_progress(task: &mut DecryptionTask) -> Progress {
    match task.next_event().await.unwrap() {
        Some(DecryptionEvent::Progress(progress)) => progress,
        other => panic!("expected progress, got {other:?}"),
    }
}

#[tokio::test]
async fn recipient_opens_published_share() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "hello bob");
    world.publish_share(&post, &alice, &bob).await;

    let (result, progress) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result, DecryptionResult::Success {
        plaintext: "hello bob".to_string(),
        signature_verified: true,
        provenance: vec![Provenance::NormalDecrypted],
    });
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0], Progress::FindingPostKey);
    assert!(matches!(progress[1], Progress::FindingHash { .. }));

    // Oracle: the key was cached and nothing stayed subscribed
    assert_eq!(world.store.cached_post_key(&post_id()).await.unwrap(), Some(content_key()));
    assert_eq!(world.channel.query_count(), 1);
    assert_eq!(world.channel.share_subscription_count(), 1);
    assert_eq!(world.channel.open_subscriptions(), 0);
}

#[tokio::test]
async fn second_read_comes_from_cache() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha38, &alice, "twice");
    world.publish_share(&post, &alice, &bob).await;

    let (first, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;
    let (second, progress) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(first.plaintext(), Some("twice"));
    assert_eq!(second, DecryptionResult::Success {
        plaintext: "twice".to_string(),
        signature_verified: true,
        provenance: vec![Provenance::PostKeyCached],
    });
    assert!(progress.is_empty());

    // Oracle: the cache hit performed no network key lookup
    assert_eq!(world.channel.query_count(), 1);
}

#[tokio::test]
async fn cache_hit_without_author_key_is_degraded_success() {
    let (alice, bob, _) = cast();
    let world = World::with_account(&bob);
    let post = write_post(PayloadVersion::Alpha39, &alice, "unverified");
    world.store.put_cached_post_key(&post_id(), &content_key(), &alice.id).await.unwrap();

    let (result, progress) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result, DecryptionResult::Success {
        plaintext: "unverified".to_string(),
        signature_verified: false,
        provenance: vec![Provenance::AuthorKeyNotFound, Provenance::PostKeyCached],
    });
    assert_eq!(progress, vec![Progress::FindingPersonPublicKey]);
    assert_eq!(world.store.resolve_calls(), 1);
    assert_eq!(world.channel.key_subscription_count(), 0);
    assert_eq!(world.channel.query_count(), 0);
}

#[tokio::test]
async fn cached_key_that_does_not_open_fails() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "secret");
    let wrong = SymmetricKey::new([1; 32]);
    world.store.put_cached_post_key(&post_id(), &wrong, &alice.id).await.unwrap();

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result.failure_reason(), Some(FailureReason::DecryptionFailed));
}

#[tokio::test]
async fn author_reopens_own_post() {
    let (alice, ..) = cast();

    for version in PayloadVersion::ALL {
        // Same iv across versions, so each needs an empty post cache
        let world = World::with_account(&alice);
        let post = write_post(version, &alice, "my own words");
        let (result, progress) = decrypt_collecting(&world, request(&post, &alice, &alice)).await;

        assert_eq!(result, DecryptionResult::Success {
            plaintext: "my own words".to_string(),
            signature_verified: true,
            provenance: vec![Provenance::NormalDecrypted],
        });
        assert!(progress.is_empty());

        // Oracle: own identity is never resolved or looked up remotely
        assert_eq!(world.store.resolve_calls(), 0);
        assert_eq!(world.channel.query_count(), 0);
        assert_eq!(world.channel.key_subscription_count(), 0);
    }
}

#[tokio::test]
async fn post_from_another_own_identity_opens_with_my_local_key() {
    let (_, bob, _) = cast();
    // Same person posting as "bob-work" with bob's local key
    let work = Account { local: bob.local.clone(), ..Account::new("bob-work", 4) };
    let world = reader_world(&bob, &work);
    let post = write_post(PayloadVersion::Alpha39, &work, "from work");

    let (result, _) = decrypt_collecting(&world, request(&post, &work, &bob)).await;

    assert_eq!(result.plaintext(), Some("from work"));
    assert_eq!(world.channel.query_count(), 0);
}

#[tokio::test]
async fn own_post_that_no_longer_opens_fails() {
    let (alice, ..) = cast();
    let world = World::with_account(&alice);
    let stale = Account { local: LocalKey::new([0xEE; 32]), ..alice.clone() };
    let post = write_post(PayloadVersion::Alpha39, &stale, "lost");

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &alice)).await;

    assert_eq!(result.failure_reason(), Some(FailureReason::SelfDecryptionFailed));
    assert_eq!(world.channel.query_count(), 0);
}

#[tokio::test]
async fn reader_without_account_is_not_set_up() {
    let (alice, bob, _) = cast();
    let world = World::new();
    world.store.put_public_key(alice.id.clone(), alice.public());
    let post = write_post(PayloadVersion::Alpha39, &alice, "hi");

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result.failure_reason(), Some(FailureReason::AccountNotSetUp));
    assert_eq!(world.channel.query_count(), 0);
}

#[tokio::test]
async fn ordinary_text_is_unknown_payload() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let req = DecryptionRequest {
        payload: "just a normal post".to_string(),
        author: alice.id.clone(),
        me: bob.id.clone(),
    };

    let (result, progress) = decrypt_collecting(&world, req).await;

    assert_eq!(result.failure_reason(), Some(FailureReason::UnknownPayload));
    assert!(progress.is_empty());

    // Oracle: nothing was looked up anywhere
    assert_eq!(world.store.resolve_calls(), 0);
    assert_eq!(world.channel.query_count(), 0);
    assert_eq!(world.channel.share_subscription_count(), 0);
    assert_eq!(world.channel.key_subscription_count(), 0);
}

#[tokio::test]
async fn undecodable_payloads_are_unknown_without_lookups() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let unsupported_tag = format!("{PAYLOAD_MARKER}1/4|AQID|CQkJ|Y2lwaGVy|:||");
    let missing_field = format!("{PAYLOAD_MARKER}3/4|AQID|CQkJ|Y2lwaGVy:||");
    let extra_field = format!("{PAYLOAD_MARKER}3/4|AQID|CQkJ|Y2lwaGVy||AQ==:||");

    for payload in [unsupported_tag, missing_field, extra_field] {
        let req = DecryptionRequest { payload, author: alice.id.clone(), me: bob.id.clone() };
        let (result, progress) = decrypt_collecting(&world, req).await;

        assert_eq!(result.failure_reason(), Some(FailureReason::UnknownPayload));
        assert!(progress.is_empty());
    }

    assert_eq!(world.store.resolve_calls(), 0);
    assert_eq!(world.channel.query_count(), 0);
    assert_eq!(world.channel.share_subscription_count(), 0);
    assert_eq!(world.channel.key_subscription_count(), 0);
}

#[tokio::test]
async fn share_with_wrong_content_key_fails() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "hi");

    let crypto = strategy_for(PayloadVersion::Alpha39);
    let wrong = SymmetricKey::new([1; 32]);
    let share = crypto
        .wrap_for_recipient(&wrong, &IV, &alice.pair, &bob.public(), vec![5; 16])
        .unwrap();
    let lookup = crypto.share_lookup(&post_id(), &bob.id, &bob.public());
    let shares = vec![AddressedShare { lookup, share }];
    world.channel.publish_key_shares(PayloadVersion::Alpha39, &post_id(), shares).await.unwrap();

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result.failure_reason(), Some(FailureReason::DecryptionFailed));
    assert_eq!(world.store.cached_post_key(&post_id()).await.unwrap(), None);
}

#[tokio::test]
async fn legacy_post_without_share_never_subscribes() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha40, &alice, "old");

    let (result, progress) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result.failure_reason(), Some(FailureReason::NotShareTarget));
    // -40 lookups are by recipient, so no hash progress either
    assert_eq!(progress, vec![Progress::FindingPostKey]);
    assert_eq!(world.channel.share_subscription_count(), 0);
}

#[tokio::test]
async fn legacy_share_still_opens() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha40, &alice, "old but gold");
    world.publish_share(&post, &alice, &bob).await;

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result, DecryptionResult::Success {
        plaintext: "old but gold".to_string(),
        signature_verified: true,
        provenance: vec![Provenance::NormalDecrypted],
    });
}

#[tokio::test]
async fn unsigned_post_is_unverified() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let mut post = write_post(PayloadVersion::Alpha39, &alice, "no signature");
    post.payload = post.payload.with_signature(Vec::new());
    post.text = post.payload.encode().unwrap();
    world.publish_share(&post, &alice, &bob).await;

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result, DecryptionResult::Success {
        plaintext: "no signature".to_string(),
        signature_verified: false,
        provenance: vec![Provenance::NormalDecrypted],
    });
}

#[tokio::test]
async fn signature_from_someone_else_is_unverified() {
    let (alice, bob, carol) = cast();
    let world = reader_world(&bob, &alice);
    let mut post = write_post(PayloadVersion::Alpha39, &alice, "forged");
    let forged = carol.pair.sign(&post.payload.signable_bytes());
    post.payload = post.payload.with_signature(forged.to_vec());
    post.text = post.payload.encode().unwrap();
    world.publish_share(&post, &alice, &bob).await;

    let (result, _) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result.plaintext(), Some("forged"));
    assert!(matches!(result, DecryptionResult::Success { signature_verified: false, .. }));
}

#[tokio::test]
async fn author_key_resolved_from_directory() {
    let (alice, bob, _) = cast();
    let world = World::with_account(&bob);
    world.store.publish_profile(alice.id.clone(), alice.public());
    let post = write_post(PayloadVersion::Alpha39, &alice, "found you");
    world.publish_share(&post, &alice, &bob).await;

    let (result, progress) = decrypt_collecting(&world, request(&post, &alice, &bob)).await;

    assert_eq!(result.plaintext(), Some("found you"));
    assert_eq!(progress[0], Progress::FindingPersonPublicKey);
    assert_eq!(progress[1], Progress::FindingPostKey);
    assert_eq!(world.store.public_key_of(&alice.id).await.unwrap(), Some(alice.public()));
}

#[tokio::test]
async fn late_share_arrives_through_subscription() {
    let (alice, bob, carol) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "worth the wait");
    let mut task = world.decryptor().spawn(request(&post, &alice, &bob));

    assert_eq!(next_progress(&mut task).await, Progress::FindingPostKey);
    assert!(matches!(next_progress(&mut task).await, Progress::FindingHash { .. }));
    assert_eq!(next_progress(&mut task).await, Progress::AwaitingKeyShare);
    assert_eq!(world.channel.open_subscriptions(), 1);

    // A share for someone else under bob's lookup is skipped
    let crypto = strategy_for(PayloadVersion::Alpha39);
    let lookup = crypto.share_lookup(&post_id(), &bob.id, &bob.public());
    let stray = AddressedShare { lookup, share: share_for(&post, &alice, &carol) };
    let channel = &world.channel;
    channel.publish_key_shares(PayloadVersion::Alpha39, &post_id(), vec![stray]).await.unwrap();
    world.publish_share(&post, &alice, &bob).await;

    let finished = task.next_event().await.unwrap();
    assert_eq!(
        finished,
        Some(DecryptionEvent::Finished(DecryptionResult::Success {
            plaintext: "worth the wait".to_string(),
            signature_verified: true,
            provenance: vec![Provenance::NormalDecrypted],
        }))
    );
    assert_eq!(task.next_event().await.unwrap(), None);

    // Oracle: the winning share cancelled the subscription
    assert_eq!(world.channel.open_subscriptions(), 0);
    assert_eq!(world.store.cached_post_key(&post_id()).await.unwrap(), Some(content_key()));
}

#[tokio::test]
async fn share_published_just_after_the_query_still_opens() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "just in time");
    let crypto = strategy_for(PayloadVersion::Alpha39);
    let lookup = crypto.share_lookup(&post_id(), &bob.id, &bob.public());
    let share = share_for(&post, &alice, &bob);
    world.channel.publish_after_next_query(vec![AddressedShare { lookup, share }]);

    let decrypt = decrypt_collecting(&world, request(&post, &alice, &bob));
    let (result, progress) = tokio::time::timeout(Duration::from_secs(5), decrypt).await.unwrap();

    assert_eq!(result.plaintext(), Some("just in time"));
    assert_eq!(progress.last(), Some(&Progress::AwaitingKeyShare));
    assert_eq!(world.channel.query_count(), 1);
    assert_eq!(world.channel.share_subscription_count(), 1);
    assert_eq!(world.channel.open_subscriptions(), 0);
}

#[tokio::test]
async fn reader_on_another_network_looks_up_the_authors_post() {
    let (alice, bob, _) = cast();
    let traveller = Account {
        id: PersonIdentifier::new("elsewhere.org", "bob").unwrap(),
        ..bob.clone()
    };
    let world = reader_world(&traveller, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "across networks");
    world.publish_share(&post, &alice, &bob).await;

    let decrypt = decrypt_collecting(&world, request(&post, &alice, &traveller));
    let (result, _) = tokio::time::timeout(Duration::from_secs(5), decrypt).await.unwrap();

    // The post and its cached key belong to the author's network
    assert_eq!(result.plaintext(), Some("across networks"));
    assert_eq!(world.store.cached_post_key(&post_id()).await.unwrap(), Some(content_key()));
}

#[tokio::test]
async fn closed_subscription_is_not_share_target() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha38, &alice, "never shared");
    let mut task = world.decryptor().spawn(request(&post, &alice, &bob));

    while next_progress(&mut task).await != Progress::AwaitingKeyShare {}
    world.channel.close_share_subscriptions();

    let finished = task.next_event().await.unwrap();
    assert_eq!(
        finished,
        Some(DecryptionEvent::Finished(DecryptionResult::Failure {
            reason: FailureReason::NotShareTarget,
        }))
    );
}

#[tokio::test]
async fn dropping_task_cancels_its_subscription() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "abandoned");
    let mut task = world.decryptor().spawn(request(&post, &alice, &bob));

    while next_progress(&mut task).await != Progress::AwaitingKeyShare {}
    assert_eq!(world.channel.open_subscriptions(), 1);
    drop(task);

    for _ in 0..10 {
        if world.channel.open_subscriptions() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(world.channel.open_subscriptions(), 0);
}

#[tokio::test]
async fn aborted_task_reports_task_failed() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "aborted");
    let mut task = world.decryptor().spawn(request(&post, &alice, &bob));

    while next_progress(&mut task).await != Progress::AwaitingKeyShare {}
    task.abort();

    let outcome = loop {
        match task.next_event().await {
            Ok(Some(DecryptionEvent::Progress(_))) => {},
            other => break other,
        }
    };
    assert!(matches!(outcome, Err(DecryptError::TaskFailed(_))));
}

#[tokio::test]
async fn offline_channel_is_an_infrastructure_error() {
    let (alice, bob, _) = cast();
    let world = reader_world(&bob, &alice);
    let post = write_post(PayloadVersion::Alpha39, &alice, "offline");
    world.channel.set_offline(true);

    let decryptor = world.decryptor();
    let outcome = decryptor.decrypt(request(&post, &alice, &bob), &mut IgnoreProgress).await;

    let err = outcome.unwrap_err();
    assert!(err.is_transient());
    assert!(matches!(err, DecryptError::Channel(_)));
}
