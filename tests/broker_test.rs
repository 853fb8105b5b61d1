//! Account broker integration tests.
//!
//! These exercise the end-to-end scenarios in the broker's design notes: the
//! commit/publish cache round trip, symmetric teardown on account deletion,
//! and reentrant unsubscribe from inside a publish callback.

use std::cell::RefCell;

use arena_broker::broker::event::EventParam;
use arena_broker::{AccountBroker, CriticalSection, HeapArena, ResultCode};

fn new_arena(buf: &mut [u8]) -> HeapArena {
    HeapArena::init(buf, CriticalSection::NONE)
}

thread_local! {
    static LAST_PAYLOAD: RefCell<Vec<u8>> = RefCell::new(Vec::new());
    static UNSUB_TARGET: RefCell<Option<(*const AccountBroker<'static>, &'static str, &'static str)>> =
        RefCell::new(None);
    static DELIVERY_COUNT: RefCell<u32> = RefCell::new(0);
}

fn record_payload(_ctx: *mut u8, event: &EventParam) -> ResultCode {
    // SAFETY: `data`/`size` describe a live byte region for the duration of
    // this callback, as guaranteed by `AccountBroker::publish`.
    let bytes = unsafe { core::slice::from_raw_parts(event.data, event.size) };
    LAST_PAYLOAD.with(|cell| cell.borrow_mut().clear());
    LAST_PAYLOAD.with(|cell| cell.borrow_mut().extend_from_slice(bytes));
    ResultCode::Ok
}

fn count_delivery(_ctx: *mut u8, _event: &EventParam) -> ResultCode {
    DELIVERY_COUNT.with(|cell| *cell.borrow_mut() += 1);
    ResultCode::Ok
}

fn unsubscribe_self(_ctx: *mut u8, _event: &EventParam) -> ResultCode {
    DELIVERY_COUNT.with(|cell| *cell.borrow_mut() += 1);
    UNSUB_TARGET.with(|cell| {
        if let Some((broker_ptr, subscriber, publisher)) = *cell.borrow() {
            // SAFETY: `broker_ptr` is set up by the test below to point at a
            // broker that outlives this callback invocation.
            let broker = unsafe { &*broker_ptr };
            broker.unsubscribe(subscriber, publisher);
        }
    });
    ResultCode::Ok
}

/// Contract: commit then publish delivers the committed bytes to a
/// subscriber with no callback of its own configured on the publisher.
/// Given: account `A` has a 16-byte cache and account `B` has no cache of its
/// own but is subscribed to `A` and has registered a callback.
/// When: `commit(A, ..)` is followed by `publish(A)`.
/// Then: `B`'s callback observes exactly the committed bytes.
#[test]
fn commit_then_publish_delivers_to_subscriber() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("A", 16, core::ptr::null_mut()));
    assert!(broker.create_account("B", 0, core::ptr::null_mut()));
    assert!(broker.subscribe("B", "A"));
    assert!(broker.register_callback("B", record_payload));

    assert!(broker.commit("A", b"ABCDEFGHIJKLMNOP"));
    let result = broker.publish("A");
    assert_eq!(result, ResultCode::Ok);

    LAST_PAYLOAD.with(|cell| {
        assert_eq!(cell.borrow().as_slice(), b"ABCDEFGHIJKLMNOP");
    });
}

/// Contract: publish fails cleanly against an account with no cache, an
/// unknown account, or a cache with nothing committed yet.
#[test]
fn publish_failure_modes_return_the_right_code() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("no_cache", 0, core::ptr::null_mut()));
    assert!(broker.create_account("with_cache", 8, core::ptr::null_mut()));

    assert_eq!(broker.publish("missing"), ResultCode::Unknown);
    assert_eq!(broker.publish("no_cache"), ResultCode::NoCache);
    assert_eq!(broker.publish("with_cache"), ResultCode::NoCommitted);
}

/// Contract: deleting an account tears down both directions of every
/// incident edge.
/// Given: `A`, `B`, `C` with edges `B -> A`, `C -> A`, `A -> C`.
/// When: `A` is deleted.
/// Then: neither `B` nor `C` still lists `A` as a publisher, `C` no longer
/// lists `A` as a subscriber, and the registry count drops by one.
#[test]
fn deleting_an_account_tears_down_symmetric_edges() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("A", 0, core::ptr::null_mut()));
    assert!(broker.create_account("B", 0, core::ptr::null_mut()));
    assert!(broker.create_account("C", 0, core::ptr::null_mut()));

    assert!(broker.subscribe("B", "A"));
    assert!(broker.subscribe("C", "A"));
    assert!(broker.subscribe("A", "C"));

    assert_eq!(broker.account_count(), 3);
    assert!(broker.delete_account("A"));
    assert_eq!(broker.account_count(), 2);

    // `B` and `C` no longer see `A` anywhere, and `A` is simply gone.
    assert!(!broker.unsubscribe("B", "A"));
    assert!(!broker.unsubscribe("C", "A"));
    assert!(!broker.unsubscribe("A", "C"));

    // The remaining accounts are otherwise untouched: B can still be
    // recreated under a fresh edge with C, proving no dangling state leaked.
    assert!(broker.subscribe("B", "C"));
    assert!(broker.unsubscribe("B", "C"));
}

/// Contract: a subscriber's callback may call back into the broker to
/// unsubscribe itself mid-publish without deadlocking or corrupting the
/// dispatch that is already underway.
/// Given: `B` and `C` both subscribe to `A`; `B`'s callback unsubscribes `B`
/// from `A` while it runs.
/// When: `publish(A)` is called once, then a second time.
/// Then: the first publish still reaches both `B` and `C` (the snapshot was
/// taken before the callback ran), and the second publish reaches only `C`.
#[test]
fn reentrant_unsubscribe_during_publish_completes_and_takes_effect_next_time() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("A", 4, core::ptr::null_mut()));
    assert!(broker.create_account("B", 0, core::ptr::null_mut()));
    assert!(broker.create_account("C", 0, core::ptr::null_mut()));
    assert!(broker.subscribe("B", "A"));
    assert!(broker.subscribe("C", "A"));
    assert!(broker.register_callback("C", count_delivery));
    assert!(broker.register_callback("B", unsubscribe_self));

    let broker_ptr: *const AccountBroker<'static> = (&broker as *const AccountBroker<'_>).cast();
    UNSUB_TARGET.with(|cell| *cell.borrow_mut() = Some((broker_ptr, "B", "A")));
    DELIVERY_COUNT.with(|cell| *cell.borrow_mut() = 0);

    assert!(broker.commit("A", b"1111"));
    assert_eq!(broker.publish("A"), ResultCode::Ok);
    // Both B and C were snapshotted before B's callback unsubscribed it.
    DELIVERY_COUNT.with(|cell| assert_eq!(*cell.borrow(), 2));

    assert!(broker.commit("A", b"2222"));
    assert_eq!(broker.publish("A"), ResultCode::Ok);
    // B is gone from the graph now; only C is delivered to.
    DELIVERY_COUNT.with(|cell| assert_eq!(*cell.borrow(), 3));

    UNSUB_TARGET.with(|cell| *cell.borrow_mut() = None);
}

/// Contract: `pull` copies a publisher's committed cache into the caller's
/// buffer when the publisher has no callback of its own.
#[test]
fn pull_copies_committed_cache_with_no_publisher_callback() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("pub", 5, core::ptr::null_mut()));
    assert!(broker.create_account("sub", 0, core::ptr::null_mut()));
    assert!(broker.subscribe("sub", "pub"));
    assert!(broker.commit("pub", b"hello"));

    let mut out = [0u8; 5];
    let code = broker.pull("sub", "pub", &mut out);
    assert_eq!(code, ResultCode::Ok);
    assert_eq!(&out, b"hello");
}

/// Contract: `pull` against a missing edge fails with `NotFound`, and
/// against a size mismatch fails with `SizeMismatch`.
#[test]
fn pull_rejects_missing_edge_and_size_mismatch() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("pub", 5, core::ptr::null_mut()));
    assert!(broker.create_account("sub", 0, core::ptr::null_mut()));

    let mut out = [0u8; 5];
    assert_eq!(broker.pull("sub", "pub", &mut out), ResultCode::NotFound);

    assert!(broker.subscribe("sub", "pub"));
    assert!(broker.commit("pub", b"hello"));
    let mut wrong_size = [0u8; 4];
    assert_eq!(
        broker.pull("sub", "pub", &mut wrong_size),
        ResultCode::SizeMismatch
    );
}

/// Contract: `notify` routes directly to the publisher's callback and fails
/// with `NoCallback` when none is registered.
#[test]
fn notify_routes_to_publisher_callback_or_fails() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("pub", 0, core::ptr::null_mut()));
    assert!(broker.create_account("sub", 0, core::ptr::null_mut()));
    assert!(broker.subscribe("sub", "pub"));

    assert_eq!(
        broker.notify("sub", "pub", b"ping"),
        ResultCode::NoCallback
    );

    assert!(broker.register_callback("pub", record_payload));
    assert_eq!(broker.notify("sub", "pub", b"ping"), ResultCode::Ok);
    LAST_PAYLOAD.with(|cell| assert_eq!(cell.borrow().as_slice(), b"ping"));
}

/// Contract: subscribe/unsubscribe round trips leave the graph structurally
/// identical, reject self-subscription, and reject duplicate edges.
#[test]
fn subscribe_unsubscribe_round_trip_and_rejections() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("A", 0, core::ptr::null_mut()));
    assert!(broker.create_account("B", 0, core::ptr::null_mut()));

    assert!(!broker.subscribe("A", "A"));
    assert!(broker.subscribe("B", "A"));
    assert!(!broker.subscribe("B", "A"), "duplicate edge must be rejected");
    assert!(broker.unsubscribe("B", "A"));
    assert!(!broker.unsubscribe("B", "A"), "edge already removed");

    // Structurally identical to the pre-subscribe state: subscribing again
    // must succeed as though nothing had ever been wired up.
    assert!(broker.subscribe("B", "A"));
}

/// Contract: duplicate account creation is rejected without mutating the
/// registry, and every account in the registry has a distinct id.
#[test]
fn duplicate_account_creation_is_rejected() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("A", 0, core::ptr::null_mut()));
    assert!(!broker.create_account("A", 0, core::ptr::null_mut()));
    assert_eq!(broker.account_count(), 1);
}

/// Contract: `commit` rejects a size that does not match the account's
/// configured buffer size, and rejects committing against an account with
/// no cache at all.
#[test]
fn commit_rejects_size_mismatch_and_missing_cache() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let broker = AccountBroker::init(&arena, CriticalSection::NONE);

    assert!(broker.create_account("A", 4, core::ptr::null_mut()));
    assert!(broker.create_account("B", 0, core::ptr::null_mut()));

    assert!(!broker.commit("A", b"too long"));
    assert!(!broker.commit("B", b"x"));
    assert!(broker.commit("A", b"ABCD"));
}

/// Contract: `deinit` tears down every account and frees all arena memory
/// the registry held, leaving the arena able to serve the whole region again.
#[test]
fn deinit_frees_every_account_and_returns_arena_capacity() {
    let mut buf = [0u8; 4096];
    let arena = new_arena(&mut buf);
    let max_free_before_accounts = arena.max_free_block_size();

    {
        let broker = AccountBroker::init(&arena, CriticalSection::NONE);
        assert!(broker.create_account("A", 16, core::ptr::null_mut()));
        assert!(broker.create_account("B", 32, core::ptr::null_mut()));
        assert!(broker.subscribe("B", "A"));
        broker.deinit();
        assert_eq!(broker.account_count(), 0);
    }

    assert_eq!(arena.max_free_block_size(), max_free_before_accounts);
}
