//! Engine-level properties.
//!
//! Properties verified:
//! - A create/update/delete sequence maps to announce, replacing announce,
//!   withdraw
//! - Re-applying an event issues no further speaker calls
//! - Attribute-only changes never withdraw
//! - Events at or below the known revision are no-ops
//! - A failing route does not hold back others in the same cycle
//! - A resync that drops a route withdraws it exactly once
//! - Announcements sharing a prefix hand it over without a withdraw, and
//!   the speaker keeps the newest one

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use common::{announcement, announces, engine, prefix, with_community, withdraws};
use corebgp_core::{Revision, WatchEvent};
use corebgp_reconciler::{EventOutcome, RouteState};
use corebgp_speaker::{MemorySpeaker, SpeakerCall};

// ==========================================================================
// Create, update, delete
// ==========================================================================

#[tokio::test]
async fn next_hop_change_is_single_replacing_announce() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(v1.clone()));
    engine.reconcile_once().await;
    assert_eq!(
        speaker.calls().await,
        vec![SpeakerCall::Announce {
            route: v1.route(),
            replaces: None
        }]
    );

    let v2 = announcement("a", "10.0.0.0/24", "192.0.2.2", 2);
    engine.apply_event(WatchEvent::modified(v2.clone()));
    engine.reconcile_once().await;
    assert_eq!(
        speaker.calls().await[1],
        SpeakerCall::Announce {
            route: v2.route(),
            replaces: Some(v1.route().key)
        }
    );
    assert_eq!(withdraws(&speaker.calls().await), 0);
    assert_eq!(engine.tracker().len(), 1);

    engine.apply_event(WatchEvent::deleted(v2.clone(), Revision::new(3)));
    engine.reconcile_once().await;
    assert_eq!(
        speaker.calls().await[2],
        SpeakerCall::Withdraw {
            key: v2.route().key
        }
    );
    assert_eq!(speaker.calls().await.len(), 3);
    assert!(speaker.rib().await.is_empty());
    assert!(engine.tracker().is_empty());
}

#[tokio::test]
async fn replaying_first_event_yields_two_calls() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let v2 = announcement("a", "10.0.0.0/24", "192.0.2.2", 2);

    for event in [
        WatchEvent::added(v1.clone()),
        WatchEvent::added(v1),
        WatchEvent::modified(v2),
    ] {
        engine.apply_event(event);
        engine.reconcile_once().await;
    }

    let calls = speaker.calls().await;
    assert_eq!(calls.len(), 2);
    assert_eq!(withdraws(&calls), 0);
}

#[tokio::test]
async fn prefix_change_announces_before_withdrawing() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(v1.clone()));
    engine.reconcile_once().await;

    let v2 = announcement("a", "10.0.1.0/24", "192.0.2.1", 2);
    engine.apply_event(WatchEvent::modified(v2.clone()));
    let report = engine.reconcile_once().await;

    assert_eq!(report.announced, vec![v2.route().key]);
    assert_eq!(report.withdrawn, vec![v1.route().key]);
    let calls = speaker.calls().await;
    assert!(!calls[1].is_withdraw());
    assert!(calls[2].is_withdraw());

    let rib = speaker.rib().await;
    assert_eq!(rib.len(), 1);
    assert!(rib.contains_key(&prefix("10.0.1.0/24")));
}

// ==========================================================================
// PROPERTY: Idempotence
// ==========================================================================

#[tokio::test]
async fn duplicate_event_issues_no_calls() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    assert_eq!(
        engine.apply_event(WatchEvent::added(v1.clone())),
        EventOutcome::Applied
    );
    engine.reconcile_once().await;

    assert_eq!(engine.apply_event(WatchEvent::added(v1)), EventOutcome::Stale);
    let report = engine.reconcile_once().await;

    assert!(report.is_idle());
    assert_eq!(speaker.calls().await.len(), 1);
}

#[tokio::test]
async fn unchanged_route_at_newer_revision_issues_no_calls() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    engine.apply_event(WatchEvent::added(announcement("a", "10.0.0.0/24", "192.0.2.1", 1)));
    engine.reconcile_once().await;

    let outcome =
        engine.apply_event(WatchEvent::modified(announcement("a", "10.0.0.0/24", "192.0.2.1", 2)));
    assert_eq!(outcome, EventOutcome::Unchanged);
    assert!(engine.reconcile_once().await.is_idle());
    assert_eq!(speaker.calls().await.len(), 1);
}

// ==========================================================================
// PROPERTY: No false withdrawal
// ==========================================================================

#[tokio::test]
async fn attribute_change_never_withdraws() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(v1.clone()));
    engine.reconcile_once().await;

    let v2 = with_community(announcement("a", "10.0.0.0/24", "192.0.2.1", 2), 100);
    engine.apply_event(WatchEvent::modified(v2.clone()));
    assert_eq!(
        engine.tracker().get(&v2.route().key).unwrap().state,
        RouteState::Pending
    );
    engine.reconcile_once().await;

    let calls = speaker.calls().await;
    assert_eq!(withdraws(&calls), 0);
    assert_eq!(
        calls.last().unwrap(),
        &SpeakerCall::Announce {
            route: v2.route(),
            replaces: None
        }
    );
    assert_eq!(speaker.rib().await[&v2.prefix], v2.route());
}

// ==========================================================================
// PROPERTY: Stale rejection
// ==========================================================================

#[tokio::test]
async fn older_or_equal_revision_is_noop() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let current = announcement("a", "10.0.0.0/24", "192.0.2.1", 5);
    engine.apply_event(WatchEvent::added(current.clone()));
    engine.reconcile_once().await;

    let older = announcement("a", "10.0.0.0/24", "192.0.2.9", 3);
    assert_eq!(engine.apply_event(WatchEvent::modified(older)), EventOutcome::Stale);
    let equal = announcement("a", "10.0.0.0/24", "192.0.2.8", 5);
    assert_eq!(engine.apply_event(WatchEvent::modified(equal)), EventOutcome::Stale);
    assert_eq!(
        engine.apply_event(WatchEvent::deleted(current.clone(), Revision::new(4))),
        EventOutcome::Stale
    );

    assert!(engine.reconcile_once().await.is_idle());
    assert_eq!(engine.desired().get(&current.key()), Some(&current));
    assert_eq!(speaker.calls().await.len(), 1);
    assert_eq!(engine.snapshot().stale_events, 3);
}

#[tokio::test]
async fn replayed_add_after_delete_is_stale() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(v1.clone()));
    engine.apply_event(WatchEvent::deleted(v1.clone(), Revision::new(2)));
    assert_eq!(engine.apply_event(WatchEvent::added(v1)), EventOutcome::Stale);

    engine.reconcile_once().await;
    assert!(speaker.calls().await.is_empty());
    assert!(engine.tracker().is_empty());
}

// ==========================================================================
// PROPERTY: Partial failure isolation
// ==========================================================================

#[tokio::test(start_paused = true)]
async fn failing_route_does_not_block_others() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let b = announcement("b", "10.0.1.0/24", "192.0.2.1", 2);
    speaker.fail_prefix(a.prefix).await;

    engine.apply_event(WatchEvent::added(a.clone()));
    engine.apply_event(WatchEvent::added(b.clone()));
    let report = engine.reconcile_once().await;

    assert_eq!(report.announced, vec![b.route().key]);
    assert_eq!(report.failed, vec![a.route().key]);
    assert_eq!(
        engine.tracker().get(&a.route().key).unwrap().state,
        RouteState::Pending
    );
    assert!(speaker.rib().await.contains_key(&b.prefix));

    speaker.heal_prefix(a.prefix).await;
    tokio::time::advance(Duration::from_secs(1)).await;
    let report = engine.reconcile_once().await;

    assert_eq!(report.announced, vec![a.route().key]);
    assert_eq!(speaker.rib().await.len(), 2);
    assert!(engine.snapshot().is_converged());
}

#[tokio::test(start_paused = true)]
async fn failed_route_waits_for_backoff() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    speaker.fail_prefix(a.prefix).await;
    engine.apply_event(WatchEvent::added(a.clone()));
    let first = engine.reconcile_once().await;
    assert_eq!(first.failed.len(), 1);

    // Deferred until its due instant; the immediate next cycle leaves it.
    let (_, due) = first.deferred[0];
    if due > tokio::time::Instant::now() {
        let second = engine.reconcile_once().await;
        assert_eq!(second.calls(), 0);
        assert_eq!(second.deferred.len(), 1);
    }
    assert_eq!(speaker.calls().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_mark_route_degraded() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let b = announcement("b", "10.0.1.0/24", "192.0.2.1", 2);
    speaker.fail_prefix(a.prefix).await;
    engine.apply_event(WatchEvent::added(a.clone()));
    engine.apply_event(WatchEvent::added(b));

    for _ in 0..3 {
        engine.reconcile_once().await;
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    let status = engine.snapshot();
    assert_eq!(status.degraded.len(), 1);
    assert_eq!(status.degraded[0].key, a.route().key);
    assert_eq!(status.degraded[0].failures, 3);
    assert_eq!(status.advertised, 1);
    assert!(!status.is_healthy());

    // Still retried after being flagged.
    speaker.heal_prefix(a.prefix).await;
    engine.reconcile_once().await;
    let status = engine.snapshot();
    assert!(status.degraded.is_empty());
    assert_eq!(status.advertised, 2);
}

// ==========================================================================
// PROPERTY: Resync completeness
// ==========================================================================

#[tokio::test]
async fn resync_omitting_route_withdraws_it_once() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let b = announcement("b", "10.0.1.0/24", "192.0.2.1", 2);
    engine.apply_event(WatchEvent::added(a.clone()));
    engine.apply_event(WatchEvent::added(b.clone()));
    engine.reconcile_once().await;
    speaker.clear_calls().await;

    // Stream dropped; `a` was deleted while disconnected.
    engine.apply_event(WatchEvent::error("connection reset"));
    let outcome = engine.apply_event(WatchEvent::resynced(vec![b], Revision::new(4)));
    assert_eq!(
        outcome,
        EventOutcome::Resynced {
            dirty: 0,
            withdrawing: 1
        }
    );

    engine.reconcile_once().await;
    engine.reconcile_once().await;

    assert_eq!(
        speaker.calls().await,
        vec![SpeakerCall::Withdraw {
            key: a.route().key
        }]
    );
    assert_eq!(speaker.rib().await.len(), 1);

    let status = engine.snapshot();
    assert_eq!(status.stream_errors, 1);
    assert_eq!(status.resyncs, 1);
    assert_eq!(status.revision, Revision::new(4));
}

#[tokio::test]
async fn resync_with_moved_next_hop_replaces_without_withdraw() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let v1 = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(v1.clone()));
    engine.reconcile_once().await;
    speaker.clear_calls().await;

    let v2 = announcement("a", "10.0.0.0/24", "192.0.2.2", 7);
    engine.apply_event(WatchEvent::resynced(vec![v2.clone()], Revision::new(7)));
    engine.reconcile_once().await;

    assert_eq!(
        speaker.calls().await,
        vec![SpeakerCall::Announce {
            route: v2.route(),
            replaces: Some(v1.route().key)
        }]
    );
    assert_eq!(engine.tracker().len(), 1);
}

#[tokio::test]
async fn resync_matching_state_is_quiet() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(a.clone()));
    engine.reconcile_once().await;

    engine.apply_event(WatchEvent::resynced(vec![a], Revision::new(1)));
    assert!(engine.reconcile_once().await.is_idle());
    assert_eq!(speaker.calls().await.len(), 1);
}

#[tokio::test]
async fn delete_before_first_announce_issues_nothing() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    engine.apply_event(WatchEvent::added(a.clone()));
    engine.apply_event(WatchEvent::deleted(a, Revision::new(2)));

    assert!(engine.reconcile_once().await.is_idle());
    assert!(speaker.calls().await.is_empty());
    assert_eq!(announces(&speaker.calls().await), 0);
}

#[tokio::test]
async fn invalid_announcement_is_rejected() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let mixed = announcement("a", "10.0.0.0/24", "2001:db8::1", 1);
    assert_eq!(engine.apply_event(WatchEvent::added(mixed)), EventOutcome::Rejected);
    assert!(engine.reconcile_once().await.is_idle());
    assert_eq!(engine.snapshot().rejected_events, 1);
}

#[tokio::test]
async fn resync_counts_unusable_records_and_applies_the_rest() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let mixed = announcement("bad", "10.0.1.0/24", "2001:db8::1", 2);
    let listing = vec![a.clone(), mixed];
    let outcome = engine.apply_event(WatchEvent::resynced(listing, Revision::new(2)));
    assert_eq!(
        outcome,
        EventOutcome::Resynced {
            dirty: 1,
            withdrawing: 0
        }
    );

    engine.reconcile_once().await;
    let rib = speaker.rib().await;
    assert_eq!(rib.len(), 1);
    assert_eq!(rib[&a.prefix], a.route());
    assert_eq!(engine.snapshot().rejected_events, 1);
    assert_eq!(engine.desired().len(), 1);
}

// ==========================================================================
// PROPERTY: Shared prefixes
// ==========================================================================

#[tokio::test]
async fn deleting_newer_claim_restores_older_without_withdraw() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let b = announcement("b", "10.0.0.0/24", "192.0.2.2", 2);
    engine.apply_event(WatchEvent::added(a.clone()));
    engine.reconcile_once().await;
    engine.apply_event(WatchEvent::added(b.clone()));
    engine.reconcile_once().await;

    assert_eq!(speaker.rib().await[&a.prefix], b.route());
    assert_eq!(engine.tracker().len(), 1);

    assert_eq!(
        engine.apply_event(WatchEvent::deleted(b.clone(), Revision::new(3))),
        EventOutcome::Applied
    );
    engine.reconcile_once().await;

    let calls = speaker.calls().await;
    assert_eq!(withdraws(&calls), 0);
    assert_eq!(
        calls.last(),
        Some(&SpeakerCall::Announce {
            route: a.route(),
            replaces: Some(b.route().key)
        })
    );
    assert_eq!(speaker.rib().await[&a.prefix], a.route());
    assert_eq!(engine.tracker().advertised(), vec![a.route()]);
    assert!(engine.reconcile_once().await.is_idle());
}

#[tokio::test]
async fn older_claim_on_advertised_prefix_stays_off_the_wire() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let b = announcement("b", "10.0.0.0/24", "192.0.2.2", 2);
    engine.apply_event(WatchEvent::added(b.clone()));
    engine.reconcile_once().await;
    speaker.clear_calls().await;

    // Listed later, but created before `b`.
    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let listing = vec![a, b.clone()];
    let outcome = engine.apply_event(WatchEvent::resynced(listing, Revision::new(2)));
    assert_eq!(
        outcome,
        EventOutcome::Resynced {
            dirty: 0,
            withdrawing: 0
        }
    );
    assert!(engine.reconcile_once().await.is_idle());
    assert!(speaker.calls().await.is_empty());
    assert_eq!(speaker.rib().await[&b.prefix], b.route());
}

#[tokio::test]
async fn resync_dropping_winner_hands_prefix_to_survivor() {
    let speaker = MemorySpeaker::new_arc();
    let mut engine = engine(&speaker);

    let a = announcement("a", "10.0.0.0/24", "192.0.2.1", 1);
    let b = announcement("b", "10.0.0.0/24", "192.0.2.2", 2);
    engine.apply_event(WatchEvent::added(a.clone()));
    engine.apply_event(WatchEvent::added(b.clone()));
    engine.reconcile_once().await;
    assert_eq!(speaker.rib().await[&a.prefix], b.route());
    speaker.clear_calls().await;

    // `b` was deleted while disconnected.
    engine.apply_event(WatchEvent::error("connection reset"));
    let outcome = engine.apply_event(WatchEvent::resynced(vec![a.clone()], Revision::new(3)));
    assert_eq!(
        outcome,
        EventOutcome::Resynced {
            dirty: 1,
            withdrawing: 1
        }
    );
    engine.reconcile_once().await;

    assert_eq!(
        speaker.calls().await,
        vec![SpeakerCall::Announce {
            route: a.route(),
            replaces: Some(b.route().key)
        }]
    );
    assert_eq!(speaker.rib().await[&a.prefix], a.route());
    assert_eq!(engine.tracker().len(), 1);
    assert_eq!(engine.tracker().count(RouteState::Advertised), 1);
}
