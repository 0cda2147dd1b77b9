// tests/triggers.rs
mod common;

use common::{ids, post, session, Call, ScriptedSource};
use std::sync::Arc;
use std::time::Duration;
use tweet_feed::triggers::spawn_refresh_ticker;
use tweet_feed::{
    FeedController, FeedPhase, FeedTriggers, LoadOutcome, PaginationStrategy, Session, Trigger,
    TriggerOutcome,
};

fn triggers(src: &Arc<ScriptedSource>) -> FeedTriggers {
    FeedTriggers::new(Arc::new(FeedController::new(
        src.clone(),
        PaginationStrategy::Offset,
        5,
    )))
}

#[tokio::test]
async fn each_trigger_maps_to_its_operation() {
    let src = ScriptedSource::new();
    src.push_ok(&[4, 3], true); // context switch -> initial load
    src.push_ok(&[2, 1], false); // near end -> load more
    src.push_ok(&[5, 4], true); // timer tick -> refresh
    let t = triggers(&src);
    let s = session();

    let out = t.dispatch(&s, Trigger::ContextSwitch).await.unwrap();
    assert_eq!(out, TriggerOutcome::Load(LoadOutcome::Applied { inserted: 2 }));

    let out = t.dispatch(&s, Trigger::NearEnd).await.unwrap();
    assert_eq!(out, TriggerOutcome::Load(LoadOutcome::Applied { inserted: 2 }));

    let out = t.dispatch(&s, Trigger::TimerTick).await.unwrap();
    assert_eq!(out, TriggerOutcome::Load(LoadOutcome::Applied { inserted: 1 }));

    let out = t.dispatch(&s, Trigger::ComposeSuccess(post(9))).await.unwrap();
    assert_eq!(out, TriggerOutcome::Composed { inserted: true });

    assert_eq!(ids(&t.controller().snapshot()), vec![9, 5, 4, 3, 2, 1]);
    assert_eq!(
        src.calls(),
        vec![
            Call::Page(0),
            Call::Page(1),
            Call::Page(0),
            Call::Create(9.into())
        ]
    );
}

#[tokio::test]
async fn context_switch_replaces_previous_feed() {
    let src = ScriptedSource::new();
    src.push_ok(&[3, 2], true);
    src.push_ok(&[30, 20], false);
    let t = triggers(&src);
    let s = session();

    t.on_context_switch(&s).await.unwrap();
    t.on_context_switch(&Session::new("other-user")).await.unwrap();

    let c = t.controller();
    assert_eq!(c.phase(), FeedPhase::Ready);
    assert_eq!(ids(&c.snapshot()), vec![30, 20]);
    assert!(!c.has_more());
    assert_eq!(c.epoch(), 2);
}

#[tokio::test(start_paused = true)]
async fn ticker_refreshes_once_per_period() {
    let src = ScriptedSource::new();
    src.push_ok(&[2, 1], true);
    src.push_ok(&[3, 2], true);
    src.push_ok(&[4, 3], true);
    let t = triggers(&src);
    t.on_context_switch(&session()).await.unwrap();

    let handle = spawn_refresh_ticker(t.clone(), session(), Duration::from_secs(30));

    // nothing fires before the first full period
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(src.fetch_count(), 1);

    tokio::time::sleep(Duration::from_secs(32)).await;
    assert_eq!(src.fetch_count(), 3);
    assert_eq!(ids(&t.controller().snapshot()), vec![4, 3, 2, 1]);

    handle.abort();
}
