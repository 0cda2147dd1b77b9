// src/triggers.rs
//! Inbound callback contract: what viewport, timer and compose events map to.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::controller::{FeedController, LoadOutcome};
use crate::error::{FetchError, FetchErrorKind};
use crate::post::{Post, Session};

#[derive(Debug, Clone)]
pub enum Trigger {
    /// The list was scrolled close to its end.
    NearEnd,
    /// Auto-refresh timer fired.
    TimerTick,
    /// A post was composed successfully.
    ComposeSuccess(Post),
    /// Logout/login, profile switch, navigating back to the feed.
    ContextSwitch,
}

impl Trigger {
    fn name(&self) -> &'static str {
        match self {
            Self::NearEnd => "near_end",
            Self::TimerTick => "timer_tick",
            Self::ComposeSuccess(_) => "compose_success",
            Self::ContextSwitch => "context_switch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TriggerOutcome {
    Load(LoadOutcome),
    Composed { inserted: bool },
}

/// Thin adapter trigger sources hold on to. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FeedTriggers {
    controller: Arc<FeedController>,
}

impl FeedTriggers {
    pub fn new(controller: Arc<FeedController>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<FeedController> {
        &self.controller
    }

    pub async fn on_near_end(&self, session: &Session) -> Result<LoadOutcome, FetchError> {
        self.controller.load_more(session).await
    }

    pub async fn on_timer_tick(&self, session: &Session) -> Result<LoadOutcome, FetchError> {
        self.controller.refresh_merge(session).await
    }

    pub async fn on_compose_success(
        &self,
        session: &Session,
        post: Post,
    ) -> Result<bool, FetchError> {
        self.controller.submit_new_post(session, post).await
    }

    pub async fn on_context_switch(&self, session: &Session) -> Result<LoadOutcome, FetchError> {
        self.controller.reset();
        self.controller.load_initial(session).await
    }

    pub async fn dispatch(
        &self,
        session: &Session,
        trigger: Trigger,
    ) -> Result<TriggerOutcome, FetchError> {
        counter!("feed_triggers_total", "trigger" => trigger.name()).increment(1);
        match trigger {
            Trigger::NearEnd => self.on_near_end(session).await.map(TriggerOutcome::Load),
            Trigger::TimerTick => self.on_timer_tick(session).await.map(TriggerOutcome::Load),
            Trigger::ComposeSuccess(post) => self
                .on_compose_success(session, post)
                .await
                .map(|inserted| TriggerOutcome::Composed { inserted }),
            Trigger::ContextSwitch => self
                .on_context_switch(session)
                .await
                .map(TriggerOutcome::Load),
        }
    }
}

/// Spawn the auto-refresh timer. The first tick fires after one full period.
pub fn spawn_refresh_ticker(
    triggers: FeedTriggers,
    session: Session,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + every;
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match triggers.dispatch(&session, Trigger::TimerTick).await {
                Ok(outcome) => {
                    tracing::debug!(target: "feed", ?outcome, "refresh tick");
                }
                Err(e) if e.kind() == FetchErrorKind::AuthRequired => {
                    tracing::warn!(target: "feed", error = %e, "refresh tick needs re-authentication");
                }
                Err(e) => {
                    tracing::info!(target: "feed", error = %e, "refresh tick failed; retrying next tick");
                }
            }
        }
    })
}
