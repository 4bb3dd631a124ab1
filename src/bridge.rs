//! Change-notification bridge.
//!
//! A long-lived background task that consumes the store's mutation feed for
//! the `tasks` collection and publishes every observed change to the
//! realtime hub. The bridge lives in its own failure domain: a broken
//! subscription degrades realtime delivery only, never CRUD availability.
//!
//! Subscription lifecycle per attempt:
//! `Unsubscribed -> Subscribing -> Active -> {Closed, Errored}`. After
//! `Errored` or `Closed` the bridge sleeps a capped exponential backoff and
//! re-enters the feed with the last observed resume token, so interruptions
//! drop nothing the store can still replay. Clients that connect after a
//! change still see nothing of it: delivery stays best-effort, at-most-once
//! per connected client.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::realtime::{ChannelEvent, Hub};
use crate::store::{ChangeEvent, ChangeOperation, Collection, DocumentStore, ResumeToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Closed,
    Errored,
}

/// Retry pacing for re-entering the change feed.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Delay before the first resubscription attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay.
    pub max_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    fn new(config: &BridgeConfig) -> Self {
        Self {
            initial: config.initial_backoff,
            max: config.max_backoff,
            next: config.initial_backoff,
        }
    }

    /// Current delay; doubles for the next call, capped at `max`.
    fn delay(&mut self) -> Duration {
        let current = self.next;
        self.next = (current * 2).min(self.max);
        current
    }

    fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Bridges the store's task mutation feed onto the realtime hub.
pub struct ChangeBridge {
    store: Arc<dyn DocumentStore>,
    hub: Arc<Hub>,
    config: BridgeConfig,
}

impl ChangeBridge {
    pub fn new(store: Arc<dyn DocumentStore>, hub: Arc<Hub>) -> Self {
        Self::with_config(store, hub, BridgeConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn DocumentStore>,
        hub: Arc<Hub>,
        config: BridgeConfig,
    ) -> Self {
        Self { store, hub, config }
    }

    /// Run the bridge until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut backoff = Backoff::new(&self.config);
        let mut resume: Option<ResumeToken> = None;
        let mut state = SubscriptionState::Unsubscribed;

        loop {
            transition(&mut state, SubscriptionState::Subscribing);
            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break,
                subscribed = self.store.watch(Collection::Tasks, resume.clone()) => subscribed,
            };

            match subscribed {
                Ok(mut feed) => {
                    transition(&mut state, SubscriptionState::Active);
                    backoff.reset();
                    loop {
                        let item = tokio::select! {
                            _ = shutdown.cancelled() => {
                                transition(&mut state, SubscriptionState::Closed);
                                return;
                            }
                            item = feed.next() => item,
                        };
                        match item {
                            Some(Ok(event)) => {
                                if let Some(token) = &event.resume_token {
                                    resume = Some(token.clone());
                                }
                                self.forward(event);
                            }
                            Some(Err(err)) => {
                                tracing::warn!(error = %err, "change feed failed");
                                transition(&mut state, SubscriptionState::Errored);
                                break;
                            }
                            None => {
                                tracing::warn!("change feed ended");
                                transition(&mut state, SubscriptionState::Closed);
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "change feed subscription failed");
                    transition(&mut state, SubscriptionState::Errored);
                }
            }

            let delay = backoff.delay();
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                resuming = resume.is_some(),
                "resubscribing to change feed"
            );
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        transition(&mut state, SubscriptionState::Closed);
    }

    /// Map one change event to a realtime frame and broadcast it.
    ///
    /// Inserts and updates carry the document's current full state; deletes
    /// carry an id + tombstone. An update whose post-image is already gone
    /// is skipped: the delete event that follows carries the tombstone.
    fn forward(&self, event: ChangeEvent) {
        let payload = match event.operation {
            ChangeOperation::Insert | ChangeOperation::Update => match event.full_document {
                Some(document) => Value::Object(document),
                None => {
                    tracing::debug!(
                        document_id = %event.document_id,
                        "change event without a current document; skipping"
                    );
                    return;
                }
            },
            ChangeOperation::Delete => json!({ "id": event.document_id, "deleted": true }),
        };
        self.hub.broadcast(&ChannelEvent::TaskUpdate(payload));
    }
}

fn transition(state: &mut SubscriptionState, to: SubscriptionState) {
    if *state != to {
        tracing::debug!(from = ?state, to = ?to, "bridge subscription state");
        *state = to;
    }
}
