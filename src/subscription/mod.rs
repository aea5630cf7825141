//! Reconnecting subscription to a real-time channel.
//!
//! [`ReconnectingSubscription::start`] keeps one logical subscription alive
//! across transport failures. A single tokio task drives the state machine:
//!
//! | State                   | Event                       | Next        |
//! |-------------------------|-----------------------------|-------------|
//! | `Idle`                  | start                       | `Connecting`|
//! | `Connecting`            | `SUBSCRIBED`                | `Subscribed`|
//! | `Connecting/Subscribed` | `CHANNEL_ERROR`/`TIMED_OUT` | `Errored`   |
//! | `Errored`               | retry timer fires           | `Connecting`|
//! | any                     | stop                        | `Stopped`   |
//!
//! Entering `Errored` schedules a retry at the current backoff delay and
//! doubles the delay (capped). Entering `Subscribed` resets it. Retries
//! never give up; the caller ends the subscription with `stop()`.

mod backoff;
mod channel;

pub use backoff::Backoff;
pub use channel::{Channel, StatusSink};

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use precast_common::{ChannelStatus, StatusEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use crate::errors::ChannelError;

/// Observer invoked with every raw status a channel reports.
pub type StatusObserver = Box<dyn FnMut(&StatusEvent) + Send + 'static>;

/// Lifecycle of one logical subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Idle,
    Connecting,
    Subscribed,
    Errored,
    Stopped,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Idle => write!(f, "idle"),
            SubscriptionState::Connecting => write!(f, "connecting"),
            SubscriptionState::Subscribed => write!(f, "subscribed"),
            SubscriptionState::Errored => write!(f, "errored"),
            SubscriptionState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Backoff bounds for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Delay before the first retry, and after every successful subscribe.
    pub initial_delay: Duration,
    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectOptions {
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }
}

/// Cloneable, idempotent stop switch for a running subscription.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Stop the subscription. Safe to call any number of times, from
    /// anywhere, in any state.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Owner's handle to a running subscription. Dropping it stops the
/// subscription.
#[must_use = "dropping the handle stops the subscription"]
pub struct SubscriptionHandle {
    stop: StopHandle,
    state: watch::Receiver<SubscriptionState>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop the subscription: cancels any pending retry and unsubscribes.
    /// Idempotent.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Current state of the state machine.
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Wait for the driver task to finish. Only returns after a stop.
    pub async fn join(mut self) -> Result<(), ChannelError> {
        match self.task.take() {
            Some(task) => task.await.map_err(ChannelError::TaskFailed),
            None => Ok(()),
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Entry point for reconnecting subscriptions.
pub struct ReconnectingSubscription;

impl ReconnectingSubscription {
    /// Subscribe to `channel` now and keep the subscription alive until
    /// stopped. Must be called within a tokio runtime.
    pub fn start<C: Channel>(
        mut channel: C,
        observer: Option<StatusObserver>,
        options: ReconnectOptions,
    ) -> SubscriptionHandle {
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Idle);

        let topic = channel.topic().to_string();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        channel.subscribe(status_tx);
        state_tx.send_replace(SubscriptionState::Connecting);
        tracing::debug!(topic = %topic, "subscribe issued");

        let driver = Driver {
            channel,
            observer,
            backoff: Backoff::new(options.initial_delay, options.max_backoff),
            state_tx,
            stop: token.clone(),
            topic,
            attempt_active: true,
        };
        let task = tokio::spawn(driver.run(status_rx));

        SubscriptionHandle {
            stop: StopHandle { token },
            state: state_rx,
            task: Some(task),
        }
    }
}

type RetryTimer = Option<Pin<Box<Sleep>>>;

struct Driver<C: Channel> {
    channel: C,
    observer: Option<StatusObserver>,
    backoff: Backoff,
    state_tx: watch::Sender<SubscriptionState>,
    stop: CancellationToken,
    topic: String,
    /// Whether the channel has an attempt that still needs an unsubscribe.
    attempt_active: bool,
}

impl<C: Channel> Driver<C> {
    async fn run(mut self, statuses: mpsc::UnboundedReceiver<StatusEvent>) {
        let mut statuses = Some(statuses);
        let mut retry: RetryTimer = None;

        loop {
            tokio::select! {
                // Stop wins over a timer that is ready in the same poll.
                biased;

                _ = self.stop.cancelled() => break,

                _ = wait_retry(&mut retry) => {
                    retry = None;
                    // Late statuses from the failed attempt go nowhere.
                    drop(statuses.take());
                    match self.resubscribe().await {
                        Some(rx) => statuses = Some(rx),
                        None => break,
                    }
                }

                event = next_status(&mut statuses) => match event {
                    Some(event) => self.on_status(event, &mut retry),
                    // The channel dropped its sink; nothing more for this attempt.
                    None => statuses = None,
                },
            }
        }

        drop(retry);
        self.shutdown().await;
    }

    fn on_status(&mut self, event: StatusEvent, retry: &mut RetryTimer) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&event);
        }

        match &event.status {
            ChannelStatus::Subscribed => {
                if retry.take().is_some() {
                    tracing::debug!(topic = %self.topic, "channel recovered, pending retry dropped");
                }
                self.backoff.reset();
                self.set_state(SubscriptionState::Subscribed);
                tracing::info!(topic = %self.topic, "subscribed");
            }
            status if status.is_transient_failure() => {
                if retry.is_some() {
                    tracing::debug!(topic = %self.topic, status = %status, "retry already scheduled");
                    return;
                }
                let delay = self.backoff.next_delay();
                *retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.set_state(SubscriptionState::Errored);
                tracing::warn!(
                    topic = %self.topic,
                    status = %status,
                    error = event.error.as_deref().unwrap_or(""),
                    retry_in_ms = delay.as_millis() as u64,
                    "channel failed, scheduling reconnect"
                );
            }
            status => {
                tracing::debug!(topic = %self.topic, status = %status, "channel status");
            }
        }
    }

    /// Unsubscribe the failed attempt, then subscribe again unless a stop
    /// arrived meanwhile.
    async fn resubscribe(&mut self) -> Option<mpsc::UnboundedReceiver<StatusEvent>> {
        if self.stop.is_cancelled() {
            return None;
        }

        if let Err(e) = self.channel.unsubscribe().await {
            tracing::warn!(topic = %self.topic, error = %e, "unsubscribe before retry failed");
        }
        self.attempt_active = false;

        if self.stop.is_cancelled() {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.channel.subscribe(tx);
        self.attempt_active = true;
        self.set_state(SubscriptionState::Connecting);
        tracing::debug!(topic = %self.topic, "resubscribe issued");
        Some(rx)
    }

    async fn shutdown(mut self) {
        self.set_state(SubscriptionState::Stopped);
        if self.attempt_active {
            self.attempt_active = false;
            if let Err(e) = self.channel.unsubscribe().await {
                tracing::warn!(topic = %self.topic, error = %e, "unsubscribe on stop failed");
            }
        }
        tracing::info!(topic = %self.topic, "subscription stopped");
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state_tx.send_replace(state);
    }
}

async fn wait_retry(retry: &mut RetryTimer) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn next_status(
    statuses: &mut Option<mpsc::UnboundedReceiver<StatusEvent>>,
) -> Option<StatusEvent> {
    match statuses {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}
