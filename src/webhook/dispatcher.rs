use crate::config::WebhookSettings;
use crate::crawler::JobId;
use crate::webhook::{DeliveryError, EventKind, WebhookConfig, WebhookEvent};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};

/// Counters of the delivery ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    /// Events accepted for delivery
    pub queued: usize,
    /// Events a receiver acknowledged
    pub delivered: usize,
    /// Events dropped after exhausting their attempts
    pub dropped: usize,
    /// POST requests made, including retries
    pub attempts: usize,
}

/// An event that could not be delivered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub job_id: JobId,
    pub kind: EventKind,
    pub url: String,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    stats: DeliveryStats,
    failures: Vec<DeliveryFailure>,
}

#[derive(Debug, Default)]
struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Delivery {
    config: Arc<WebhookConfig>,
    event: WebhookEvent,
}

enum Command {
    Deliver(Delivery),
    /// The job will emit nothing more; its lane may finish
    CloseLane(JobId),
}

/// Background webhook delivery
///
/// [`dispatch`](Self::dispatch) never waits on the network. Each job gets its
/// own delivery lane, a task that posts that job's events one at a time in
/// emission order; lanes of different jobs run independently so a slow
/// receiver only delays its own job's notifications.
///
/// Must be created inside a Tokio runtime.
pub struct WebhookDispatcher {
    sender: Mutex<Option<UnboundedSender<Command>>>,
    router: Mutex<Option<JoinHandle<()>>>,
    ledger: Arc<Ledger>,
}

impl WebhookDispatcher {
    pub fn new(settings: &WebhookSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("sumi-survey-webhook/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let ledger = Arc::new(Ledger::default());
        let poster = Arc::new(Poster {
            client,
            base_backoff: settings.base_backoff(),
            max_backoff: settings.max_backoff(),
            ledger: Arc::clone(&ledger),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let router = tokio::spawn(route(receiver, poster));

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            router: Mutex::new(Some(router)),
            ledger,
        })
    }

    /// Queues an event for delivery
    ///
    /// Returns false if the receiver is not subscribed to the event's kind or
    /// the dispatcher has shut down.
    pub fn dispatch(&self, config: &Arc<WebhookConfig>, event: WebhookEvent) -> bool {
        let kind = event.kind();
        let job_id = event.job_id();
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            tracing::warn!("Dropping {} event for job {}: dispatcher shut down", kind, job_id);
            return false;
        };

        if !config.subscribes_to(kind) {
            tracing::trace!("Webhook for job {} not subscribed to {}", job_id, kind);
            if kind.is_terminal() {
                let _ = sender.send(Command::CloseLane(job_id));
            }
            return false;
        }

        let delivery = Delivery {
            config: Arc::clone(config),
            event,
        };
        if sender.send(Command::Deliver(delivery)).is_err() {
            tracing::warn!("Dropping {} event for job {}: router stopped", kind, job_id);
            return false;
        }

        self.ledger.state().stats.queued += 1;
        true
    }

    /// Snapshot of the delivery counters
    pub fn stats(&self) -> DeliveryStats {
        self.ledger.state().stats
    }

    /// Events dropped so far
    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.ledger.state().failures.clone()
    }

    /// Stops accepting events and waits until every queued event is delivered
    /// or dropped
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(router) = router {
            if let Err(e) = router.await {
                tracing::error!("Webhook router task failed: {}", e);
            }
            let stats = self.stats();
            tracing::info!(
                "Webhook dispatcher drained: {} delivered, {} dropped",
                stats.delivered,
                stats.dropped
            );
        }
    }
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Fans commands out to one lane per job
async fn route(mut receiver: UnboundedReceiver<Command>, poster: Arc<Poster>) {
    let mut lanes: HashMap<JobId, UnboundedSender<Delivery>> = HashMap::new();
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            command = receiver.recv() => match command {
                Some(Command::Deliver(delivery)) => {
                    let job_id = delivery.event.job_id();
                    let terminal = delivery.event.kind().is_terminal();

                    let lane = lanes.entry(job_id).or_insert_with(|| {
                        let (sender, receiver) = mpsc::unbounded_channel();
                        tasks.spawn(run_lane(receiver, Arc::clone(&poster)));
                        sender
                    });
                    // A lane only stops after draining, so this cannot fail
                    let _ = lane.send(delivery);

                    if terminal {
                        lanes.remove(&job_id);
                    }
                }
                Some(Command::CloseLane(job_id)) => {
                    lanes.remove(&job_id);
                }
                None => break,
            },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(lanes);
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!("Webhook lane task failed: {}", e);
        }
    }
}

async fn run_lane(mut receiver: UnboundedReceiver<Delivery>, poster: Arc<Poster>) {
    while let Some(delivery) = receiver.recv().await {
        poster.deliver(delivery).await;
    }
}

struct Poster {
    client: Client,
    base_backoff: Duration,
    max_backoff: Duration,
    ledger: Arc<Ledger>,
}

impl Poster {
    async fn deliver(&self, delivery: Delivery) {
        let Delivery { config, event } = delivery;
        let max_attempts = config.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.ledger.state().stats.attempts += 1;

            match self.post(&config, &event).await {
                Ok(()) => {
                    tracing::debug!(
                        "Delivered {} event for job {} to {} (attempt {})",
                        event.kind(),
                        event.job_id(),
                        config.url,
                        attempt
                    );
                    self.ledger.state().stats.delivered += 1;
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = backoff_delay(self.base_backoff, self.max_backoff, attempt);
                    tracing::warn!(
                        "Webhook {} for job {} failed (attempt {}/{}): {}; retrying in {:?}",
                        event.kind(),
                        event.job_id(),
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Dropping {} event for job {} after {} attempt(s): {}",
                        event.kind(),
                        event.job_id(),
                        attempt,
                        e
                    );
                    let mut ledger = self.ledger.state();
                    ledger.stats.dropped += 1;
                    ledger.failures.push(DeliveryFailure {
                        job_id: event.job_id(),
                        kind: event.kind(),
                        url: config.url.to_string(),
                        attempts: attempt,
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
                    return;
                }
            }
        }
    }

    async fn post(&self, config: &WebhookConfig, event: &WebhookEvent) -> Result<(), DeliveryError> {
        let mut request = self.client.post(config.url.clone()).json(event);
        for (name, value) in &config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.checked_mul(factor).unwrap_or(max).min(max)
}
