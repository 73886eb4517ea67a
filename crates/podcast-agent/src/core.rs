//! AgentCore: single-owner event loop in front of the `BackgroundAgent`.
//!
//! The page never calls the agent directly.  It holds an `AgentHandle` and
//! posts `AgentEvent`s into a bounded channel.  Posting is at-most-once and
//! unacknowledged: when the queue is full or the agent is gone the event is
//! dropped with a warning and the caller is not told.
//!
//! Install and activate run inline in the loop, in arrival order.  Every
//! other event is spawned and interleaves with the rest wherever its handler
//! awaits.

use std::sync::Arc;
use std::time::Duration;

use podcast_proto::config::AgentConfig;
use podcast_proto::protocol::AgentMessage;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::agent::BackgroundAgent;
use crate::assets::{AssetRequest, FetchOutcome, NetworkError};
use crate::host::NotificationId;

pub const REMINDER_TITLE: &str = "Podcast reminder";
pub const REMINDER_BODY: &str = "Your saved episode is ready to listen to.";

// ── AgentEvent ────────────────────────────────────────────────────────────────

/// All inputs into the AgentCore loop.
#[derive(Debug)]
pub enum AgentEvent {
    Install,
    Activate,
    Fetch {
        request: AssetRequest,
        reply: oneshot::Sender<Result<FetchOutcome, NetworkError>>,
    },
    /// Structured message posted by the page.
    Message(AgentMessage),
    /// Push delivered by the push transport; `None` when it carried no data.
    Push(Option<Vec<u8>>),
    NotificationClicked(NotificationId),
    NotificationDismissed(NotificationId),
    Shutdown,
}

// ── AgentHandle ───────────────────────────────────────────────────────────────

/// Page-side end of the agent channel.  Cheap to clone.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentEvent>,
    reminder_delay: Duration,
}

impl AgentHandle {
    fn post(&self, event: AgentEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(ev) => warn!("agent queue full, dropping {:?}", ev),
                mpsc::error::TrySendError::Closed(ev) => debug!("agent gone, dropping {:?}", ev),
            }
        }
    }

    /// Fire-and-forget: no reply, no delivery guarantee.
    pub fn post_message(&self, message: AgentMessage) {
        self.post(AgentEvent::Message(message));
    }

    pub fn deliver_push(&self, data: Option<Vec<u8>>) {
        self.post(AgentEvent::Push(data));
    }

    pub fn notification_clicked(&self, id: NotificationId) {
        self.post(AgentEvent::NotificationClicked(id));
    }

    pub fn notification_dismissed(&self, id: NotificationId) {
        self.post(AgentEvent::NotificationDismissed(id));
    }

    /// Queue the install step.  Waits for queue space, not for completion.
    pub async fn install(&self) {
        if self.tx.send(AgentEvent::Install).await.is_err() {
            warn!("agent gone, install not delivered");
        }
    }

    pub async fn activate(&self) {
        if self.tx.send(AgentEvent::Activate).await.is_err() {
            warn!("agent gone, activate not delivered");
        }
    }

    /// Route a request through the agent and wait for its answer.
    pub async fn fetch(&self, request: AssetRequest) -> Result<FetchOutcome, NetworkError> {
        let url = request.url.clone();
        let gone = || NetworkError::Unreachable {
            url: url.clone(),
            reason: "background agent is not running".to_string(),
        };

        let (reply, response) = oneshot::channel();
        self.tx
            .send(AgentEvent::Fetch { request, reply })
            .await
            .map_err(|_| gone())?;
        response.await.map_err(|_| gone())?
    }

    /// Post `message` once `delay` has elapsed.  There is no way to cancel or
    /// move it, and if the agent is gone by then the message is lost.
    pub fn schedule_reminder(&self, delay: Duration, message: AgentMessage) {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            handle.post_message(message);
        });
    }

    /// The stock "episode ready" reminder, after `agent.reminder_delay_secs`.
    pub fn schedule_default_reminder(&self) {
        self.schedule_reminder(
            self.reminder_delay,
            AgentMessage::show_notification(REMINDER_TITLE, REMINDER_BODY),
        );
    }

    pub fn reminder_delay(&self) -> Duration {
        self.reminder_delay
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(AgentEvent::Shutdown).await;
    }
}

// ── AgentCore ─────────────────────────────────────────────────────────────────

pub struct AgentCore {
    agent: Arc<BackgroundAgent>,
}

impl AgentCore {
    pub fn new(agent: Arc<BackgroundAgent>) -> Self {
        Self { agent }
    }

    /// A handle plus the receiver to pass to [`AgentCore::run`], sized and
    /// timed from the `[agent]` config section.
    pub fn channel(config: &AgentConfig) -> (AgentHandle, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let handle = AgentHandle {
            tx,
            reminder_delay: Duration::from_secs(config.reminder_delay_secs),
        };
        (handle, rx)
    }

    /// Run until `Shutdown` arrives or every handle is dropped, then wait for
    /// in-flight handlers to finish.
    pub async fn run(self, mut event_rx: mpsc::Receiver<AgentEvent>) -> anyhow::Result<()> {
        info!("AgentCore: starting event loop");
        let mut in_flight = JoinSet::new();

        while let Some(event) = event_rx.recv().await {
            match event {
                AgentEvent::Shutdown => {
                    info!("AgentCore: shutdown requested");
                    break;
                }
                AgentEvent::Install => match self.agent.install().await {
                    Ok(count) => info!("AgentCore: installed ({} assets)", count),
                    Err(e) => error!("AgentCore: install failed: {}", e),
                },
                AgentEvent::Activate => {
                    self.agent.activate().await;
                }
                other => {
                    let agent = Arc::clone(&self.agent);
                    in_flight.spawn(async move { dispatch(&agent, other).await });
                }
            }

            // Reap finished handlers
            while let Some(done) = in_flight.try_join_next() {
                if let Err(e) = done {
                    error!("AgentCore: handler panicked: {}", e);
                }
            }
        }

        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!("AgentCore: handler panicked: {}", e);
            }
        }
        info!("AgentCore: stopped");
        Ok(())
    }
}

async fn dispatch(agent: &BackgroundAgent, event: AgentEvent) {
    match event {
        AgentEvent::Fetch { request, reply } => {
            let outcome = agent.handle_fetch(request).await;
            // The requester may have given up; nothing to do then
            let _ = reply.send(outcome);
        }
        AgentEvent::Message(message) => {
            agent.handle_message(message).await;
        }
        AgentEvent::Push(data) => {
            agent.handle_push(data.as_deref()).await;
        }
        AgentEvent::NotificationClicked(id) => {
            let outcome = agent.handle_notification_click(id).await;
            debug!("notification {} activated: {:?}", id, outcome);
        }
        AgentEvent::NotificationDismissed(id) => {
            agent.handle_notification_dismissed(id).await;
        }
        AgentEvent::Install | AgentEvent::Activate | AgentEvent::Shutdown => {}
    }
}
