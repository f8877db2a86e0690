//! Subscription Manager: one realtime channel per [`Scope`], reopened with
//! bounded exponential backoff when it fails.

mod backoff;

pub use backoff::ReconnectPolicy;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, Channel};
use crate::types::{ChangeEvent, ChannelFilter, ChannelMessage, ChannelStatus, Table};

/// A named slice of the data a view cares about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    ChatRoom(String),
    /// Applications the user sent.
    OutgoingApplications(String),
    /// Applications to projects the user created. The applications table
    /// has no creator column, so the channel is unfiltered and rows are
    /// narrowed by the caller.
    IncomingApplications(String),
    ProjectApplications(String),
    CreatedProjects(String),
    OpenProjects,
    ProjectMembers(String),
}

impl Scope {
    #[must_use]
    pub fn filter(&self) -> ChannelFilter {
        match self {
            Self::ChatRoom(room_id) => ChannelFilter::table(Table::ChatMessages).eq("room_id", room_id),
            Self::OutgoingApplications(applicant_id) => {
                ChannelFilter::table(Table::ProjectApplications).eq("applicant_id", applicant_id)
            }
            Self::IncomingApplications(_) => ChannelFilter::table(Table::ProjectApplications),
            Self::ProjectApplications(project_id) => {
                ChannelFilter::table(Table::ProjectApplications).eq("project_id", project_id)
            }
            Self::CreatedProjects(creator_id) => {
                ChannelFilter::table(Table::Projects).eq("creator_id", creator_id)
            }
            Self::OpenProjects => ChannelFilter::table(Table::Projects),
            Self::ProjectMembers(project_id) => {
                ChannelFilter::table(Table::ProjectMembers).eq("project_id", project_id)
            }
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChatRoom(id) => write!(f, "chat-room:{id}"),
            Self::OutgoingApplications(id) => write!(f, "outgoing-applications:{id}"),
            Self::IncomingApplications(id) => write!(f, "incoming-applications:{id}"),
            Self::ProjectApplications(id) => write!(f, "project-applications:{id}"),
            Self::CreatedProjects(id) => write!(f, "created-projects:{id}"),
            Self::OpenProjects => f.write_str("open-projects"),
            Self::ProjectMembers(id) => write!(f, "project-members:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    Live,
    /// Waiting `delay` before retry number `attempt` (one-based).
    Reconnecting { attempt: u32, delay: Duration },
    /// Retries exhausted; no further attempts will be made.
    Degraded,
    Closed,
}

type Handler = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Returned by [`SubscriptionManager::subscribe`]. Pass it back to
/// [`SubscriptionManager::unsubscribe`] to stop delivery.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    scope: Scope,
    status: watch::Receiver<SubscriptionStatus>,
}

impl SubscriptionHandle {
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change of this subscription.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.clone()
    }
}

struct LiveSubscription {
    id: u64,
    token: CancellationToken,
    status: watch::Receiver<SubscriptionStatus>,
}

pub struct SubscriptionManager {
    backend: Arc<dyn Backend>,
    policy: ReconnectPolicy,
    live: Mutex<HashMap<Scope, LiveSubscription>>,
    next_id: AtomicU64,
    root: CancellationToken,
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn Backend>, policy: ReconnectPolicy) -> Self {
        Self {
            backend,
            policy,
            live: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            root: CancellationToken::new(),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<Scope, LiveSubscription>> {
        self.live
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Starts listening on `scope`, calling `on_event` for each matching row
    /// change. A live subscription for the same scope is torn down first.
    ///
    /// Transport failures never surface here; follow the handle's status.
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, scope: Scope, on_event: F) -> SubscriptionHandle
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Connecting);

        let previous = self.live().insert(
            scope.clone(),
            LiveSubscription {
                id,
                token: token.clone(),
                status: status_rx.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!("Replacing subscription for {}", scope);
            previous.token.cancel();
        }

        let worker = Worker {
            backend: Arc::clone(&self.backend),
            policy: self.policy,
            filter: scope.filter(),
            scope: scope.clone(),
            handler: Arc::new(on_event),
            token,
            status: status_tx,
        };
        tokio::spawn(worker.run());

        SubscriptionHandle {
            id,
            scope,
            status: status_rx,
        }
    }

    /// Stops the subscription behind `handle`. Returns false if the handle is
    /// stale because its scope was re-subscribed or already torn down.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut live = self.live();
        let current = live.get(&handle.scope).is_some_and(|sub| sub.id == handle.id);
        if !current {
            return false;
        }
        if let Some(sub) = live.remove(&handle.scope) {
            sub.token.cancel();
            tracing::debug!("Unsubscribed from {}", handle.scope);
        }
        true
    }

    /// Closes every subscription. The manager stays usable.
    pub fn teardown_all(&self) {
        let drained: Vec<(Scope, LiveSubscription)> = self.live().drain().collect();
        for (scope, sub) in &drained {
            sub.token.cancel();
            tracing::debug!("Tore down {}", scope);
        }
        if !drained.is_empty() {
            tracing::info!("Closed {} realtime subscriptions", drained.len());
        }
    }

    #[must_use]
    pub fn is_subscribed(&self, scope: &Scope) -> bool {
        self.live().contains_key(scope)
    }

    #[must_use]
    pub fn status(&self, scope: &Scope) -> Option<SubscriptionStatus> {
        self.live().get(scope).map(|sub| sub.status.borrow().clone())
    }

    #[must_use]
    pub fn scopes(&self) -> Vec<Scope> {
        self.live().keys().cloned().collect()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Why a channel stopped delivering.
enum Stop {
    Cancelled,
    Failed(String),
}

struct Worker {
    backend: Arc<dyn Backend>,
    policy: ReconnectPolicy,
    filter: ChannelFilter,
    scope: Scope,
    handler: Handler,
    token: CancellationToken,
    status: watch::Sender<SubscriptionStatus>,
}

impl Worker {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            let opened = tokio::select! {
                _ = self.token.cancelled() => break,
                opened = self.backend.open_channel(&self.filter) => opened,
            };
            let reason = match opened {
                Ok(mut channel) => match self.pump(&mut channel, &mut attempt).await {
                    Stop::Cancelled => break,
                    Stop::Failed(reason) => reason,
                },
                Err(e) => e.to_string(),
            };

            if self.policy.exhausted(attempt) {
                tracing::warn!(
                    "Live updates for {} unavailable after {} retries: {}",
                    self.scope,
                    attempt,
                    reason
                );
                self.status.send_replace(SubscriptionStatus::Degraded);
                return;
            }

            let delay = self.policy.delay(attempt);
            attempt += 1;
            tracing::info!(
                "Channel for {} failed ({}); retry {} in {:?}",
                self.scope,
                reason,
                attempt,
                delay
            );
            self.status
                .send_replace(SubscriptionStatus::Reconnecting { attempt, delay });
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        self.status.send_replace(SubscriptionStatus::Closed);
    }

    async fn pump(&self, channel: &mut Channel, attempt: &mut u32) -> Stop {
        loop {
            let msg = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Stop::Cancelled,
                msg = channel.recv() => msg,
            };
            match msg {
                None => return Stop::Failed("transport closed".to_string()),
                Some(ChannelMessage::Status(ChannelStatus::Subscribed)) => {
                    *attempt = 0;
                    self.status.send_replace(SubscriptionStatus::Live);
                    tracing::debug!("Subscribed to {}", self.scope);
                }
                Some(ChannelMessage::Status(status)) => {
                    return Stop::Failed(format!("{status:?}"));
                }
                Some(ChannelMessage::Change(event)) => {
                    if self.token.is_cancelled() {
                        return Stop::Cancelled;
                    }
                    if !self.filter.matches(&event) {
                        tracing::trace!("Dropping {} event outside {}", event.table, self.scope);
                        continue;
                    }
                    (self.handler)(event);
                }
            }
        }
    }
}
