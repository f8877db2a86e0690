//! Headless surfaces that drive fetches, subscriptions and optimistic
//! mutations, and report what the user should be told as [`Notice`]s.

mod applications;
mod chat;
mod profile;
mod projects;

pub use applications::ApplicationsView;
pub use chat::ChatView;
pub use profile::ProfileView;
pub use projects::ProjectsView;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;

use crate::backend::Filter;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::realtime::{Scope, SubscriptionHandle, SubscriptionManager, SubscriptionStatus};
use crate::store::Store;
use crate::types::{ChangeEvent, Project, ProjectMember, ProjectStatus};

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error(String),
    LiveUpdatesUnavailable(Scope),
    LiveUpdatesRestored(Scope),
    /// The signed-in user has no profile yet.
    OnboardingRequired,
}

/// Whether accepting applicants moves a project forward on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPolicy {
    /// Only the creator moves the status.
    #[default]
    Manual,
    /// An open project becomes in progress once its members, creator
    /// included, reach `team_size`.
    AutoAtCapacity,
}

/// Generation counter for a view's current scope. Results of a fetch
/// started under an older generation are discarded.
#[derive(Debug, Default)]
pub struct ScopeTracker {
    generation: AtomicU64,
}

impl ScopeTracker {
    /// Starts a new scope and returns its generation.
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// What every view needs: the signed-in user and the shared sync machinery.
#[derive(Clone)]
pub struct ViewContext {
    pub user_id: String,
    pub client: Client,
    pub store: Arc<Store>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub notices: broadcast::Sender<Notice>,
    pub status_policy: StatusPolicy,
}

impl ViewContext {
    pub fn notify(&self, notice: Notice) {
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }

    /// Logs a failed user action, tells the user, and hands the error back.
    pub fn fail(&self, action: &str, err: Error) -> Error {
        tracing::warn!("Failed to {}: {}", action, err);
        let message = match &err {
            Error::Validation(msg) => msg.clone(),
            Error::Forbidden => format!("You are not allowed to {action}"),
            e if e.is_transient() => format!("Could not {action}. Check your connection and try again"),
            e => format!("Could not {action}: {e}"),
        };
        self.notify(Notice::Error(message));
        err
    }

    /// Subscribes `scope` with pushes going straight into the store.
    pub fn subscribe(&self, scope: Scope) -> SubscriptionHandle {
        let store = Arc::clone(&self.store);
        self.subscribe_with(scope, move |event| {
            store.ingest_push(&event);
        })
    }

    /// Subscribes `scope` with a custom push handler and reports live-update
    /// outages as notices.
    pub fn subscribe_with<F>(&self, scope: Scope, on_event: F) -> SubscriptionHandle
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let handle = self.subscriptions.subscribe(scope.clone(), on_event);
        let mut status = handle.watch();
        let notices = self.notices.clone();
        tokio::spawn(async move {
            let mut interrupted = false;
            while status.changed().await.is_ok() {
                let current = status.borrow_and_update().clone();
                match current {
                    SubscriptionStatus::Reconnecting { .. } => interrupted = true,
                    SubscriptionStatus::Live if interrupted => {
                        interrupted = false;
                        let _ = notices.send(Notice::LiveUpdatesRestored(scope.clone()));
                    }
                    SubscriptionStatus::Degraded => {
                        let _ = notices.send(Notice::LiveUpdatesUnavailable(scope.clone()));
                    }
                    _ => {}
                }
            }
        });
        handle
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.subscriptions.unsubscribe(handle);
    }

    /// The project from the store, or fetched and cached if not held.
    pub async fn project(&self, project_id: &str) -> Result<Project> {
        if let Some(project) = self.store.get::<Project>(project_id) {
            return Ok(project);
        }
        let project: Project = self.client.fetch_one(project_id).await?;
        self.store.ingest_snapshot([project.clone()]);
        Ok(project)
    }

    /// Moves a project forward, showing the new status before the backend
    /// confirms it. Only the creator may do this.
    pub async fn advance_project(&self, project_id: &str, next: ProjectStatus) -> Result<Project> {
        let project = self.project(project_id).await?;
        if project.creator_id != self.user_id {
            return Err(Error::Forbidden);
        }
        if !project.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: project.status.to_string(),
                to: next.to_string(),
            });
        }

        // Keeps the held version so any server copy replaces it.
        let local = Project {
            status: next,
            ..project
        };
        let previous = self.store.apply_local_update(local.clone());
        match self
            .client
            .update::<Project, _>(project_id, &json!({ "status": next }))
            .await
        {
            Ok(stored) => {
                self.store.ingest_snapshot([stored.clone()]);
                tracing::info!("Project {} is now {}", project_id, next);
                Ok(stored)
            }
            Err(e) => {
                if let Some(previous) = previous {
                    self.store.revert(&local, previous);
                }
                Err(e)
            }
        }
    }

    /// Refreshes a project's members and, under [`StatusPolicy::AutoAtCapacity`],
    /// starts the project once the team is full.
    pub async fn apply_status_policy(&self, project_id: &str) -> Result<()> {
        if self.status_policy == StatusPolicy::Manual {
            return Ok(());
        }
        let project = self.project(project_id).await?;
        if project.status != ProjectStatus::Open {
            return Ok(());
        }
        let members: Vec<ProjectMember> = self
            .client
            .fetch(&Filter::new().eq("project_id", project_id))
            .await?;
        let count = members
            .iter()
            .map(|m| m.user_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        self.store.ingest_snapshot(members);
        if count >= usize::try_from(project.team_size).unwrap_or(usize::MAX) {
            tracing::info!(
                "Project {} reached its team size of {}",
                project_id,
                project.team_size
            );
            self.advance_project(project_id, ProjectStatus::InProgress)
                .await?;
        }
        Ok(())
    }
}

/// A temporary id for an optimistic entry.
pub(crate) fn temp_id() -> String {
    format!("temp-{}", uuid::Uuid::new_v4())
}
