use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde_json::json;

use super::{ScopeTracker, ViewContext, temp_id};
use crate::backend::Filter;
use crate::error::{Error, Result};
use crate::realtime::{Scope, SubscriptionHandle};
use crate::types::{
    Application, ApplicationDraft, ApplicationStatus, MemberRole, Project, ProjectMember,
    ProjectStatus,
};
use crate::validation::validate_application;

/// Applications the user sent, and applications to the user's projects.
pub struct ApplicationsView {
    ctx: ViewContext,
    tracker: ScopeTracker,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl ApplicationsView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            tracker: ScopeTracker::default(),
            handles: Mutex::new(Vec::new()),
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<SubscriptionHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Loads both lists and follows changes to them.
    pub async fn open(&self) -> Result<()> {
        let generation = self.tracker.begin();
        self.release();
        self.load(generation)
            .await
            .map_err(|e| self.ctx.fail("load applications", e))
    }

    async fn load(&self, generation: u64) -> Result<()> {
        let user_id = self.ctx.user_id.as_str();
        let client = &self.ctx.client;

        let outgoing: Vec<Application> = client
            .fetch(
                &Filter::new()
                    .eq("applicant_id", user_id)
                    .order_by("created_at", false),
            )
            .await?;
        let owned: Vec<Project> = client.fetch(&Filter::new().eq("creator_id", user_id)).await?;
        let owned_ids: Vec<String> = owned.iter().map(|p| p.id.clone()).collect();
        let incoming: Vec<Application> = client
            .fetch(
                &Filter::new()
                    .is_in("project_id", owned_ids)
                    .order_by("created_at", false),
            )
            .await?;
        let applied_to: Vec<Project> = client
            .fetch(&Filter::new().is_in("id", outgoing.iter().map(|a| a.project_id.clone())))
            .await?;

        if !self.tracker.is_current(generation) {
            tracing::debug!("Discarding stale application lists");
            return Ok(());
        }
        tracing::debug!(
            "Loaded {} outgoing and {} incoming applications",
            outgoing.len(),
            incoming.len()
        );
        self.ctx.store.ingest_snapshot(owned);
        self.ctx.store.ingest_snapshot(applied_to);
        self.ctx.store.ingest_snapshot(outgoing);
        self.ctx.store.ingest_snapshot(incoming);

        let mut handles = self.handles();
        if !self.tracker.is_current(generation) {
            return Ok(());
        }
        for handle in handles.drain(..) {
            self.ctx.unsubscribe(&handle);
        }
        handles.push(
            self.ctx
                .subscribe(Scope::OutgoingApplications(self.ctx.user_id.clone())),
        );
        let store = Arc::clone(&self.ctx.store);
        let creator_id = self.ctx.user_id.clone();
        handles.push(self.ctx.subscribe_with(
            Scope::IncomingApplications(self.ctx.user_id.clone()),
            move |event| {
                // The channel carries every application; keep those for our projects.
                let ours = match event.column("project_id") {
                    Some(project_id) => store
                        .get::<Project>(project_id)
                        .is_some_and(|p| p.creator_id == creator_id),
                    None => true,
                };
                if ours {
                    store.ingest_push(&event);
                }
            },
        ));
        Ok(())
    }

    #[must_use]
    pub fn outgoing(&self) -> Vec<Application> {
        self.ctx.store.applications_by(&self.ctx.user_id)
    }

    #[must_use]
    pub fn incoming(&self) -> Vec<Application> {
        let owned: HashSet<String> = self
            .ctx
            .store
            .projects_created_by(&self.ctx.user_id)
            .into_iter()
            .map(|p| p.id)
            .collect();
        self.ctx
            .store
            .list_where(|a: &Application| owned.contains(&a.project_id))
    }

    /// Applies to a project. Refused without a network call when a
    /// non-rejected application to it is already held.
    pub async fn apply(&self, project_id: &str, draft: ApplicationDraft) -> Result<Application> {
        const ACTION: &str = "apply to the project";
        validate_application(&draft).map_err(|e| self.ctx.fail(ACTION, e))?;

        if let Some(existing) = self.ctx.store.active_application(project_id, &self.ctx.user_id) {
            tracing::debug!("Application {} already covers project {}", existing.id, project_id);
            return Err(self.ctx.fail(
                ACTION,
                Error::validation("You have already applied to this project"),
            ));
        }

        let project = self
            .ctx
            .project(project_id)
            .await
            .map_err(|e| self.ctx.fail(ACTION, e))?;
        if project.creator_id == self.ctx.user_id {
            return Err(self.ctx.fail(
                ACTION,
                Error::validation("You cannot apply to your own project"),
            ));
        }
        if project.status != ProjectStatus::Open {
            return Err(self.ctx.fail(
                ACTION,
                Error::validation("This project is no longer accepting applications"),
            ));
        }

        let temp_id = temp_id();
        let now = Utc::now();
        let optimistic = Application {
            id: temp_id.clone(),
            project_id: project_id.to_string(),
            applicant_id: self.ctx.user_id.clone(),
            status: ApplicationStatus::Pending,
            message: draft.message.clone(),
            portfolio_url: draft.portfolio_url.clone(),
            linkedin_url: draft.linkedin_url.clone(),
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.apply_optimistic(optimistic, &temp_id);

        let mut payload = serde_json::to_value(&draft)?;
        payload["project_id"] = json!(project_id);
        payload["applicant_id"] = json!(self.ctx.user_id);
        match self.ctx.client.insert::<Application, _>(&payload).await {
            Ok(application) => {
                self.ctx.store.confirm(&temp_id, application.clone());
                tracing::info!("Applied to project {}", project_id);
                Ok(application)
            }
            Err(e) => {
                self.ctx.store.rollback::<Application>(&temp_id);
                Err(self.ctx.fail(ACTION, e))
            }
        }
    }

    /// Accepts a pending application to one of the user's projects and adds
    /// the applicant to the team.
    pub async fn accept(&self, application_id: &str) -> Result<Application> {
        self.decide(application_id, ApplicationStatus::Accepted)
            .await
            .map_err(|e| self.ctx.fail("accept the application", e))
    }

    pub async fn reject(&self, application_id: &str) -> Result<Application> {
        self.decide(application_id, ApplicationStatus::Rejected)
            .await
            .map_err(|e| self.ctx.fail("reject the application", e))
    }

    async fn decide(&self, application_id: &str, next: ApplicationStatus) -> Result<Application> {
        let application = match self.ctx.store.get::<Application>(application_id) {
            Some(application) => application,
            None => {
                let fetched: Application = self.ctx.client.fetch_one(application_id).await?;
                self.ctx.store.ingest_snapshot([fetched.clone()]);
                fetched
            }
        };
        let project = self.ctx.project(&application.project_id).await?;
        if project.creator_id != self.ctx.user_id {
            return Err(Error::Forbidden);
        }
        if !application.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: application.status.to_string(),
                to: next.to_string(),
            });
        }

        let local = Application {
            status: next,
            ..application
        };
        let previous = self.ctx.store.apply_local_update(local.clone());
        let stored = match self
            .ctx
            .client
            .update::<Application, _>(application_id, &json!({ "status": next }))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                if let Some(previous) = previous {
                    self.ctx.store.revert(&local, previous);
                }
                return Err(e);
            }
        };
        self.ctx.store.ingest_snapshot([stored.clone()]);
        tracing::info!("Application {} {}", application_id, next);

        if next == ApplicationStatus::Accepted {
            self.add_member(&stored).await?;
            self.ctx.apply_status_policy(&stored.project_id).await?;
        }
        Ok(stored)
    }

    async fn add_member(&self, application: &Application) -> Result<()> {
        let temp_id = temp_id();
        let optimistic = ProjectMember {
            id: temp_id.clone(),
            project_id: application.project_id.clone(),
            user_id: application.applicant_id.clone(),
            role: MemberRole::Member,
            joined_at: Utc::now(),
        };
        self.ctx.store.apply_optimistic(optimistic, &temp_id);

        let inserted = self
            .ctx
            .client
            .insert::<ProjectMember, _>(&json!({
                "project_id": application.project_id,
                "user_id": application.applicant_id,
                "role": MemberRole::Member,
            }))
            .await;
        match inserted {
            Ok(member) => {
                self.ctx.store.confirm(&temp_id, member);
                Ok(())
            }
            Err(Error::Conflict(_)) => {
                self.ctx.store.rollback::<ProjectMember>(&temp_id);
                tracing::debug!(
                    "{} is already a member of {}",
                    application.applicant_id,
                    application.project_id
                );
                Ok(())
            }
            Err(e) => {
                self.ctx.store.rollback::<ProjectMember>(&temp_id);
                Err(e)
            }
        }
    }

    fn release(&self) {
        for handle in self.handles().drain(..) {
            self.ctx.unsubscribe(&handle);
        }
    }

    pub fn close(&self) {
        self.tracker.begin();
        self.release();
    }
}

impl Drop for ApplicationsView {
    fn drop(&mut self) {
        self.release();
    }
}
