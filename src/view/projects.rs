use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::json;

use super::{ScopeTracker, ViewContext, temp_id};
use crate::backend::Filter;
use crate::error::{Error, Result};
use crate::realtime::{Scope, SubscriptionHandle};
use crate::types::{
    Application, MemberRole, Project, ProjectDraft, ProjectMember, ProjectStatus,
};
use crate::validation::validate_project;

/// The open-project feed, the user's own projects, and single-project detail.
pub struct ProjectsView {
    ctx: ViewContext,
    tracker: ScopeTracker,
    handles: Mutex<Vec<SubscriptionHandle>>,
}

impl ProjectsView {
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

    /// Swaps the followed scopes, unless a newer load has started since.
    fn follow(&self, generation: u64, scopes: Vec<Scope>) {
        let mut handles = self.handles();
        if !self.tracker.is_current(generation) {
            return;
        }
        for handle in handles.drain(..) {
            self.ctx.unsubscribe(&handle);
        }
        *handles = scopes
            .into_iter()
            .map(|scope| self.ctx.subscribe(scope))
            .collect();
    }

    /// Loads projects accepting applications and follows new ones.
    pub async fn open_feed(&self) -> Result<Vec<Project>> {
        let generation = self.tracker.begin();
        let projects: Vec<Project> = self
            .ctx
            .client
            .fetch(
                &Filter::new()
                    .eq("status", ProjectStatus::Open.as_str())
                    .order_by("created_at", false),
            )
            .await
            .map_err(|e| self.ctx.fail("load projects", e))?;
        if self.tracker.is_current(generation) {
            self.ctx.store.ingest_snapshot(projects);
            self.follow(generation, vec![Scope::OpenProjects]);
        }
        Ok(self.feed())
    }

    /// Open projects by other users, newest first.
    #[must_use]
    pub fn feed(&self) -> Vec<Project> {
        let mut projects = self.ctx.store.list_where(|p: &Project| {
            p.status == ProjectStatus::Open && p.creator_id != self.ctx.user_id
        });
        projects.reverse();
        projects
    }

    /// Loads the user's own projects and follows changes to them.
    pub async fn open_created(&self) -> Result<Vec<Project>> {
        let generation = self.tracker.begin();
        let projects: Vec<Project> = self
            .ctx
            .client
            .fetch(&Filter::new().eq("creator_id", &self.ctx.user_id))
            .await
            .map_err(|e| self.ctx.fail("load your projects", e))?;
        if self.tracker.is_current(generation) {
            self.ctx.store.ingest_snapshot(projects);
            self.follow(
                generation,
                vec![Scope::CreatedProjects(self.ctx.user_id.clone())],
            );
        }
        Ok(self.created())
    }

    #[must_use]
    pub fn created(&self) -> Vec<Project> {
        self.ctx.store.projects_created_by(&self.ctx.user_id)
    }

    /// Loads one project with its team and applications and follows both.
    pub async fn open_project(&self, project_id: &str) -> Result<Project> {
        let generation = self.tracker.begin();
        let loaded = async {
            let project: Project = self.ctx.client.fetch_one(project_id).await?;
            let members: Vec<ProjectMember> = self
                .ctx
                .client
                .fetch(&Filter::new().eq("project_id", project_id).order_by("joined_at", true))
                .await?;
            let applications: Vec<Application> = self
                .ctx
                .client
                .fetch(&Filter::new().eq("project_id", project_id))
                .await?;
            Ok::<_, Error>((project, members, applications))
        }
        .await
        .map_err(|e| self.ctx.fail("load the project", e))?;

        let (project, members, applications) = loaded;
        if self.tracker.is_current(generation) {
            self.ctx.store.ingest_snapshot([project.clone()]);
            self.ctx.store.ingest_snapshot(members);
            self.ctx.store.ingest_snapshot(applications);
            self.follow(
                generation,
                vec![
                    Scope::ProjectMembers(project_id.to_string()),
                    Scope::ProjectApplications(project_id.to_string()),
                ],
            );
        }
        Ok(project)
    }

    #[must_use]
    pub fn members(&self, project_id: &str) -> Vec<ProjectMember> {
        self.ctx.store.members_of(project_id)
    }

    /// Creates a project. The creator becomes its first member.
    pub async fn create_project(&self, draft: ProjectDraft) -> Result<Project> {
        const ACTION: &str = "create the project";
        validate_project(&draft).map_err(|e| self.ctx.fail(ACTION, e))?;

        let temp_id = temp_id();
        let now = Utc::now();
        let optimistic = Project {
            id: temp_id.clone(),
            creator_id: self.ctx.user_id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            required_skills: draft.required_skills.clone(),
            team_size: draft.team_size,
            timeline: draft.timeline.clone(),
            status: ProjectStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.apply_optimistic(optimistic, &temp_id);

        let mut payload = serde_json::to_value(&draft)?;
        payload["creator_id"] = json!(self.ctx.user_id);
        let project = match self.ctx.client.insert::<Project, _>(&payload).await {
            Ok(project) => {
                self.ctx.store.confirm(&temp_id, project.clone());
                project
            }
            Err(e) => {
                self.ctx.store.rollback::<Project>(&temp_id);
                return Err(self.ctx.fail(ACTION, e));
            }
        };
        tracing::info!("Created project {} ({})", project.id, project.title);

        let member = self.add_creator(&project.id).await.map_err(|e| {
            tracing::error!(
                "Project {} has no creator membership for {}: {}",
                project.id,
                self.ctx.user_id,
                e
            );
            self.ctx.fail("add you to the new project", e)
        })?;
        self.ctx.store.ingest_snapshot([member]);
        Ok(project)
    }

    /// Inserts the creator's membership, retrying once. A conflict on the
    /// retry means the first attempt landed after all.
    async fn add_creator(&self, project_id: &str) -> Result<ProjectMember> {
        let payload = json!({
            "project_id": project_id,
            "user_id": self.ctx.user_id,
            "role": MemberRole::Creator,
        });
        let first = self.ctx.client.insert::<ProjectMember, _>(&payload).await;
        let err = match first {
            Ok(member) => return Ok(member),
            Err(e) => e,
        };
        tracing::warn!("Retrying creator membership for {}: {}", project_id, err);
        match self.ctx.client.insert::<ProjectMember, _>(&payload).await {
            Err(Error::Conflict(_)) => self
                .ctx
                .client
                .find::<ProjectMember>(
                    &Filter::new()
                        .eq("project_id", project_id)
                        .eq("user_id", &self.ctx.user_id),
                )
                .await?
                .ok_or(Error::NotFound),
            other => other,
        }
    }

    /// Moves one of the user's projects forward. Going back is refused.
    pub async fn advance_status(&self, project_id: &str, next: ProjectStatus) -> Result<Project> {
        self.ctx
            .advance_project(project_id, next)
            .await
            .map_err(|e| self.ctx.fail("update the project status", e))
    }

    pub fn close(&self) {
        self.tracker.begin();
        for handle in self.handles().drain(..) {
            self.ctx.unsubscribe(&handle);
        }
    }
}

impl Drop for ProjectsView {
    fn drop(&mut self) {
        self.close();
    }
}
