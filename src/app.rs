use std::sync::Arc;

use tokio::sync::broadcast;

use crate::backend::{Backend, RestBackend};
use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::realtime::SubscriptionManager;
use crate::session::{Session, SessionStore};
use crate::store::Store;
use crate::view::{
    ApplicationsView, ChatView, Notice, ProfileView, ProjectsView, ViewContext,
};

const NOTICE_BUFFER: usize = 64;

/// Owns the session and the sync machinery that views share.
pub struct App {
    config: ClientConfig,
    sessions: SessionStore,
    session: Option<Session>,
    client: Client,
    store: Arc<Store>,
    subscriptions: Arc<SubscriptionManager>,
    notices: broadcast::Sender<Notice>,
}

impl App {
    /// Restores the persisted session, if any, and connects to the hosted
    /// backend with it.
    pub fn init(config: ClientConfig) -> Result<Self> {
        let sessions = SessionStore::new(&config.session_file);
        let session = sessions.load()?;
        match &session {
            Some(s) => tracing::info!("Restored session for {}", s.user_id),
            None => tracing::debug!("No stored session"),
        }
        let backend = Arc::new(RestBackend::new(&config, session.as_ref())?);
        Ok(Self::with_backend(config, backend, session))
    }

    /// Exchanges credentials for a session, persists it, and starts with it.
    pub async fn sign_in(config: ClientConfig, email: &str, password: &str) -> Result<Self> {
        let session = RestBackend::sign_in_with_password(&config, email, password).await?;
        SessionStore::new(&config.session_file).save(&session)?;
        let backend = Arc::new(RestBackend::new(&config, Some(&session))?);
        Ok(Self::with_backend(config, backend, Some(session)))
    }

    pub fn with_backend(
        config: ClientConfig,
        backend: Arc<dyn Backend>,
        session: Option<Session>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_BUFFER);
        Self {
            sessions: SessionStore::new(&config.session_file),
            subscriptions: Arc::new(SubscriptionManager::new(
                Arc::clone(&backend),
                config.realtime,
            )),
            client: Client::new(backend),
            store: Arc::new(Store::new()),
            config,
            session,
            notices,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn context(&self) -> Result<ViewContext> {
        let session = self.session.as_ref().ok_or(Error::Unauthorized)?;
        Ok(ViewContext {
            user_id: session.user_id.clone(),
            client: self.client.clone(),
            store: Arc::clone(&self.store),
            subscriptions: Arc::clone(&self.subscriptions),
            notices: self.notices.clone(),
            status_policy: self.config.status_policy,
        })
    }

    pub fn chat(&self) -> Result<ChatView> {
        Ok(ChatView::new(self.context()?))
    }

    pub fn applications(&self) -> Result<ApplicationsView> {
        Ok(ApplicationsView::new(self.context()?))
    }

    pub fn projects(&self) -> Result<ProjectsView> {
        Ok(ProjectsView::new(self.context()?))
    }

    pub fn profile(&self) -> Result<ProfileView> {
        Ok(ProfileView::new(self.context()?))
    }

    /// Closes every subscription, then forgets the session and cached data.
    pub fn sign_out(&mut self) -> Result<()> {
        self.subscriptions.teardown_all();
        self.store.clear();
        if let Some(session) = self.session.take() {
            tracing::info!("Signed out {}", session.user_id);
        }
        self.sessions.clear()
    }
}
