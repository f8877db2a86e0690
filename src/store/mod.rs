//! Client-side cache that merges fetched snapshots, realtime pushes and
//! optimistic mutations into one consistent view per table.
//!
//! Every change goes through [`Store`]; readers get sorted copies and can
//! follow [`StoreEvent`]s to know when to re-read.

mod cache;
mod entity;

pub use cache::EntityCache;
pub use entity::{Entity, MESSAGE_CORRELATION_SECS};

use std::sync::{Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::types::{
    Application, ChangeEvent, ChangeKind, ChatMessage, ChatRoom, Profile, Project, ProjectMember,
    Table,
};

const EVENT_BUFFER: usize = 256;

/// Announces that a table's visible contents changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Changed(Table),
}

/// One cache per backend table.
#[derive(Debug, Default)]
pub struct Tables {
    profiles: EntityCache<Profile>,
    projects: EntityCache<Project>,
    applications: EntityCache<Application>,
    members: EntityCache<ProjectMember>,
    rooms: EntityCache<ChatRoom>,
    messages: EntityCache<ChatMessage>,
}

pub struct Store {
    tables: Mutex<Tables>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            tables: Mutex::new(Tables::default()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn with_cache<T, R, F>(&self, f: F) -> R
    where
        T: Entity,
        F: FnOnce(&mut EntityCache<T>) -> R,
    {
        let mut tables = self.tables();
        f(T::cache_mut(&mut tables))
    }

    fn announce(&self, table: Table, changed: bool) -> bool {
        if changed {
            // No receivers is fine.
            let _ = self.events.send(StoreEvent::Changed(table));
        }
        changed
    }

    /// Merges rows from a fetch. Rows the store already holds in a newer
    /// version are left alone.
    pub fn ingest_snapshot<T, I>(&self, entities: I) -> bool
    where
        T: Entity,
        I: IntoIterator<Item = T>,
    {
        let changed = self.with_cache::<T, _, _>(|cache| {
            entities
                .into_iter()
                .fold(false, |changed, entity| cache.upsert(entity) || changed)
        });
        self.announce(T::TABLE, changed)
    }

    /// Merges one realtime event. Undecodable rows are logged and dropped.
    pub fn ingest_push(&self, event: &ChangeEvent) -> bool {
        match event.table {
            Table::Profiles => self.ingest_push_as::<Profile>(event),
            Table::Projects => self.ingest_push_as::<Project>(event),
            Table::ProjectApplications => self.ingest_push_as::<Application>(event),
            Table::ProjectMembers => self.ingest_push_as::<ProjectMember>(event),
            Table::ChatRooms => self.ingest_push_as::<ChatRoom>(event),
            Table::ChatMessages => self.ingest_push_as::<ChatMessage>(event),
        }
    }

    fn ingest_push_as<T: Entity>(&self, event: &ChangeEvent) -> bool {
        let changed = match event.kind {
            ChangeKind::Delete => match event.row_id() {
                Some(id) => self.with_cache::<T, _, _>(|cache| cache.remove(id)),
                None => {
                    tracing::warn!("Dropping {} delete without a row id", event.table);
                    false
                }
            },
            ChangeKind::Insert | ChangeKind::Update => {
                let entity: T = match serde_json::from_value(event.record.clone()) {
                    Ok(entity) => entity,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable {} change: {}", event.table, e);
                        return false;
                    }
                };
                self.with_cache::<T, _, _>(|cache| match event.kind {
                    ChangeKind::Insert => cache.insert(entity),
                    _ => cache.upsert(entity),
                })
            }
        };
        tracing::trace!(
            "Push {:?} on {} (changed: {})",
            event.kind,
            event.table,
            changed
        );
        self.announce(T::TABLE, changed)
    }

    /// Shows `entity` right away under `temp_id` until the server copy arrives.
    pub fn apply_optimistic<T: Entity>(&self, entity: T, temp_id: &str) {
        self.with_cache::<T, _, _>(|cache| cache.apply_optimistic(temp_id, entity));
        self.announce(T::TABLE, true);
    }

    /// Swaps the optimistic entry for the row the mutation returned.
    pub fn confirm<T: Entity>(&self, temp_id: &str, entity: T) {
        let changed = self.with_cache::<T, _, _>(|cache| cache.confirm(temp_id, entity));
        self.announce(T::TABLE, changed);
    }

    /// Drops the optimistic entry after a failed mutation.
    pub fn rollback<T: Entity>(&self, temp_id: &str) -> bool {
        let removed = self.with_cache::<T, _, _>(|cache| cache.rollback(temp_id));
        self.announce(T::TABLE, removed)
    }

    /// Overwrites a held row ahead of the server and returns the previous
    /// copy for [`Store::revert`]. `None` if the row is not held.
    pub fn apply_local_update<T: Entity>(&self, entity: T) -> Option<T> {
        let previous = self.with_cache::<T, _, _>(|cache| cache.replace(entity));
        self.announce(T::TABLE, previous.is_some());
        previous
    }

    /// Undoes [`Store::apply_local_update`] unless a server copy replaced
    /// `local` in the meantime.
    pub fn revert<T: Entity>(&self, local: &T, previous: T) -> bool {
        let reverted = self.with_cache::<T, _, _>(|cache| cache.revert(local, previous));
        self.announce(T::TABLE, reverted)
    }

    #[must_use]
    pub fn get<T: Entity>(&self, id: &str) -> Option<T> {
        let tables = self.tables();
        T::cache(&tables).get(id).cloned()
    }

    #[must_use]
    pub fn list<T: Entity>(&self) -> Vec<T> {
        self.list_where(|_: &T| true)
    }

    pub fn list_where<T, F>(&self, keep: F) -> Vec<T>
    where
        T: Entity,
        F: Fn(&T) -> bool,
    {
        let tables = self.tables();
        T::cache(&tables).list_where(keep)
    }

    #[must_use]
    pub fn messages_in(&self, room_id: &str) -> Vec<ChatMessage> {
        self.list_where(|m: &ChatMessage| m.room_id == room_id)
    }

    #[must_use]
    pub fn room_for(&self, project_id: &str, application_id: &str) -> Option<ChatRoom> {
        self.list_where(|r: &ChatRoom| {
            r.project_id == project_id && r.application_id == application_id
        })
        .into_iter()
        .next()
    }

    #[must_use]
    pub fn applications_by(&self, applicant_id: &str) -> Vec<Application> {
        self.list_where(|a: &Application| a.applicant_id == applicant_id)
    }

    #[must_use]
    pub fn applications_for_project(&self, project_id: &str) -> Vec<Application> {
        self.list_where(|a: &Application| a.project_id == project_id)
    }

    /// The non-rejected application of `applicant_id` to `project_id`, if held.
    #[must_use]
    pub fn active_application(&self, project_id: &str, applicant_id: &str) -> Option<Application> {
        self.list_where(|a: &Application| {
            a.project_id == project_id && a.applicant_id == applicant_id && a.status.is_active()
        })
        .into_iter()
        .next()
    }

    #[must_use]
    pub fn projects_created_by(&self, creator_id: &str) -> Vec<Project> {
        self.list_where(|p: &Project| p.creator_id == creator_id)
    }

    #[must_use]
    pub fn members_of(&self, project_id: &str) -> Vec<ProjectMember> {
        self.list_where(|m: &ProjectMember| m.project_id == project_id)
    }

    /// Forgets everything. Used on sign-out.
    pub fn clear(&self) {
        {
            let mut tables = self.tables();
            *tables = Tables::default();
        }
        for table in Table::ALL {
            self.announce(table, true);
        }
    }
}
