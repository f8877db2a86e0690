use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{EntityCache, Tables};
use crate::types::{Application, ChatMessage, ChatRoom, Profile, Project, ProjectMember, Table};

/// How far apart an optimistic message and its server copy may be stamped
/// and still be treated as the same message.
pub const MESSAGE_CORRELATION_SECS: i64 = 60;

/// A row type the store can hold.
pub trait Entity: Clone + PartialEq + Send + Serialize + DeserializeOwned + 'static {
    const TABLE: Table;

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    /// Newer versions replace older ones; ties go to the incoming copy.
    fn version(&self) -> DateTime<Utc> {
        self.created_at()
    }

    /// Returns true if this optimistic entry stands in for `confirmed`.
    fn correlates(&self, _confirmed: &Self) -> bool {
        false
    }

    #[doc(hidden)]
    fn cache(tables: &Tables) -> &EntityCache<Self>;

    #[doc(hidden)]
    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self>;
}

impl Entity for Profile {
    const TABLE: Table = Table::Profiles;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn cache(tables: &Tables) -> &EntityCache<Self> {
        &tables.profiles
    }

    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self> {
        &mut tables.profiles
    }
}

impl Entity for Project {
    const TABLE: Table = Table::Projects;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn correlates(&self, confirmed: &Self) -> bool {
        self.creator_id == confirmed.creator_id && self.title == confirmed.title
    }

    fn cache(tables: &Tables) -> &EntityCache<Self> {
        &tables.projects
    }

    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self> {
        &mut tables.projects
    }
}

impl Entity for Application {
    const TABLE: Table = Table::ProjectApplications;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn correlates(&self, confirmed: &Self) -> bool {
        self.project_id == confirmed.project_id
            && self.applicant_id == confirmed.applicant_id
            && confirmed.status.is_active()
    }

    fn cache(tables: &Tables) -> &EntityCache<Self> {
        &tables.applications
    }

    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self> {
        &mut tables.applications
    }
}

impl Entity for ProjectMember {
    const TABLE: Table = Table::ProjectMembers;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    fn correlates(&self, confirmed: &Self) -> bool {
        self.project_id == confirmed.project_id && self.user_id == confirmed.user_id
    }

    fn cache(tables: &Tables) -> &EntityCache<Self> {
        &tables.members
    }

    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self> {
        &mut tables.members
    }
}

impl Entity for ChatRoom {
    const TABLE: Table = Table::ChatRooms;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn correlates(&self, confirmed: &Self) -> bool {
        self.project_id == confirmed.project_id && self.application_id == confirmed.application_id
    }

    fn cache(tables: &Tables) -> &EntityCache<Self> {
        &tables.rooms
    }

    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self> {
        &mut tables.rooms
    }
}

impl Entity for ChatMessage {
    const TABLE: Table = Table::ChatMessages;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn correlates(&self, confirmed: &Self) -> bool {
        self.room_id == confirmed.room_id
            && self.sender_id == confirmed.sender_id
            && self.content == confirmed.content
            && (confirmed.created_at - self.created_at).num_seconds().abs() <= MESSAGE_CORRELATION_SECS
    }

    fn cache(tables: &Tables) -> &EntityCache<Self> {
        &tables.messages
    }

    fn cache_mut(tables: &mut Tables) -> &mut EntityCache<Self> {
        &mut tables.messages
    }
}
