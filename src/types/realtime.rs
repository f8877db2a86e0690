use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend tables the client reads, writes, or listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Projects,
    ProjectApplications,
    ProjectMembers,
    ChatRooms,
    ChatMessages,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Profiles,
        Table::Projects,
        Table::ProjectApplications,
        Table::ProjectMembers,
        Table::ChatRooms,
        Table::ChatMessages,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Projects => "projects",
            Self::ProjectApplications => "project_applications",
            Self::ProjectMembers => "project_members",
            Self::ChatRooms => "chat_rooms",
            Self::ChatMessages => "chat_messages",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Which change kinds a channel listens for. `All` is the `*` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventFilter {
    #[default]
    All,
    Only(ChangeKind),
}

impl EventFilter {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Only(ChangeKind::Insert) => "INSERT",
            Self::Only(ChangeKind::Update) => "UPDATE",
            Self::Only(ChangeKind::Delete) => "DELETE",
        }
    }

    #[must_use]
    pub fn accepts(self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(k) => k == kind,
        }
    }
}

/// A row change delivered by the realtime layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// New row contents. `Null` for deletes.
    pub record: Value,
    /// Previous row contents. For deletes this may only carry the primary key.
    pub old_record: Value,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn insert(table: Table, record: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            record,
            old_record: Value::Null,
            commit_timestamp: None,
        }
    }

    pub fn update(table: Table, record: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            record,
            old_record: Value::Null,
            commit_timestamp: None,
        }
    }

    pub fn delete(table: Table, old_record: Value) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            record: Value::Null,
            old_record,
            commit_timestamp: None,
        }
    }

    /// The row this event is about: the old row for deletes, the new row otherwise.
    #[must_use]
    pub fn row(&self) -> &Value {
        match self.kind {
            ChangeKind::Delete => &self.old_record,
            _ => &self.record,
        }
    }

    #[must_use]
    pub fn row_id(&self) -> Option<&str> {
        self.column("id")
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&str> {
        self.row().get(name).and_then(Value::as_str)
    }
}

/// Server-side filter for a realtime channel: table, change kinds, and an
/// optional `column=eq.value` condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelFilter {
    pub table: Table,
    pub event: EventFilter,
    pub eq: Option<(String, String)>,
}

impl ChannelFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            event: EventFilter::All,
            eq: None,
        }
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.eq = Some((column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.event = EventFilter::Only(kind);
        self
    }

    /// The filter in the backend's `column=eq.value` syntax.
    #[must_use]
    pub fn filter_expr(&self) -> Option<String> {
        self.eq
            .as_ref()
            .map(|(column, value)| format!("{column}=eq.{value}"))
    }

    /// Returns true if the event belongs to this channel.
    ///
    /// Delete payloads often carry only the primary key; those pass when the
    /// filtered column is absent.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.event.accepts(event.kind) {
            return false;
        }
        match &self.eq {
            None => true,
            Some((column, value)) => match event.row().get(column) {
                Some(Value::String(v)) => v == value,
                Some(Value::Number(n)) => n.to_string() == *value,
                Some(_) => false,
                None => event.kind == ChangeKind::Delete,
            },
        }
    }
}

impl fmt::Display for ChannelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.event.as_str())?;
        if let Some(expr) = self.filter_expr() {
            write!(f, ":{expr}")?;
        }
        Ok(())
    }
}

/// Channel lifecycle states reported by the realtime transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
    ChannelError(String),
    TimedOut,
}

impl ChannelStatus {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Subscribed)
    }
}

/// Everything a channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Change(ChangeEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_expr() {
        let filter = ChannelFilter::table(Table::ChatMessages).eq("room_id", "r1");
        assert_eq!(filter.filter_expr().as_deref(), Some("room_id=eq.r1"));
        assert_eq!(filter.to_string(), "chat_messages:*:room_id=eq.r1");
        assert_eq!(ChannelFilter::table(Table::Projects).filter_expr(), None);
    }

    #[test]
    fn test_filter_matches_column_value() {
        let filter = ChannelFilter::table(Table::ChatMessages).eq("room_id", "r1");
        let ours = ChangeEvent::insert(Table::ChatMessages, json!({"id": "m1", "room_id": "r1"}));
        let theirs = ChangeEvent::insert(Table::ChatMessages, json!({"id": "m2", "room_id": "r2"}));
        let other_table = ChangeEvent::insert(Table::Projects, json!({"id": "p1", "room_id": "r1"}));

        assert!(filter.matches(&ours));
        assert!(!filter.matches(&theirs));
        assert!(!filter.matches(&other_table));
    }

    #[test]
    fn test_filter_passes_key_only_deletes() {
        let filter = ChannelFilter::table(Table::ChatMessages).eq("room_id", "r1");
        let delete = ChangeEvent::delete(Table::ChatMessages, json!({"id": "m1"}));
        assert!(filter.matches(&delete));
        assert_eq!(delete.row_id(), Some("m1"));
    }

    #[test]
    fn test_event_filter_kinds() {
        let filter = ChannelFilter::table(Table::Projects).only(ChangeKind::Insert);
        let update = ChangeEvent::update(Table::Projects, json!({"id": "p1"}));
        assert!(!filter.matches(&update));
        assert_eq!(Table::parse("project_members"), Some(Table::ProjectMembers));
    }
}
