use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::schema::{SCHEMA, TableDef, table_def};
use super::{Backend, Channel, Condition, Filter};
use crate::error::{Error, Result};
use crate::types::{ChangeEvent, ChannelFilter, ChannelMessage, ChannelStatus, Table};

const CHANGE_FEED_CAPACITY: usize = 256;
const CHANNEL_BUFFER: usize = 64;

/// A SQLite-backed implementation of the backend surface with an in-process
/// change feed. Used for local development and tests.
pub struct LocalBackend {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of realtime channels currently attached to the change feed.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.changes.receiver_count()
    }

    /// Publishes a change to every open channel without touching the database.
    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is listening.
        let _ = self.changes.send(event);
    }

    pub fn delete(&self, table: Table, id: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {table} WHERE id = ?1");
        let rows = self.conn().execute(&sql, [id])?;
        if rows > 0 {
            self.publish(ChangeEvent::delete(table, serde_json::json!({ "id": id })));
        }
        Ok(rows > 0)
    }

    fn select(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
        let def = table_def(table);
        if filter.is_empty_selection() {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        for condition in &filter.conditions {
            let column = checked_column(def, table, condition.column())?;
            match condition {
                Condition::Eq(_, value) => {
                    params.push(filter_param(def, column, value));
                    clauses.push(format!("{column} = ?{}", params.len()));
                }
                Condition::In(_, values) => {
                    let mut placeholders = Vec::with_capacity(values.len());
                    for value in values {
                        params.push(filter_param(def, column, value));
                        placeholders.push(format!("?{}", params.len()));
                    }
                    clauses.push(format!("{column} IN ({})", placeholders.join(", ")));
                }
            }
        }

        let mut sql = format!("SELECT * FROM {table}");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some(order) = &filter.order {
            let column = checked_column(def, table, &order.column)?;
            let dir = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {column} {dir}, rowid ASC"));
        } else {
            sql.push_str(" ORDER BY rowid ASC");
        }
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row_to_json(def, row))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn insert_row(&self, table: Table, row: Value) -> Result<Value> {
        let def = table_def(table);
        let Value::Object(mut obj) = row else {
            return Err(Error::validation("row must be a JSON object"));
        };

        let now = Value::String(now_timestamp());
        obj.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        obj.entry(def.created_column).or_insert_with(|| now.clone());
        if def.has_updated_at {
            obj.entry("updated_at").or_insert(now);
        }

        let mut columns = Vec::with_capacity(obj.len());
        let mut params = Vec::with_capacity(obj.len());
        for (key, value) in &obj {
            let column = checked_column(def, table, key)?;
            columns.push(column);
            params.push(to_sql_value(def, column, value)?);
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
            columns.join(", "),
            placeholders.join(", ")
        );

        let stored = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row(params_from_iter(params.iter()), |row| row_to_json(def, row))
                .map_err(constraint_error)?;
            row
        };

        self.publish(ChangeEvent::insert(table, stored.clone()));
        Ok(stored)
    }

    fn update_row(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        let def = table_def(table);
        let Value::Object(mut obj) = patch else {
            return Err(Error::validation("patch must be a JSON object"));
        };
        if obj.remove("id").is_some_and(|v| v.as_str() != Some(id)) {
            return Err(Error::validation("row id cannot be changed"));
        }
        if def.has_updated_at {
            obj.entry("updated_at")
                .or_insert_with(|| Value::String(now_timestamp()));
        }
        if obj.is_empty() {
            return Err(Error::validation("patch is empty"));
        }

        let mut sets = Vec::with_capacity(obj.len());
        let mut params = Vec::with_capacity(obj.len() + 1);
        for (key, value) in &obj {
            let column = checked_column(def, table, key)?;
            params.push(to_sql_value(def, column, value)?);
            sets.push(format!("{column} = ?{}", params.len()));
        }
        params.push(SqlValue::Text(id.to_string()));
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ?{} RETURNING *",
            sets.join(", "),
            params.len()
        );

        let stored = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&sql)?;
            let row = stmt
                .query_row(params_from_iter(params.iter()), |row| row_to_json(def, row))
                .optional()
                .map_err(constraint_error)?
                .ok_or(Error::NotFound)?;
            row
        };

        let mut event = ChangeEvent::update(table, stored.clone());
        event.old_record = serde_json::json!({ "id": id });
        self.publish(event);
        Ok(stored)
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
        self.select(table, filter)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        self.insert_row(table, row)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        self.update_row(table, id, patch)
    }

    async fn open_channel(&self, filter: &ChannelFilter) -> Result<Channel> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        let mut changes = self.changes.subscribe();
        let filter = filter.clone();
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        tokio::spawn(async move {
            if tx
                .send(ChannelMessage::Status(ChannelStatus::Subscribed))
                .await
                .is_err()
            {
                return;
            }
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(event) => {
                            if filter.matches(&event)
                                && tx.send(ChannelMessage::Change(event)).await.is_err()
                            {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("Local channel {} missed {} changes", filter, missed);
                            let status = ChannelStatus::ChannelError(format!("lagged by {missed}"));
                            let _ = tx.send(ChannelMessage::Status(status)).await;
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            let _ = tx.send(ChannelMessage::Status(ChannelStatus::Closed)).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(Channel::new(rx, Some(guard)))
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn checked_column<'a>(def: &TableDef, table: Table, column: &'a str) -> Result<&'a str> {
    if def.has_column(column) {
        Ok(column)
    } else {
        Err(Error::Backend {
            status: 400,
            message: format!("column {column} does not exist on {table}"),
        })
    }
}

fn filter_param(def: &TableDef, column: &str, value: &str) -> SqlValue {
    if def.bool_columns.contains(&column) {
        match value {
            "true" => return SqlValue::Integer(1),
            "false" => return SqlValue::Integer(0),
            _ => {}
        }
    }
    SqlValue::Text(value.to_string())
}

fn to_sql_value(def: &TableDef, column: &str, value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) if def.json_columns.contains(&column) => {
            SqlValue::Text(serde_json::to_string(value)?)
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(Error::Backend {
                status: 400,
                message: format!("column {column} does not accept structured values"),
            });
        }
    })
}

fn row_to_json(def: &TableDef, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let stmt = row.as_ref();
    let mut obj = Map::with_capacity(stmt.column_count());
    for i in 0..stmt.column_count() {
        let name = stmt.column_name(i)?;
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) if def.bool_columns.contains(&name) => Value::Bool(n != 0),
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(i, Type::Text, Box::new(e))
                })?;
                if def.json_columns.contains(&name) {
                    serde_json::from_str(text).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(i, Type::Text, Box::new(e))
                    })?
                } else {
                    Value::String(text.to_string())
                }
            }
            ValueRef::Blob(_) => Value::Null,
        };
        obj.insert(name.to_string(), value);
    }
    Ok(Value::Object(obj))
}

fn constraint_error(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(e, msg) = &err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation {
            let message = msg.clone().unwrap_or_else(|| e.to_string());
            return match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Error::Conflict(message),
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Error::Backend {
                    status: 409,
                    message,
                },
                _ => Error::Backend {
                    status: 400,
                    message,
                },
            };
        }
    }
    Error::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn backend() -> LocalBackend {
        let backend = LocalBackend::in_memory().unwrap();
        backend.initialize().unwrap();
        backend
    }

    fn project_row(creator: &str) -> Value {
        json!({
            "creator_id": creator,
            "title": "Solar lemonade stand",
            "description": "Sell lemonade with solar-powered fridge",
            "required_skills": ["marketing", "electronics"],
            "team_size": 3,
            "timeline": "summer",
        })
    }

    #[test]
    fn test_initialize_creates_tables() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path().join("test.db")).unwrap();
        backend.initialize().unwrap();

        let conn = backend.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in Table::ALL {
            assert!(tables.contains(&table.as_str().to_string()), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_insert_fills_server_fields() {
        let backend = backend();
        let stored = backend
            .insert(Table::Projects, project_row("alice"))
            .await
            .unwrap();

        assert!(stored["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(stored["status"], "open");
        assert_eq!(stored["required_skills"], json!(["marketing", "electronics"]));
        assert!(stored["created_at"].is_string());
        assert_eq!(stored["created_at"], stored["updated_at"]);
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let backend = backend();
        for creator in ["alice", "bob", "alice"] {
            backend
                .insert(Table::Projects, project_row(creator))
                .await
                .unwrap();
        }

        let rows = backend
            .query(
                Table::Projects,
                &Filter::new().eq("creator_id", "alice").order_by("created_at", true),
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["creator_id"] == "alice"));

        let none = backend
            .query(Table::Projects, &Filter::new().is_in("id", Vec::<String>::new()))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_column_is_rejected() {
        let backend = backend();
        let err = backend
            .query(Table::Projects, &Filter::new().eq("title; DROP TABLE projects", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_active_application_is_unique() {
        let backend = backend();
        let project = backend
            .insert(Table::Projects, project_row("alice"))
            .await
            .unwrap();
        let application = json!({ "project_id": project["id"], "applicant_id": "bob" });

        let first = backend
            .insert(Table::ProjectApplications, application.clone())
            .await
            .unwrap();
        let err = backend
            .insert(Table::ProjectApplications, application.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Once rejected, the applicant may apply again.
        backend
            .update(
                Table::ProjectApplications,
                first["id"].as_str().unwrap(),
                json!({ "status": "rejected" }),
            )
            .await
            .unwrap();
        backend
            .insert(Table::ProjectApplications, application)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let backend = backend();
        let err = backend
            .update(Table::Projects, "missing", json!({ "status": "completed" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn test_channel_delivers_matching_changes() {
        let backend = backend();
        let project = backend
            .insert(Table::Projects, project_row("alice"))
            .await
            .unwrap();
        let project_id = project["id"].as_str().unwrap().to_string();

        let mut channel = backend
            .open_channel(&ChannelFilter::table(Table::ProjectApplications).eq("project_id", &project_id))
            .await
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Status(ChannelStatus::Subscribed))
        );
        assert_eq!(backend.open_channels(), 1);

        backend
            .insert(Table::Projects, project_row("carol"))
            .await
            .unwrap();
        let inserted = backend
            .insert(
                Table::ProjectApplications,
                json!({ "project_id": project_id, "applicant_id": "bob" }),
            )
            .await
            .unwrap();

        match channel.recv().await {
            Some(ChannelMessage::Change(event)) => {
                assert_eq!(event.table, Table::ProjectApplications);
                assert_eq!(event.record, inserted);
            }
            other => panic!("expected change, got {other:?}"),
        }

        drop(channel);
        for _ in 0..10 {
            if backend.open_channels() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.open_channels(), 0);
    }
}
