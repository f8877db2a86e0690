mod local;
mod phoenix;
mod rest;
mod schema;

pub use local::LocalBackend;
pub use rest::RestBackend;
pub use schema::SCHEMA;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::error::Result;
use crate::types::{ChannelFilter, ChannelMessage, Table};

/// Backend defines the hosted platform's data and realtime surface.
///
/// Rows travel as JSON objects keyed by the backend's column names; the
/// typed layer lives in [`crate::client::Client`].
#[async_trait]
pub trait Backend: Send + Sync {
    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Value>>;

    /// Inserts one row and returns it as stored (server-assigned id and timestamps).
    async fn insert(&self, table: Table, row: Value) -> Result<Value>;

    /// Patches the row with the given id and returns it as stored.
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value>;

    /// Opens a realtime channel. The first message is normally
    /// `Status(Subscribed)`; failures after that arrive as status messages.
    async fn open_channel(&self, filter: &ChannelFilter) -> Result<Channel>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq(String, String),
    In(String, Vec<String>),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Self::Eq(column, _) | Self::In(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Row selection for [`Backend::query`]. Conditions are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Filter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    #[must_use]
    pub fn is_in<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions.push(Condition::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if some `in` condition has no values, so nothing can match.
    #[must_use]
    pub fn is_empty_selection(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| matches!(c, Condition::In(_, values) if values.is_empty()))
    }

    /// Query string pairs in the backend's REST filter syntax.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .conditions
            .iter()
            .map(|c| match c {
                Condition::Eq(column, value) => (column.clone(), format!("eq.{value}")),
                Condition::In(column, values) => {
                    let quoted: Vec<String> = values
                        .iter()
                        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
                        .collect();
                    (column.clone(), format!("in.({})", quoted.join(",")))
                }
            })
            .collect();
        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            pairs.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

/// Receiving end of a realtime channel. Dropping it closes the channel.
pub struct Channel {
    rx: mpsc::Receiver<ChannelMessage>,
    _guard: Option<DropGuard>,
}

impl Channel {
    pub fn new(rx: mpsc::Receiver<ChannelMessage>, guard: Option<DropGuard>) -> Self {
        Self { rx, _guard: guard }
    }

    /// A channel fed by the returned sender. Used by in-process backends.
    #[must_use]
    pub fn pair(buffer: usize) -> (mpsc::Sender<ChannelMessage>, Channel) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx, None))
    }

    /// Next message, or `None` once the transport has gone away.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }
}
