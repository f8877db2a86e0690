use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::backend::{Backend, Filter};
use crate::error::{Error, Result};
use crate::store::Entity;

/// Typed access to the backend: rows in and out as entities.
///
/// Failures are logged here once, so call sites only decide how to recover.
#[derive(Clone)]
pub struct Client {
    backend: Arc<dyn Backend>,
}

impl Client {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub async fn fetch<T: Entity>(&self, filter: &Filter) -> Result<Vec<T>> {
        let rows = self
            .backend
            .query(T::TABLE, filter)
            .await
            .inspect_err(|e| tracing::warn!("Fetching {} failed: {}", T::TABLE, e))?;
        rows.into_iter().map(decode).collect()
    }

    /// The first row matching `filter`, if any.
    pub async fn find<T: Entity>(&self, filter: &Filter) -> Result<Option<T>> {
        let filter = filter.clone().limit(1);
        Ok(self.fetch(&filter).await?.into_iter().next())
    }

    pub async fn fetch_one<T: Entity>(&self, id: &str) -> Result<T> {
        self.find(&Filter::new().eq("id", id))
            .await?
            .ok_or(Error::NotFound)
    }

    pub async fn insert<T, P>(&self, payload: &P) -> Result<T>
    where
        T: Entity,
        P: Serialize + ?Sized,
    {
        let row = serde_json::to_value(payload)?;
        let stored = self
            .backend
            .insert(T::TABLE, row)
            .await
            .inspect_err(|e| tracing::warn!("Insert into {} failed: {}", T::TABLE, e))?;
        decode(stored)
    }

    pub async fn update<T, P>(&self, id: &str, patch: &P) -> Result<T>
    where
        T: Entity,
        P: Serialize + ?Sized,
    {
        let patch = serde_json::to_value(patch)?;
        let stored = self
            .backend
            .update(T::TABLE, id, patch)
            .await
            .inspect_err(|e| tracing::warn!("Update of {} {} failed: {}", T::TABLE, id, e))?;
        decode(stored)
    }
}

fn decode<T: Entity>(row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| {
        tracing::warn!("Undecodable {} row: {}", T::TABLE, e);
        Error::from(e)
    })
}
