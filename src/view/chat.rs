use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::json;

use super::{ScopeTracker, ViewContext, temp_id};
use crate::backend::Filter;
use crate::error::{Error, Result};
use crate::realtime::{Scope, SubscriptionHandle};
use crate::types::{ChatMessage, ChatRoom};
use crate::validation::validate_message;

struct OpenRoom {
    room: ChatRoom,
    handle: SubscriptionHandle,
}

/// The conversation between a project creator and one applicant.
pub struct ChatView {
    ctx: ViewContext,
    tracker: ScopeTracker,
    current: Mutex<Option<OpenRoom>>,
}

impl ChatView {
    pub fn new(ctx: ViewContext) -> Self {
        Self {
            ctx,
            tracker: ScopeTracker::default(),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<OpenRoom>> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Opens the room for an application, creating it on first use, and
    /// starts following its messages. Any previously open room is closed.
    pub async fn open(&self, project_id: &str, application_id: &str) -> Result<ChatRoom> {
        let generation = self.tracker.begin();
        self.release();

        let room = self
            .fetch_or_create_room(project_id, application_id)
            .await
            .map_err(|e| self.ctx.fail("open the chat", e))?;

        {
            let mut current = self.current();
            if !self.tracker.is_current(generation) {
                tracing::debug!("Chat room {} was superseded before it opened", room.id);
                return Ok(room);
            }
            if let Some(previous) = current.take() {
                self.ctx.unsubscribe(&previous.handle);
            }
            let handle = self.ctx.subscribe(Scope::ChatRoom(room.id.clone()));
            *current = Some(OpenRoom {
                room: room.clone(),
                handle,
            });
        }

        let messages: Vec<ChatMessage> = self
            .ctx
            .client
            .fetch(
                &Filter::new()
                    .eq("room_id", &room.id)
                    .order_by("created_at", true),
            )
            .await
            .map_err(|e| self.ctx.fail("load messages", e))?;
        if self.tracker.is_current(generation) {
            self.ctx.store.ingest_snapshot(messages);
        } else {
            tracing::debug!("Discarding messages for stale room {}", room.id);
        }
        Ok(room)
    }

    async fn fetch_or_create_room(&self, project_id: &str, application_id: &str) -> Result<ChatRoom> {
        if let Some(room) = self.ctx.store.room_for(project_id, application_id) {
            return Ok(room);
        }
        let filter = Filter::new()
            .eq("project_id", project_id)
            .eq("application_id", application_id);
        let room = match self.ctx.client.find::<ChatRoom>(&filter).await? {
            Some(room) => room,
            None => {
                let created = self
                    .ctx
                    .client
                    .insert::<ChatRoom, _>(&json!({
                        "project_id": project_id,
                        "application_id": application_id,
                    }))
                    .await;
                match created {
                    Ok(room) => {
                        tracing::info!("Created chat room {} for application {}", room.id, application_id);
                        room
                    }
                    // Someone else created it first.
                    Err(Error::Conflict(_)) => self
                        .ctx
                        .client
                        .find::<ChatRoom>(&filter)
                        .await?
                        .ok_or(Error::NotFound)?,
                    Err(e) => return Err(e),
                }
            }
        };
        self.ctx.store.ingest_snapshot([room.clone()]);
        Ok(room)
    }

    /// Sends a message. It shows up right away and is removed again if the
    /// backend rejects it.
    pub async fn send(&self, content: &str) -> Result<ChatMessage> {
        validate_message(content).map_err(|e| self.ctx.fail("send the message", e))?;
        let room_id = self
            .room()
            .map(|room| room.id)
            .ok_or_else(|| self.ctx.fail("send the message", Error::validation("No chat is open")))?;

        let temp_id = temp_id();
        let optimistic = ChatMessage {
            id: temp_id.clone(),
            room_id: room_id.clone(),
            sender_id: self.ctx.user_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.ctx.store.apply_optimistic(optimistic, &temp_id);

        let inserted = self
            .ctx
            .client
            .insert::<ChatMessage, _>(&json!({
                "room_id": room_id,
                "sender_id": self.ctx.user_id,
                "content": content,
            }))
            .await;
        match inserted {
            Ok(message) => {
                self.ctx.store.confirm(&temp_id, message.clone());
                Ok(message)
            }
            Err(e) => {
                self.ctx.store.rollback::<ChatMessage>(&temp_id);
                Err(self.ctx.fail("send the message", e))
            }
        }
    }

    #[must_use]
    pub fn room(&self) -> Option<ChatRoom> {
        self.current().as_ref().map(|open| open.room.clone())
    }

    /// Messages of the open room, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        match self.room() {
            Some(room) => self.ctx.store.messages_in(&room.id),
            None => Vec::new(),
        }
    }

    fn release(&self) {
        if let Some(open) = self.current().take() {
            self.ctx.unsubscribe(&open.handle);
        }
    }

    /// Stops following the open room. In-flight loads for it are discarded.
    pub fn close(&self) {
        self.tracker.begin();
        self.release();
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.release();
    }
}
