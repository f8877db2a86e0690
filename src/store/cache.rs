use std::collections::{HashMap, HashSet};

use super::Entity;

#[derive(Debug, Clone)]
struct Slot<T> {
    entity: T,
    /// Client arrival order. Breaks ties between equal timestamps.
    seq: u64,
}

/// One table's worth of entities: server-confirmed rows keyed by id, plus
/// optimistic placeholders keyed by their temporary id.
#[derive(Debug, Clone)]
pub struct EntityCache<T> {
    confirmed: HashMap<String, Slot<T>>,
    pending: HashMap<String, Slot<T>>,
    tombstones: HashSet<String>,
    next_seq: u64,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            confirmed: HashMap::new(),
            pending: HashMap::new(),
            tombstones: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl<T: Entity> EntityCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Removes the oldest placeholder standing in for `server`, if any, and
    /// returns its position so the confirmed row keeps the same place.
    ///
    /// Only rows seen for the first time reconcile placeholders; a row already
    /// held has had its chance.
    fn take_correlated(&mut self, server: &T) -> Option<u64> {
        if self.confirmed.contains_key(server.id()) {
            return None;
        }
        let temp_id = self
            .pending
            .iter()
            .filter(|(_, slot)| slot.entity.correlates(server))
            .min_by_key(|(_, slot)| slot.seq)
            .map(|(temp_id, _)| temp_id.clone())?;
        self.pending.remove(&temp_id).map(|slot| slot.seq)
    }

    /// Adds a row unless its id is already held. Used for pushed inserts,
    /// which may race with a fetch that loaded the same row.
    pub fn insert(&mut self, entity: T) -> bool {
        if self.tombstones.contains(entity.id()) {
            return false;
        }
        let reconciled = self.take_correlated(&entity);
        if self.confirmed.contains_key(entity.id()) {
            return false;
        }
        let seq = reconciled.unwrap_or_else(|| self.bump_seq());
        self.confirmed
            .insert(entity.id().to_string(), Slot { entity, seq });
        true
    }

    /// Adds or overwrites a row, unless the held copy is newer.
    pub fn upsert(&mut self, entity: T) -> bool {
        if self.tombstones.contains(entity.id()) {
            return false;
        }
        let reconciled = self.take_correlated(&entity);
        if let Some(slot) = self.confirmed.get_mut(entity.id()) {
            if entity.version() < slot.entity.version() || slot.entity == entity {
                return false;
            }
            slot.entity = entity;
            return true;
        }
        let seq = reconciled.unwrap_or_else(|| self.bump_seq());
        self.confirmed
            .insert(entity.id().to_string(), Slot { entity, seq });
        true
    }

    /// Removes a row and remembers the id so late inserts or stale
    /// snapshots cannot bring it back.
    pub fn remove(&mut self, id: &str) -> bool {
        self.tombstones.insert(id.to_string());
        self.confirmed.remove(id).is_some()
    }

    pub fn apply_optimistic(&mut self, temp_id: &str, entity: T) {
        let seq = self.bump_seq();
        self.pending
            .insert(temp_id.to_string(), Slot { entity, seq });
    }

    /// Replaces the placeholder with the row the server returned for it.
    pub fn confirm(&mut self, temp_id: &str, entity: T) -> bool {
        let Some(slot) = self.pending.remove(temp_id) else {
            return self.upsert(entity);
        };
        if self.tombstones.contains(entity.id()) {
            return true;
        }
        match self.confirmed.get_mut(entity.id()) {
            Some(held) => {
                if entity.version() >= held.entity.version() {
                    held.entity = entity;
                }
            }
            None => {
                self.confirmed.insert(
                    entity.id().to_string(),
                    Slot {
                        entity,
                        seq: slot.seq,
                    },
                );
            }
        }
        true
    }

    pub fn rollback(&mut self, temp_id: &str) -> bool {
        self.pending.remove(temp_id).is_some()
    }

    /// Overwrites a held row without the version check and returns what was
    /// there. Used for optimistic status changes.
    pub fn replace(&mut self, entity: T) -> Option<T> {
        let slot = self.confirmed.get_mut(entity.id())?;
        Some(std::mem::replace(&mut slot.entity, entity))
    }

    /// Puts `previous` back, but only if the row still holds `local`; a newer
    /// server copy that arrived meanwhile wins.
    pub fn revert(&mut self, local: &T, previous: T) -> bool {
        match self.confirmed.get_mut(local.id()) {
            Some(slot) if slot.entity == *local => {
                slot.entity = previous;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&T> {
        self.confirmed
            .get(id)
            .or_else(|| self.pending.get(id))
            .map(|slot| &slot.entity)
    }

    #[must_use]
    pub fn is_pending(&self, temp_id: &str) -> bool {
        self.pending.contains_key(temp_id)
    }

    /// Confirmed and pending rows matching `keep`, ordered by creation time
    /// and then arrival.
    pub fn list_where<F>(&self, keep: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        let mut slots: Vec<&Slot<T>> = self
            .confirmed
            .values()
            .chain(self.pending.values())
            .filter(|slot| keep(&slot.entity))
            .collect();
        slots.sort_by(|a, b| {
            a.entity
                .created_at()
                .cmp(&b.entity.created_at())
                .then(a.seq.cmp(&b.seq))
        });
        slots.into_iter().map(|slot| slot.entity.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, content: &str, secs: i64) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            room_id: "room-1".to_string(),
            sender_id: "alice".to_string(),
            content: content.to_string(),
            created_at: at(secs),
        }
    }

    fn ids(cache: &EntityCache<ChatMessage>) -> Vec<String> {
        cache.list_where(|_| true).into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_insert_is_duplicate_safe() {
        let mut cache = EntityCache::new();
        assert!(cache.insert(msg("m1", "hi", 0)));
        assert!(!cache.insert(msg("m1", "hi", 0)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_upsert_ignores_older_versions() {
        let mut cache = EntityCache::new();
        cache.upsert(msg("m1", "new", 10));
        assert!(!cache.upsert(msg("m1", "old", 5)));
        assert_eq!(cache.get("m1").unwrap().content, "new");
        assert!(cache.upsert(msg("m1", "newer", 10)));
        assert_eq!(cache.get("m1").unwrap().content, "newer");
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut cache = EntityCache::new();
        cache.insert(msg("m1", "hi", 0));
        assert!(cache.remove("m1"));
        assert!(!cache.insert(msg("m1", "hi", 0)));
        assert!(!cache.upsert(msg("m1", "hi", 0)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_before_insert_converges() {
        let mut cache = EntityCache::new();
        assert!(!cache.remove("m1"));
        cache.insert(msg("m1", "hi", 0));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let mut cache = EntityCache::new();
        cache.insert(msg("b", "second", 0));
        cache.insert(msg("a", "first", 0));
        cache.insert(msg("c", "earlier", -1));
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_correlated_row_replaces_placeholder() {
        let mut cache = EntityCache::new();
        cache.apply_optimistic("temp-1", msg("temp-1", "hello", 0));
        assert_eq!(ids(&cache), vec!["temp-1"]);

        assert!(cache.insert(msg("m1", "hello", 2)));
        assert_eq!(ids(&cache), vec!["m1"]);
        assert!(!cache.is_pending("temp-1"));

        // The mutation response arriving afterwards changes nothing visible.
        cache.confirm("temp-1", msg("m1", "hello", 2));
        assert_eq!(ids(&cache), vec!["m1"]);
    }

    #[test]
    fn test_known_row_does_not_swallow_new_placeholder() {
        let mut cache = EntityCache::new();
        cache.insert(msg("m1", "ok", 0));
        cache.apply_optimistic("temp-2", msg("temp-2", "ok", 5));

        // A re-fetch of the earlier identical message must leave the new one pending.
        cache.upsert(msg("m1", "ok", 0));
        assert!(cache.is_pending("temp-2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_placeholder_outside_window_is_not_matched() {
        let mut cache = EntityCache::new();
        cache.apply_optimistic("temp-1", msg("temp-1", "hello", 0));
        cache.insert(msg("m9", "hello", Duration::minutes(10).num_seconds()));
        assert!(cache.is_pending("temp-1"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_rollback_removes_placeholder() {
        let mut cache = EntityCache::new();
        cache.apply_optimistic("temp-1", msg("temp-1", "hello", 0));
        assert!(cache.rollback("temp-1"));
        assert!(!cache.rollback("temp-1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_revert_only_if_still_local() {
        let mut cache = EntityCache::new();
        cache.insert(msg("m1", "v1", 0));
        let local = msg("m1", "local", 0);
        let previous = cache.replace(local.clone()).unwrap();
        assert_eq!(previous.content, "v1");

        assert!(cache.revert(&local, previous.clone()));
        assert_eq!(cache.get("m1").unwrap().content, "v1");

        let local = msg("m1", "local", 0);
        cache.replace(local.clone());
        cache.upsert(msg("m1", "server", 1));
        assert!(!cache.revert(&local, previous));
        assert_eq!(cache.get("m1").unwrap().content, "server");
    }
}
