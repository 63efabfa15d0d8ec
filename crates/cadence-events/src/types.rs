use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// The kind of persisted entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    TaskDefinition,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// A single change notification.
///
/// The payload is untyped JSON (normally the serialized entity) so the bus
/// stays decoupled from domain structs; subscribers decode it with
/// [`EntityEvent::decode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEvent {
    pub entity: EntityKind,
    pub kind: EventKind,
    pub entity_id: String,
    pub payload: serde_json::Value,
    /// Unix timestamp (ms) when the event was created.
    pub timestamp: u64,
}

impl EntityEvent {
    pub fn new(
        entity: EntityKind,
        kind: EventKind,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            entity,
            kind,
            entity_id: entity_id.into(),
            payload,
            timestamp,
        }
    }

    /// Build an `Updated` event carrying `entity` serialized as its payload.
    pub fn updated<T: Serialize>(
        entity: EntityKind,
        entity_id: impl Into<String>,
        value: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_value(value)?;
        Ok(Self::new(entity, EventKind::Updated, entity_id, payload))
    }

    /// Decode the payload into the entity type the subscriber expects.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn matches(&self, entity: EntityKind, kind: EventKind) -> bool {
        self.entity == entity && self.kind == kind
    }
}

/// Reacts to events it has been subscribed to.
///
/// Errors are logged by the bus and never propagated to the publisher.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn handle(&self, event: &EntityEvent) -> Result<()>;
}

/// A registered subscriber bound to one `(entity, kind)` combination.
#[derive(Clone)]
pub struct Subscription {
    /// Unique name; registering the same name again replaces the old entry.
    pub name: String,
    pub entity: EntityKind,
    pub kind: EventKind,
    pub subscriber: Arc<dyn Subscriber>,
}

impl Subscription {
    pub fn new(
        name: impl Into<String>,
        entity: EntityKind,
        kind: EventKind,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            name: name.into(),
            entity,
            kind,
            subscriber,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("entity", &self.entity)
            .field("kind", &self.kind)
            .finish()
    }
}
