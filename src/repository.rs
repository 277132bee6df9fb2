//! Host persistence seam.
//!
//! The engine never touches disk or network inside a decision. Hosts persist
//! [`crate::policy::ResourceRecord`]s (and anything else) through a
//! [`Repository`], and follow changes through its subscription stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

const EVENT_BUFFER: usize = 256;

/// Repository error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// No entity is stored under this id.
    #[error("not found: {0}")]
    NotFound(String),
    /// An entity is already stored under this id.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The backing store failed.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// A change to a stored entity.
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryEvent<T> {
    /// A new entity was stored.
    Created(T),
    /// An existing entity was replaced.
    Updated(T),
    /// The entity with this id was removed.
    Deleted(String),
}

/// Live sequence of repository changes.
pub type EventStream<T> = Pin<Box<dyn Stream<Item = RepositoryEvent<T>> + Send>>;

/// CRUD plus a change subscription, keyed by string id.
#[async_trait]
pub trait Repository<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Store a new entity.
    async fn create(&self, id: &str, value: T) -> Result<(), RepositoryError>;

    /// Fetch an entity.
    async fn get(&self, id: &str) -> Result<T, RepositoryError>;

    /// Replace an existing entity.
    async fn update(&self, id: &str, value: T) -> Result<(), RepositoryError>;

    /// Remove an entity.
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;

    /// Every stored id, sorted.
    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError>;

    /// Changes made after this call. Slow subscribers skip what they missed.
    fn subscribe(&self) -> EventStream<T>;
}

/// In-memory repository for tests and single-process hosts.
pub struct InMemoryRepository<T> {
    entries: Arc<RwLock<HashMap<String, T>>>,
    events: broadcast::Sender<RepositoryEvent<T>>,
}

impl<T: Clone> InMemoryRepository<T> {
    /// Create an empty repository.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    fn publish(&self, event: RepositoryEvent<T>) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl<T: Clone> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for InMemoryRepository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Repository<T> for InMemoryRepository<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn create(&self, id: &str, value: T) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return Err(RepositoryError::AlreadyExists(id.to_owned()));
        }
        entries.insert(id.to_owned(), value.clone());
        drop(entries);
        self.publish(RepositoryEvent::Created(value));
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<T, RepositoryError> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))
    }

    async fn update(&self, id: &str, value: T) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        let slot = entries
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))?;
        *slot = value.clone();
        drop(entries);
        self.publish(RepositoryEvent::Updated(value));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entries
            .remove(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_owned()))?;
        drop(entries);
        self.publish(RepositoryEvent::Deleted(id.to_owned()));
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let entries = self.entries.read().await;
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn subscribe(&self) -> EventStream<T> {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok());
        Box::pin(stream)
    }
}
