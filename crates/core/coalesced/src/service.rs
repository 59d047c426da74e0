use std::{fmt, future::Future, hash::Hash, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::watch::{channel as watch_channel, Receiver, Sender};

use crate::{CoalescionServiceConfig, Error};

type Slot<Value> = Option<Arc<Value>>;
type Watchers<Id, Value> = DashMap<Id, Receiver<Slot<Value>>>;

/// Registry of in-flight operations, keyed by identifier.
///
/// Clones share the same registry. Each identifier has at most one running
/// operation, every caller asking for it while it runs joins that operation and
/// receives the same [`Arc`] once it settles. Nothing is kept after settlement.
pub struct CoalescionService<Id: Hash + Eq, Value> {
    config: Arc<CoalescionServiceConfig>,
    watchers: Arc<Watchers<Id, Value>>,
}

/// Shared view of one in-flight operation.
pub struct OperationHandle<Value> {
    receiver: Receiver<Slot<Value>>,
}

/// Removes the registry entry when the operation task finishes or is torn down.
struct Registration<Id: Hash + Eq, Value> {
    id: Id,
    watchers: Arc<Watchers<Id, Value>>,
}

impl<Id: Hash + Eq, Value> Drop for Registration<Id, Value> {
    fn drop(&mut self) {
        self.watchers.remove(&self.id);
    }
}

impl<Id, Value> CoalescionService<Id, Value>
where
    Id: Hash + Eq + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: CoalescionServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            watchers: Arc::new(DashMap::new()),
        }
    }

    /// Join the operation running under `id`, or start one with `func`.
    ///
    /// `func` is invoked at most once and only when no operation for `id` is in
    /// flight. The returned future is spawned onto the current tokio runtime so it
    /// runs to completion even if every caller stops waiting on it.
    pub fn acquire_or_join<F, Fut>(&self, id: Id, func: F) -> Result<OperationHandle<Value>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Value> + Send + 'static,
    {
        if let Some(max_concurrent) = self.config.max_concurrent {
            if !self.watchers.contains_key(&id) && self.watchers.len() >= max_concurrent {
                return Err(Error::MaxConcurrent);
            }
        }

        // The shard lock is held from lookup to insert, no other caller can
        // register the same identifier in between.
        let send = match self.watchers.entry(id.clone()) {
            Entry::Occupied(entry) => {
                tracing::trace!("Joining in-flight operation");
                return Ok(OperationHandle {
                    receiver: entry.get().clone(),
                });
            }
            Entry::Vacant(entry) => {
                let (send, recv) = watch_channel(None);
                entry.insert(recv);
                send
            }
        };

        let registration = Registration {
            id,
            watchers: self.watchers.clone(),
        };

        let handle = OperationHandle {
            receiver: send.subscribe(),
        };

        tracing::debug!(in_flight = self.watchers.len(), "Starting operation");
        let operation = func();
        tokio::spawn(settle(operation, registration, send));

        Ok(handle)
    }

    /// Run `func` under `id`, or wait for the operation already running under it.
    pub async fn execute<F, Fut>(&self, id: Id, func: F) -> Result<Arc<Value>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.acquire_or_join(id, func)?.wait().await
    }

    /// Number of identifiers with an operation in flight
    pub fn current_task_count(&self) -> usize {
        self.watchers.len()
    }

    /// Whether an operation is currently running under `id`
    pub fn is_in_flight(&self, id: &Id) -> bool {
        self.watchers.contains_key(id)
    }
}

/// Drive the operation, then deregister it before publishing its value.
async fn settle<Id, Value, Fut>(
    operation: Fut,
    registration: Registration<Id, Value>,
    send: Sender<Slot<Value>>,
) where
    Id: Hash + Eq,
    Fut: Future<Output = Value>,
{
    let value = Arc::new(operation.await);

    drop(registration);
    send.send_replace(Some(value));

    tracing::debug!("Operation settled");
}

impl<Value> OperationHandle<Value> {
    /// Wait for the operation to settle.
    ///
    /// Dropping this future does not affect the operation or any other caller.
    pub async fn wait(mut self) -> Result<Arc<Value>, Error> {
        let result = self
            .receiver
            .wait_for(|slot| slot.is_some())
            .await
            .map_err(|_| Error::RecvError)
            .and_then(|slot| (*slot).clone().ok_or(Error::RecvError));

        if result.is_err() {
            tracing::warn!("Operation was aborted before it settled");
        }

        result
    }

    /// Whether the operation has already produced its value
    pub fn is_settled(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}

impl<Value> Clone for OperationHandle<Value> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<Value> fmt::Debug for OperationHandle<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl<Id: Hash + Eq, Value> Clone for CoalescionService<Id, Value> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            watchers: self.watchers.clone(),
        }
    }
}

impl<Id: Hash + Eq, Value> fmt::Debug for CoalescionService<Id, Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescionService")
            .field("config", &self.config)
            .field("in_flight", &self.watchers.len())
            .finish()
    }
}

impl<Id, Value> Default for CoalescionService<Id, Value>
where
    Id: Hash + Eq + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::from_config(CoalescionServiceConfig::default())
    }
}
