use std::{fmt, future::Future, hash::Hash, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use serde::Serialize;

use crate::{key::operation_name, CoalescionService, Error, KeyStrategy, ANONYMOUS};

type Operation<Args, Value> = Arc<dyn Fn(Args) -> BoxFuture<'static, Value> + Send + Sync>;

/// Async operation wrapped so that concurrent calls with the same key share one run.
///
/// ```ignore
/// let get = Coalesced::new(|(url,): (String,)| async move { fetch(url).await }).named("get");
/// let (a, b) = tokio::join!(get.call((url.clone(),)), get.call((url,)));
/// // one fetch, `a` and `b` hold the same Arc
/// ```
pub struct Coalesced<Args, Value, Id = String>
where
    Id: Hash + Eq,
{
    name: Arc<str>,
    operation: Operation<Args, Value>,
    key_builder: KeyStrategy<Args, Id>,
    service: CoalescionService<Id, Value>,
}

/// Wrap `operation` with the given key strategy and a registry of its own
pub fn wrap<Args, Value, Id, F, Fut>(
    operation: F,
    key_builder: KeyStrategy<Args, Id>,
) -> Coalesced<Args, Value, Id>
where
    Id: Hash + Eq + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Coalesced {
        name: Arc::from(ANONYMOUS),
        operation: Arc::new(move |args| operation(args).boxed()),
        key_builder,
        service: CoalescionService::new(),
    }
}

impl<Args, Value> Coalesced<Args, Value, String>
where
    Args: Serialize + 'static,
    Value: Send + Sync + 'static,
{
    /// Wrap `operation` using the content hash key strategy
    pub fn new<F, Fut>(operation: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        wrap(operation, KeyStrategy::default())
    }
}

impl<Args, Value, Id> Coalesced<Args, Value, Id>
where
    Id: Hash + Eq + Clone + Send + Sync + 'static,
    Value: Send + Sync + 'static,
{
    /// Name the operation, used by the derived keys
    pub fn named(mut self, name: &str) -> Self {
        self.name = Arc::from(operation_name(name));
        self
    }

    /// Replace the key strategy
    pub fn key_builder(mut self, key_builder: KeyStrategy<Args, Id>) -> Self {
        self.key_builder = key_builder;
        self
    }

    /// Register operations in a shared registry instead of a private one
    pub fn service(mut self, service: CoalescionService<Id, Value>) -> Self {
        self.service = service;
        self
    }

    /// Registry this wrapper coalesces through
    pub fn coalescion(&self) -> &CoalescionService<Id, Value> {
        &self.service
    }

    /// Call the operation, or join the call already running for the same key.
    ///
    /// Key derivation failures return before anything is registered.
    pub async fn call(&self, args: Args) -> Result<Arc<Value>, Error> {
        let id = self.key_builder.derive(&self.name, &args)?;
        let operation = self.operation.clone();

        self.service
            .acquire_or_join(id, move || operation(args))?
            .wait()
            .await
    }
}

impl<Args, Value, Id> Clone for Coalesced<Args, Value, Id>
where
    Id: Hash + Eq + Clone,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            operation: self.operation.clone(),
            key_builder: self.key_builder.clone(),
            service: self.service.clone(),
        }
    }
}

impl<Args, Value, Id> fmt::Debug for Coalesced<Args, Value, Id>
where
    Id: Hash + Eq + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalesced")
            .field("name", &self.name)
            .field("key_builder", &self.key_builder)
            .field("service", &self.service)
            .finish()
    }
}
