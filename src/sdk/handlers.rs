use crate::Result;
use crate::protocol::codec::Event;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Persistent subscriber, called for every matching event until removed.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<Result<()>> + Send + Sync>;

/// One-shot subscriber, consumed by the first matching event.
pub type OnceHandler = Box<dyn FnOnce(Event) -> BoxFuture<Result<()>> + Send>;

/// Boxes an async closure into an [`EventHandler`].
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Boxes an async closure into a [`OnceHandler`].
pub fn once_handler<F, Fut>(f: F) -> OnceHandler
where
    F: FnOnce(Event) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |event| Box::pin(f(event)))
}
