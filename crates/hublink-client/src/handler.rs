//! Handler and subscription entry types.
//!
//! # Purpose
//! Method handlers are boxed async functions returning either a payload or a
//! deferred reply; the deferred form lets a handler capture the request
//! context (who asked) without polluting its signature. Event handlers are
//! plain fallible callbacks; identity (`Arc::ptr_eq`) supports targeted
//! removal.
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;

/// Ordered argument list for calls, events, and response payloads.
pub type Args = Vec<Value>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerReply>> + Send>>;

/// Installed method handler.
pub type ApiHandler = Arc<dyn Fn(Args) -> HandlerFuture + Send + Sync>;

type DeferredFuture = Pin<Box<dyn Future<Output = Result<Args>> + Send>>;

/// Request metadata the dispatcher stamps onto a deferred reply before
/// running it: the instigator correlation tag and the sending module.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub instigator_id: Option<String>,
    pub module_name: Option<String>,
}

/// Deferred-handler envelope: the stored closure runs only after the
/// dispatcher attaches the request context, and receives the original
/// argument list.
pub struct DeferredReply {
    run: Box<dyn FnOnce(RequestContext, Args) -> DeferredFuture + Send>,
}

impl DeferredReply {
    pub fn new<F, Fut>(run: F) -> Self
    where
        F: FnOnce(RequestContext, Args) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Args>> + Send + 'static,
    {
        Self {
            run: Box::new(move |context, args| Box::pin(run(context, args))),
        }
    }

    pub(crate) async fn resolve(self, context: RequestContext, args: Args) -> Result<Args> {
        (self.run)(context, args).await
    }
}

/// What a method handler hands back to the dispatcher.
pub enum HandlerReply {
    /// Immediate response payload.
    Payload(Args),
    /// Deferred work; resolved with the request context attached.
    Deferred(DeferredReply),
}

impl From<Args> for HandlerReply {
    fn from(values: Args) -> Self {
        Self::Payload(values)
    }
}

/// Wrap an async closure returning a [`HandlerReply`].
pub fn api_handler<F, Fut>(handler: F) -> ApiHandler
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerReply>> + Send + 'static,
{
    Arc::new(move |args| Box::pin(handler(args)))
}

/// Wrap an async closure returning a plain payload.
pub fn value_handler<F, Fut>(handler: F) -> ApiHandler
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Args>> + Send + 'static,
{
    Arc::new(move |args| {
        let fut = handler(args);
        Box::pin(async move { Ok(HandlerReply::Payload(fut.await?)) })
    })
}

/// Installed event callback. Failures are logged and isolated per handler.
pub type EventHandler = Arc<dyn Fn(&[Value]) -> Result<()> + Send + Sync>;

pub fn event_handler<F>(handler: F) -> EventHandler
where
    F: Fn(&[Value]) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// One subscription table entry.
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub handler: EventHandler,
    pub once: bool,
}

/// One handler table entry. Relay entries forward matching traffic on
/// behalf of another module and answer with the relay flag set.
#[derive(Clone)]
pub struct RegisteredHandler {
    pub handler: ApiHandler,
    pub relay: bool,
}
