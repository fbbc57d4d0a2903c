//! Call façade bound to one `vendor.module` target.
//!
//! # Purpose
//! The typed rendition of the dynamic namespace: [`ApiTarget`] carries the
//! target module plus per-call options, offers RPC (`call`), event
//! operations (`emit`/`on`/`once`/`off`), and explicit handler registration
//! with the validation the property-access original did implicitly.
use std::sync::Arc;
use std::time::Duration;

use hublink_wire::Message;

use crate::client::ClientInner;
use crate::config::DEFAULT_ONCE_TIMEOUT;
use crate::error::{ClientError, Result};
use crate::handler::{ApiHandler, Args, EventHandler};

/// One call target with its options. Builder-style option overrides return
/// a new target; two targets built from the same `(vendor, module, options)`
/// behave identically.
#[derive(Clone)]
pub struct ApiTarget {
    inner: Arc<ClientInner>,
    module: String,
    timeout: Duration,
    excluded_clients: Vec<String>,
}

impl ApiTarget {
    pub(crate) fn new(inner: Arc<ClientInner>, vendor: &str, module: &str) -> Self {
        let timeout = inner.config.message_timeout;
        Self {
            inner,
            module: format!("{vendor}.{module}"),
            timeout,
            excluded_clients: Vec::new(),
        }
    }

    /// Target module as `vendor.module`.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Override only the per-call deadline.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append modules the hub should not deliver to.
    pub fn exclude_clients(mut self, clients: impl IntoIterator<Item = String>) -> Self {
        self.excluded_clients.extend(clients);
        self
    }

    /// Invoke `<module>.<method>` and await the response payload.
    pub async fn call(&self, method: &str, args: Args) -> Result<Args> {
        let mut message = Message::method(&self.module, method, args);
        message.timeout = Some(self.timeout.as_millis() as u64);
        message.excluded_clients = Some(self.excluded_clients.clone());
        self.inner.request(message, None, false).await
    }

    /// Emit an event under this module's name. Only the owning module may
    /// emit; anything else fails before touching the wire.
    pub async fn emit(&self, event: &str, args: Args) -> Result<()> {
        if self.module != self.inner.module_name {
            return Err(ClientError::validation(format!(
                "cannot emit {event:?} for foreign module {}",
                self.module
            )));
        }
        let mut message = Message::event(&self.fqn(event), args);
        message.excluded_clients = Some(self.excluded_clients.clone());
        self.inner.post(message, false).await
    }

    /// Subscribe `handler` to `<module>.<event>`.
    pub async fn on(&self, event: &str, handler: EventHandler) -> Result<()> {
        self.inner.subscribe(&self.fqn(event), handler, true, false).await
    }

    /// Subscribe for a single delivery. If the event never arrives within
    /// `expiry` (default five minutes) the entry is removed so it cannot
    /// leak.
    pub async fn once(
        &self,
        event: &str,
        handler: EventHandler,
        expiry: Option<Duration>,
    ) -> Result<()> {
        let event_name = self.fqn(event);
        self.inner
            .subscribe(&event_name, handler.clone(), true, true)
            .await?;
        self.inner
            .spawn_once_expiry(event_name, handler, expiry.unwrap_or(DEFAULT_ONCE_TIMEOUT));
        Ok(())
    }

    /// Remove one handler (by identity) or the whole subscription.
    pub async fn off(&self, event: &str, handler: Option<&EventHandler>) -> Result<()> {
        self.inner.unsubscribe(&self.fqn(event), handler, true).await
    }

    /// Install a local handler for `<module>.<name>`. Only permitted when
    /// the target is the own module; reserved names are rejected. Returns
    /// `false` when the key is already taken.
    pub fn register(&self, name: &str, handler: ApiHandler) -> Result<bool> {
        if self.module != self.inner.module_name {
            return Err(ClientError::validation(format!(
                "cannot register {name:?} on foreign module {}",
                self.module
            )));
        }
        self.inner.register_api_handler_entry(name, handler)
    }

    /// Install every handler in the map; stops at the first rejection.
    pub fn register_all(
        &self,
        handlers: impl IntoIterator<Item = (String, ApiHandler)>,
    ) -> Result<()> {
        for (name, handler) in handlers {
            self.register(&name, handler)?;
        }
        Ok(())
    }

    fn fqn(&self, local: &str) -> String {
        format!("{}.{local}", self.module)
    }
}
