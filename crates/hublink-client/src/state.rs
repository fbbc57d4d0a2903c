// Per-client tables: handlers, subscriptions, registrars, pending waiters.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;

use hublink_wire::Message;

use crate::handler::{EventHandler, RegisteredHandler, SubscriptionEntry};

#[derive(Default)]
pub(crate) struct ClientState {
    /// Method FQN -> installed handler. One-shot insertion; entries leave
    /// only via deregistration or destroy.
    pub handlers: HashMap<String, RegisteredHandler>,
    /// Event FQN -> entries in insertion order.
    pub subscriptions: HashMap<String, Vec<SubscriptionEntry>>,
    /// Remote modules this client has registered its handlers to.
    pub registrars: HashSet<String>,
    /// In-flight request id -> single-shot waiter. A late response finds no
    /// slot here and is dropped at dispatch.
    pub pending: HashMap<String, oneshot::Sender<Message>>,
}

impl ClientState {
    /// Install a handler if the key is free; `false` when already present,
    /// leaving the existing handler installed.
    pub fn install_handler(&mut self, key: String, entry: RegisteredHandler) -> bool {
        if self.handlers.contains_key(&key) {
            return false;
        }
        self.handlers.insert(key, entry);
        true
    }

    /// Append a subscription entry, preserving insertion order. Duplicate
    /// handlers are allowed and each fires independently.
    pub fn add_subscription(&mut self, event_name: &str, entry: SubscriptionEntry) {
        self.subscriptions
            .entry(event_name.to_string())
            .or_default()
            .push(entry);
    }

    /// Remove the first entry matching `handler` by identity, or the whole
    /// entry when no handler is given. Empty lists drop their key so the
    /// table returns to its prior state.
    pub fn remove_subscription(&mut self, event_name: &str, handler: Option<&EventHandler>) -> bool {
        match handler {
            None => self.subscriptions.remove(event_name).is_some(),
            Some(target) => {
                let Some(entries) = self.subscriptions.get_mut(event_name) else {
                    return false;
                };
                let Some(index) = entries
                    .iter()
                    .position(|entry| Arc::ptr_eq(&entry.handler, target))
                else {
                    return false;
                };
                entries.remove(index);
                if entries.is_empty() {
                    self.subscriptions.remove(event_name);
                }
                true
            }
        }
    }

    pub fn handler_keys(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn subscribed_events(&self) -> Vec<String> {
        self.subscriptions.keys().cloned().collect()
    }
}
