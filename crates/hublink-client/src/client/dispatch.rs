//! Inbound dispatch state machine.
//!
//! # Purpose
//! Every inbound frame is parsed once and dispatched through the parent and
//! each live duplicate, so subscriptions and response waiters on any family
//! member observe the same stream. Per-client handling then routes by
//! message kind; targeted kinds (ping, subscribe, method) make sure exactly
//! one family member answers.
//!
//! # Design notes
//! Method handlers may perform RPCs of their own, so they run in spawned
//! tasks; everything else is handled inline to preserve frame order.
use serde_json::{Value, json};
use std::sync::Arc;

use hublink_wire::{self as wire, Message, MessageKind};

use super::{ClientInner, FamilyRole};
use crate::error::ClientError;
use crate::handler::{ApiHandler, DeferredReply, HandlerReply, RegisteredHandler, RequestContext};
use crate::signal::ClientSignal;

pub(crate) async fn dispatch_frame(parent: &Arc<ClientInner>, raw: &str) {
    metrics::counter!("hublink_client_frames_in_total").increment(1);
    let message = match Message::decode(raw) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(module = %parent.module_name, error = %err, "undecodable frame");
            return;
        }
    };
    handle_message(parent, &message).await;
    for duplicate in parent.live_duplicates() {
        handle_message(&duplicate, &message).await;
    }
}

async fn handle_message(client: &Arc<ClientInner>, message: &Message) {
    match &message.kind {
        MessageKind::Response => handle_response(client, message),
        MessageKind::Event => handle_event(client, message),
        MessageKind::Subscribe => handle_subscription_control(client, message, true).await,
        MessageKind::Unsubscribe => handle_subscription_control(client, message, false).await,
        MessageKind::Ping => handle_ping(client, message).await,
        MessageKind::Method(fqn) => handle_method(client, message, fqn).await,
    }
}

fn handle_response(client: &Arc<ClientInner>, message: &Message) {
    let Some(request_id) = &message.request_id else {
        return;
    };
    let waiter = client
        .state
        .lock()
        .expect("state lock")
        .pending
        .remove(request_id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(message.clone());
        }
        None => {
            // Late or another family member's; dropped here, claimed there.
            metrics::counter!("hublink_client_responses_unclaimed_total").increment(1);
        }
    }
}

fn handle_event(client: &Arc<ClientInner>, message: &Message) {
    let Some(event_name) = &message.event_name else {
        return;
    };
    let entries = {
        let state = client.state.lock().expect("state lock");
        match state.subscriptions.get(event_name) {
            Some(entries) => entries.clone(),
            None => return,
        }
    };
    let args = message.data.clone().unwrap_or_default();
    for entry in &entries {
        if let Err(err) = (entry.handler)(&args) {
            tracing::warn!(
                module = %client.module_name,
                event = %event_name,
                error = %err,
                "event handler failed"
            );
        }
    }
    // One-shot entries leave the table only after every handler ran.
    let invoked_once = entries.iter().filter(|entry| entry.once).collect::<Vec<_>>();
    if invoked_once.is_empty() {
        return;
    }
    let mut state = client.state.lock().expect("state lock");
    if let Some(current) = state.subscriptions.get_mut(event_name) {
        current.retain(|candidate| {
            !(candidate.once
                && invoked_once
                    .iter()
                    .any(|seen| Arc::ptr_eq(&seen.handler, &candidate.handler)))
        });
        if current.is_empty() {
            state.subscriptions.remove(event_name);
        }
    }
}

async fn handle_subscription_control(
    client: &Arc<ClientInner>,
    message: &Message,
    subscribe: bool,
) {
    let split = message
        .event_name
        .as_deref()
        .and_then(|event_name| wire::target_module(event_name).ok());
    let Some((target, local)) = split else {
        if client.is_parent() {
            let text = format!(
                "malformed {} request: {:?}",
                message.kind, message.event_name
            );
            client
                .respond(message, false, vec![json!({ "error": text })], false)
                .await;
        }
        return;
    };
    if target == client.module_name {
        let event_name = local.to_string();
        let signal = if subscribe {
            ClientSignal::SubscriptionAdded { event_name }
        } else {
            ClientSignal::SubscriptionRemoved { event_name }
        };
        client.emit_signal(signal);
        client.respond(message, true, Vec::new(), false).await;
    } else if client.is_parent() && !client.has_duplicate_named(target) {
        let text = format!(
            "{} cannot handle subscriptions for {target}",
            client.module_name
        );
        client
            .respond(message, false, vec![json!({ "error": text })], false)
            .await;
    }
    // A duplicate that is not the target stays silent; the matching member
    // already answered in its own pass.
}

async fn handle_ping(client: &Arc<ClientInner>, message: &Message) {
    if let Some(server) = &message.module_name {
        *client.server_module.lock().expect("server lock") = Some(server.clone());
    }
    let handles = match &client.role {
        // A parent answers unless the ping names one of its duplicates.
        FamilyRole::Parent(_) => message
            .target_module_name
            .as_deref()
            .is_none_or(|target| {
                target == client.module_name || !client.has_duplicate_named(target)
            }),
        FamilyRole::Duplicate { .. } => {
            message.target_module_name.as_deref() == Some(client.module_name.as_str())
        }
    };
    if !handles {
        return;
    }
    // Answer, refresh hub-side subscription state, and (re)install the hub
    // lifecycle subscriptions; the latter two run in the background.
    client.respond(message, true, Vec::new(), false).await;
    client.spawn_resubscribe_all();
    let server = client.server_module.lock().expect("server lock").clone();
    if let Some(server) = server {
        let client = Arc::clone(client);
        tokio::spawn(async move {
            client.install_server_subscriptions(&server).await;
        });
    }
}

async fn handle_method(client: &Arc<ClientInner>, message: &Message, fqn: &str) {
    let entry = client
        .state
        .lock()
        .expect("state lock")
        .handlers
        .get(fqn)
        .cloned();
    let target = message
        .target_module_name
        .clone()
        .or_else(|| wire::target_module(fqn).ok().map(|(module, _)| module.to_string()));
    let ours = target.as_deref() == Some(client.module_name.as_str()) || entry.is_some();
    if !ours {
        return;
    }
    // Built-in control methods manage relay entries for other modules' keys.
    if let Ok((module, local)) = wire::target_module(fqn)
        && module == client.module_name
    {
        match local {
            wire::REGISTER_HANDLERS_METHOD => {
                handle_register_handlers(client, message).await;
                return;
            }
            wire::DEREGISTER_HANDLERS_METHOD => {
                handle_deregister_handlers(client, message).await;
                return;
            }
            _ => {}
        }
    }
    let Some(entry) = entry else {
        let text = format!("There is no handler registered for this type of message: {fqn}");
        client
            .respond(message, false, vec![json!({ "error": text })], false)
            .await;
        return;
    };
    // Handlers may await responses of their own; never block the read loop.
    let client = Arc::clone(client);
    let message = message.clone();
    tokio::spawn(async move {
        run_handler(&client, &message, entry).await;
    });
}

async fn run_handler(client: &Arc<ClientInner>, message: &Message, entry: RegisteredHandler) {
    let args = message.data.clone().unwrap_or_default();
    let outcome = match (entry.handler)(args.clone()).await {
        Ok(HandlerReply::Payload(values)) => Ok(values),
        Ok(HandlerReply::Deferred(deferred)) => {
            let context = RequestContext {
                instigator_id: message.instigator_id.clone(),
                module_name: message.module_name.clone(),
            };
            deferred.resolve(context, args).await
        }
        Err(err) => Err(err),
    };
    match outcome {
        Ok(values) => client.respond(message, true, values, entry.relay).await,
        Err(ClientError::Timeout) => {
            // The remote caller has already observed its own timeout.
            tracing::warn!(
                module = %client.module_name,
                request = %message.kind,
                "handler timed out"
            );
        }
        Err(ClientError::Broker(text)) => {
            client
                .respond(message, false, vec![json!({ "error": text })], entry.relay)
                .await;
        }
        Err(err) => {
            tracing::trace!(
                module = %client.module_name,
                request = %message.kind,
                error = %err,
                "handler failed"
            );
            client
                .respond(message, false, vec![json!({ "error": "ERROR" })], entry.relay)
                .await;
        }
    }
}

async fn handle_register_handlers(client: &Arc<ClientInner>, message: &Message) {
    let Some(origin) = message.module_name.clone() else {
        client
            .respond(
                message,
                false,
                vec![json!({ "error": "registration without a moduleName" })],
                false,
            )
            .await;
        return;
    };
    let keys = string_list(message.data.as_deref().unwrap_or_default());
    let mut installed = 0usize;
    {
        let mut state = client.state.lock().expect("state lock");
        for key in &keys {
            if state.install_handler(key.clone(), relay_entry(client, key)) {
                installed += 1;
            }
        }
    }
    tracing::debug!(
        module = %client.module_name,
        origin = %origin,
        installed,
        total = keys.len(),
        "relay handlers registered"
    );
    client.respond(message, true, Vec::new(), false).await;
}

async fn handle_deregister_handlers(client: &Arc<ClientInner>, message: &Message) {
    let keys = string_list(message.data.as_deref().unwrap_or_default());
    {
        let mut state = client.state.lock().expect("state lock");
        for key in &keys {
            // Only relay entries leave; locally installed handlers stay.
            if state.handlers.get(key).is_some_and(|entry| entry.relay) {
                state.handlers.remove(key);
            }
        }
    }
    client.respond(message, true, Vec::new(), false).await;
}

/// Forwarder installed for another module's key: matching traffic is sent
/// back out over this client's socket with the original sender and
/// instigator preserved, and the eventual payload answers the caller.
fn relay_entry(client: &Arc<ClientInner>, key: &str) -> RegisteredHandler {
    let weak = Arc::downgrade(client);
    let key = key.to_string();
    let handler: ApiHandler = Arc::new(move |_args| {
        let weak = weak.clone();
        let key = key.clone();
        Box::pin(async move {
            Ok(HandlerReply::Deferred(DeferredReply::new(
                move |context: RequestContext, args| async move {
                    let Some(inner) = weak.upgrade() else {
                        return Err(ClientError::Destroyed);
                    };
                    let (module, _) = wire::target_module(&key)?;
                    let mut forward = Message::new(MessageKind::Method(key.clone()));
                    forward.target_module_name = Some(module.to_string());
                    forward.data = Some(args);
                    forward.instigator_id = context.instigator_id;
                    forward.module_name = context.module_name;
                    inner.request(forward, None, true).await
                },
            )))
        })
    });
    RegisteredHandler { handler, relay: true }
}

fn string_list(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect()
}
