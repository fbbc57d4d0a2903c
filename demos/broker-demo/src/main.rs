//! End-to-end demo for the hublink broker client.
//!
//! # Purpose
//! Demonstrates module bootstrap, RPC, events with subscriptions, and
//! duplicate clients against a minimal in-process hub.
//!
//! # Notes
//! This is a developer-facing demo; it favors clarity over performance. The
//! embedded hub implements just enough routing for the walkthrough and is
//! not the production hub.
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use hublink_client::{
    InitModuleOptions, SignalKind, event_handler, init_module, value_handler, wait_for_any,
};
use hublink_transport::{WsEvent, WsReader, WsServer, WsWriter};
use hublink_wire::{Message, MessageKind, new_id, now_millis, target_module};

const HUB_MODULE: &str = "hub.core";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    run_demo().await
}

async fn run_demo() -> Result<()> {
    println!("== Hublink Broker Demo ==");
    println!("Goal: RPC, events, and duplicate clients over one hub connection.");

    println!("Step 1/6: booting the in-process hub.");
    let server = WsServer::bind("127.0.0.1:0".parse()?).await?;
    let port = server.local_addr()?.port();
    tokio::spawn(run_hub(server));
    println!("  hub listening on 127.0.0.1:{port}");

    println!("Step 2/6: bootstrapping module demo.calc with an add handler.");
    let calc = init_module(InitModuleOptions::new("demo.calc", "127.0.0.1", Some(port))).await?;
    calc.api("demo", "calc").register(
        "add",
        value_handler(|args| async move {
            let a = args.first().and_then(Value::as_i64).unwrap_or(0);
            let b = args.get(1).and_then(Value::as_i64).unwrap_or(0);
            Ok(vec![json!(a + b)])
        }),
    )?;
    calc.register_handlers_to_remote(HUB_MODULE).await?;
    println!("  demo.calc ready");

    println!("Step 3/6: bootstrapping module demo.caller and invoking add(3, 5).");
    let caller = init_module(InitModuleOptions::new("demo.caller", "127.0.0.1", Some(port))).await?;
    let sum = caller
        .api("demo", "calc")
        .call("add", vec![json!(3), json!(5)])
        .await?;
    println!("  demo.calc.add(3, 5) -> {sum:?}");

    println!("Step 4/6: subscribing demo.caller to demo.calc.heartbeat.");
    let (beat_tx, mut beats) = mpsc::unbounded_channel::<Vec<Value>>();
    caller
        .api("demo", "calc")
        .on(
            "heartbeat",
            event_handler(move |args| {
                let _ = beat_tx.send(args.to_vec());
                Ok(())
            }),
        )
        .await?;
    calc.api("demo", "calc")
        .emit("heartbeat", vec![json!(1)])
        .await?;
    let beat = tokio::time::timeout(Duration::from_secs(5), beats.recv())
        .await
        .context("heartbeat delivery")?
        .context("heartbeat channel")?;
    println!("  heartbeat received: {beat:?}");

    println!("Step 5/6: a duplicate client shares the socket under its own name.");
    let audit = caller.duplicate("demo.audit")?;
    let (audit_tx, mut audit_beats) = mpsc::unbounded_channel::<Vec<Value>>();
    audit
        .api("demo", "calc")
        .on(
            "heartbeat",
            event_handler(move |args| {
                let _ = audit_tx.send(args.to_vec());
                Ok(())
            }),
        )
        .await?;
    calc.api("demo", "calc")
        .emit("heartbeat", vec![json!(2)])
        .await?;
    let first = tokio::time::timeout(Duration::from_secs(5), beats.recv())
        .await
        .context("caller delivery")?
        .context("caller channel")?;
    let second = tokio::time::timeout(Duration::from_secs(5), audit_beats.recv())
        .await
        .context("audit delivery")?
        .context("audit channel")?;
    println!("  demo.caller saw {first:?}, demo.audit saw {second:?}");

    println!("Step 6/6: shutting down.");
    let mut calc_signals = calc.signals();
    audit.destroy().await;
    caller.destroy().await;
    calc.destroy().await;
    let _ = wait_for_any(
        &mut calc_signals,
        &[SignalKind::Destroy],
        Some(Duration::from_secs(2)),
    )
    .await;
    println!("Demo complete.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Minimal in-process hub: just enough routing for the walkthrough.
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HubState {
    /// Module name -> outbound channel of the connection that owns it.
    clients: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    /// Event FQN -> subscribed module names.
    subscriptions: Mutex<HashMap<String, HashSet<String>>>,
}

async fn run_hub(server: WsServer) {
    let state = Arc::new(HubState::default());
    loop {
        match server.accept().await {
            Ok((writer, reader, _peer)) => {
                tokio::spawn(serve_connection(Arc::clone(&state), writer, reader));
            }
            Err(err) => {
                tracing::warn!(error = %err, "hub accept failed");
                break;
            }
        }
    }
}

async fn serve_connection(state: Arc<HubState>, mut writer: WsWriter, mut reader: WsReader) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if writer.send_text(text).await.is_err() {
                break;
            }
        }
        let _ = writer.close().await;
    });

    // Greet the connection; clients answer and resubscribe.
    let mut ping = Message::new(MessageKind::Ping);
    ping.id = Some(new_id());
    ping.time = Some(now_millis());
    ping.module_name = Some(HUB_MODULE.to_string());
    if send_message(&tx, &ping).is_err() {
        return;
    }

    let mut local_names: HashSet<String> = HashSet::new();
    while let Some(frame) = reader.recv().await {
        let text = match frame {
            Ok(WsEvent::Text(text)) => text,
            Ok(WsEvent::Close { .. }) | Err(_) => break,
            Ok(_) => continue,
        };
        let Ok(message) = Message::decode(&text) else {
            continue;
        };
        if let Some(sender) = &message.module_name
            && local_names.insert(sender.clone())
        {
            state
                .clients
                .lock()
                .expect("clients lock")
                .insert(sender.clone(), tx.clone());
        }
        route(&state, &message, &text, &tx);
    }

    let mut clients = state.clients.lock().expect("clients lock");
    for name in local_names {
        clients.remove(&name);
    }
}

fn route(
    state: &Arc<HubState>,
    message: &Message,
    raw: &str,
    tx: &mpsc::UnboundedSender<String>,
) {
    match &message.kind {
        MessageKind::Response => {
            if let Some(target) = &message.target_module_name {
                forward(state, target, raw);
            }
        }
        MessageKind::Ping => {
            respond(tx, message, true, vec![]);
        }
        MessageKind::Subscribe | MessageKind::Unsubscribe => {
            let Some(event_name) = &message.event_name else {
                respond(tx, message, false, vec![json!({ "error": "missing eventName" })]);
                return;
            };
            let sender = message.module_name.clone().unwrap_or_default();
            {
                let mut subscriptions = state.subscriptions.lock().expect("subscriptions lock");
                let entry = subscriptions.entry(event_name.clone()).or_default();
                if message.kind == MessageKind::Subscribe {
                    entry.insert(sender);
                } else {
                    entry.remove(&sender);
                }
            }
            // The owning module answers when connected; otherwise we do.
            let owner_reached = target_module(event_name)
                .ok()
                .is_some_and(|(owner, _)| forward(state, owner, raw));
            if !owner_reached {
                respond(tx, message, true, vec![]);
            }
        }
        MessageKind::Event => {
            let Some(event_name) = &message.event_name else {
                return;
            };
            let excluded = message.excluded_clients.clone().unwrap_or_default();
            let sender = message.module_name.clone().unwrap_or_default();
            let targets: Vec<String> = {
                let subscriptions = state.subscriptions.lock().expect("subscriptions lock");
                subscriptions
                    .get(event_name)
                    .map(|subscribers| {
                        subscribers
                            .iter()
                            .filter(|name| **name != sender && !excluded.contains(name))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            };
            // One copy per socket; a duplicate family shares the frame.
            let mut reached: Vec<mpsc::UnboundedSender<String>> = Vec::new();
            let clients = state.clients.lock().expect("clients lock");
            for name in targets {
                if let Some(channel) = clients.get(&name)
                    && !reached.iter().any(|seen| seen.same_channel(channel))
                {
                    let _ = channel.send(raw.to_string());
                    reached.push(channel.clone());
                }
            }
        }
        MessageKind::Method(fqn) => {
            let target = message
                .target_module_name
                .clone()
                .or_else(|| target_module(fqn).ok().map(|(module, _)| module.to_string()));
            let Some(target) = target else {
                respond(tx, message, false, vec![json!({ "error": "unroutable message" })]);
                return;
            };
            if target == HUB_MODULE {
                // Control traffic addressed to the hub itself.
                respond(tx, message, true, vec![]);
                return;
            }
            if !forward(state, &target, raw) {
                let text = format!("no connected module named {target}");
                respond(tx, message, false, vec![json!({ "error": text })]);
            }
        }
    }
}

fn forward(state: &Arc<HubState>, target: &str, raw: &str) -> bool {
    let clients = state.clients.lock().expect("clients lock");
    match clients.get(target) {
        Some(channel) => channel.send(raw.to_string()).is_ok(),
        None => false,
    }
}

fn respond(
    tx: &mpsc::UnboundedSender<String>,
    original: &Message,
    success: bool,
    data: Vec<Value>,
) {
    let mut response = Message::new(MessageKind::Response);
    response.id = Some(new_id());
    response.time = Some(now_millis());
    response.request_id = original.id.clone();
    response.module_name = Some(HUB_MODULE.to_string());
    response.target_module_name = original.module_name.clone();
    response.success = Some(success);
    response.data = Some(data);
    let _ = send_message(tx, &response);
}

fn send_message(tx: &mpsc::UnboundedSender<String>, message: &Message) -> Result<()> {
    let text = message.encode().context("encode hub frame")?;
    tx.send(text).map_err(|_| anyhow::anyhow!("connection gone"))
}
