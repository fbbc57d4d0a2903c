// Subscription table behavior: delivery, once semantics, targeted removal.
mod common;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{client, connect_pair, start_hub};
use hublink_client::{ClientError, SignalKind, event_handler, wait_for_any};
use hublink_wire::MessageKind;

const STEP: Duration = Duration::from_secs(5);

fn recording_handler() -> (hublink_client::EventHandler, mpsc::UnboundedReceiver<Vec<Value>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = event_handler(move |args: &[Value]| {
        let _ = tx.send(args.to_vec());
        Ok(())
    });
    (handler, rx)
}

#[tokio::test]
async fn subscription_delivers_event_payloads() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;

    let (handler, mut seen) = recording_handler();
    let subscribe = tokio::spawn({
        let module = module.clone();
        async move { module.api("vendor", "mod").on("tick", handler).await }
    });
    let request = hub
        .read_until(|message| message.kind == MessageKind::Subscribe)
        .await?;
    assert_eq!(request.event_name.as_deref(), Some("vendor.mod.tick"));
    assert_eq!(request.target_module_name.as_deref(), Some("vendor.mod"));
    hub.respond_success(&request, vec![]).await?;
    subscribe.await.context("join")?.expect("subscribe");

    hub.send_event("vendor.mod.tick", vec![json!(42)]).await?;
    let args = timeout(STEP, seen.recv()).await.context("delivery")?.expect("args");
    assert_eq!(args, vec![json!(42)]);
    Ok(())
}

#[tokio::test]
async fn once_subscription_fires_exactly_once() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;

    let (handler, mut seen) = recording_handler();
    let subscribe = tokio::spawn({
        let module = module.clone();
        async move { module.api("vendor", "mod").once("tick", handler, None).await }
    });
    let request = hub
        .read_until(|message| message.kind == MessageKind::Subscribe)
        .await?;
    hub.respond_success(&request, vec![]).await?;
    subscribe.await.context("join")?.expect("subscribe");

    hub.send_event("vendor.mod.tick", vec![json!(42)]).await?;
    hub.send_event("vendor.mod.tick", vec![json!(43)]).await?;

    let args = timeout(STEP, seen.recv()).await.context("delivery")?.expect("args");
    assert_eq!(args, vec![json!(42)]);
    // The entry left the table after the first delivery.
    assert!(timeout(Duration::from_millis(300), seen.recv()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn duplicate_handlers_each_fire_and_removal_is_targeted() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;

    let (first, mut seen_first) = recording_handler();
    let (second, mut seen_second) = recording_handler();
    let api = module.api("vendor", "mod");

    let subscribe = tokio::spawn({
        let api = api.clone();
        let first = first.clone();
        let second = second.clone();
        async move {
            api.on("tick", first.clone()).await?;
            api.on("tick", second).await?;
            api.on("tick", first).await
        }
    });
    for _ in 0..3 {
        let request = hub
            .read_until(|message| message.kind == MessageKind::Subscribe)
            .await?;
        hub.respond_success(&request, vec![]).await?;
    }
    subscribe.await.context("join")?.expect("subscribe");

    hub.send_event("vendor.mod.tick", vec![json!(1)]).await?;
    // `first` was installed twice; both entries fire.
    for _ in 0..2 {
        let args = timeout(STEP, seen_first.recv()).await.context("first")?.expect("args");
        assert_eq!(args, vec![json!(1)]);
    }
    let args = timeout(STEP, seen_second.recv()).await.context("second")?.expect("args");
    assert_eq!(args, vec![json!(1)]);

    // Targeted removal takes one identity match and leaves the rest.
    let unsubscribe = tokio::spawn({
        let api = api.clone();
        let first = first.clone();
        async move { api.off("tick", Some(&first)).await }
    });
    let request = hub
        .read_until(|message| message.kind == MessageKind::Unsubscribe)
        .await?;
    assert_eq!(request.event_name.as_deref(), Some("vendor.mod.tick"));
    hub.respond_success(&request, vec![]).await?;
    unsubscribe.await.context("join")?.expect("unsubscribe");

    hub.send_event("vendor.mod.tick", vec![json!(2)]).await?;
    let args = timeout(STEP, seen_first.recv()).await.context("first again")?.expect("args");
    assert_eq!(args, vec![json!(2)]);
    let args = timeout(STEP, seen_second.recv()).await.context("second again")?.expect("args");
    assert_eq!(args, vec![json!(2)]);
    assert!(timeout(Duration::from_millis(300), seen_first.recv()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn a_failing_handler_does_not_interrupt_the_rest() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;

    let failing = event_handler(|_args| Err(ClientError::broker("handler exploded")));
    let (recording, mut seen) = recording_handler();
    let subscribe = tokio::spawn({
        let module = module.clone();
        async move {
            module
                .subscribe_to_api_event("vendor.mod.tick", failing)
                .await?;
            module.subscribe_to_api_event("vendor.mod.tick", recording).await
        }
    });
    for _ in 0..2 {
        let request = hub
            .read_until(|message| message.kind == MessageKind::Subscribe)
            .await?;
        hub.respond_success(&request, vec![]).await?;
    }
    subscribe.await.context("join")?.expect("subscribe");

    hub.send_event("vendor.mod.tick", vec![json!("payload")]).await?;
    let args = timeout(STEP, seen.recv()).await.context("delivery")?.expect("args");
    assert_eq!(args, vec![json!("payload")]);
    Ok(())
}

#[tokio::test]
async fn emit_is_limited_to_the_own_module() -> Result<()> {
    let module = client("peer.watcher");
    let err = module
        .api("vendor", "mod")
        .emit("tick", vec![json!(1)])
        .await
        .expect_err("foreign emit");
    assert!(matches!(err, ClientError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn own_module_emit_produces_an_event_frame() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;

    module
        .api("peer", "watcher")
        .exclude_clients(["peer.noisy".to_string()])
        .emit("status", vec![json!("ready")])
        .await
        .expect("emit");

    let event = hub
        .read_until(|message| message.kind == MessageKind::Event)
        .await?;
    assert_eq!(event.event_name.as_deref(), Some("peer.watcher.status"));
    assert_eq!(event.data, Some(vec![json!("ready")]));
    assert_eq!(event.excluded_clients, Some(vec!["peer.noisy".to_string()]));
    assert_eq!(event.module_name.as_deref(), Some("peer.watcher"));
    Ok(())
}

#[tokio::test]
async fn inbound_subscribe_for_the_own_module_surfaces_a_signal() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;
    let mut signals = module.signals();

    let mut request = hublink_wire::Message::new(MessageKind::Subscribe);
    request.id = Some(hublink_wire::new_id());
    request.module_name = Some(common::HUB_MODULE.to_string());
    request.event_name = Some("peer.watcher.status".to_string());
    hub.send(&request).await?;

    let signal = wait_for_any(&mut signals, &[SignalKind::SubscriptionAdded], Some(STEP))
        .await
        .expect("signal");
    match signal {
        hublink_client::ClientSignal::SubscriptionAdded { event_name } => {
            assert_eq!(event_name, "status");
        }
        other => panic!("unexpected signal: {other:?}"),
    }
    let response = hub
        .read_until(|message| message.kind == MessageKind::Response)
        .await?;
    assert_eq!(response.success, Some(true));
    assert_eq!(response.request_id, request.id);
    Ok(())
}

#[tokio::test]
async fn inbound_subscribe_for_an_unknown_module_fails() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.watcher");
    let mut hub = connect_pair(&module, &server).await?;

    let mut request = hublink_wire::Message::new(MessageKind::Subscribe);
    request.id = Some(hublink_wire::new_id());
    request.module_name = Some(common::HUB_MODULE.to_string());
    request.event_name = Some("some.other.status".to_string());
    hub.send(&request).await?;

    let response = hub
        .read_until(|message| message.kind == MessageKind::Response)
        .await?;
    assert_eq!(response.success, Some(false));
    let text = response.data.as_deref().unwrap()[0]["error"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(text.contains("some.other"), "diagnostic names the target: {text}");
    Ok(())
}
