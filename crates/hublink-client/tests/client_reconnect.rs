// Reconnect, resubscribe, and registrar re-registration across drops.
mod common;

use anyhow::{Context, Result};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;

use common::{HUB_MODULE, ScriptedHub, client, connect_pair, start_hub};
use hublink_client::{SignalKind, event_handler, wait_for_any};
use hublink_wire::MessageKind;

const STEP: Duration = Duration::from_secs(5);

#[tokio::test]
async fn the_client_redials_after_a_close() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.resilient");
    let mut signals = module.signals();
    let hub = connect_pair(&module, &server).await?;

    hub.close().await?;
    wait_for_any(&mut signals, &[SignalKind::Disconnect], Some(STEP))
        .await
        .expect("disconnect signal");
    assert!(!module.is_connected());

    // The supervisor dials again with the same options about a second later.
    let (_writer, _reader, _peer) = timeout(STEP, server.accept()).await.context("redial")??;
    wait_for_any(&mut signals, &[SignalKind::Connect], Some(STEP))
        .await
        .expect("connect signal");
    assert!(module.is_connected());
    Ok(())
}

#[tokio::test]
async fn a_ping_after_reconnect_replays_subscriptions_and_registrations() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.resilient");
    module
        .register_api_handler("work", hublink_client::value_handler(|_| async { Ok(vec![]) }))
        .expect("register");
    let mut signals = module.signals();
    let mut hub = connect_pair(&module, &server).await?;

    // Establish a registrar and a subscription on the first connection.
    let registration = tokio::spawn({
        let module = module.clone();
        async move { module.register_handlers_to_remote(HUB_MODULE).await }
    });
    let request = hub
        .read_until(|message| matches!(&message.kind, MessageKind::Method(_)))
        .await?;
    hub.respond_success(&request, vec![]).await?;
    registration.await.context("join")?.expect("registration");

    let subscribe = tokio::spawn({
        let module = module.clone();
        async move {
            module
                .subscribe_to_api_event("vendor.mod.tick", event_handler(|_| Ok(())))
                .await
        }
    });
    let request = hub
        .read_until(|message| message.kind == MessageKind::Subscribe)
        .await?;
    hub.respond_success(&request, vec![]).await?;
    subscribe.await.context("join")?.expect("subscribe");

    // Drop the connection; the client comes back on its own.
    hub.close().await?;
    wait_for_any(&mut signals, &[SignalKind::Disconnect], Some(STEP))
        .await
        .expect("disconnect signal");
    let accept = timeout(STEP, server.accept()).await.context("redial")??;
    let mut hub = ScriptedHub::from_halves(accept.0, accept.1);
    wait_for_any(&mut signals, &[SignalKind::Connect], Some(STEP))
        .await
        .expect("connect signal");

    // Registrars are re-registered without being asked.
    let request = hub
        .read_until(|message| {
            message.kind.as_str() == "hub.core.registerAPIHandlers"
        })
        .await?;
    assert_eq!(
        request.data,
        Some(vec![json!("peer.resilient.work")]),
        "handler keys are re-announced"
    );
    hub.respond_success(&request, vec![]).await?;

    // A hub ping is answered and triggers a fresh subscribe per table entry.
    hub.ping(None).await?;
    let response = hub
        .read_until(|message| message.kind == MessageKind::Response)
        .await?;
    assert_eq!(response.success, Some(true));
    let request = hub
        .read_until(|message| {
            message.kind == MessageKind::Subscribe
                && message.event_name.as_deref() == Some("vendor.mod.tick")
        })
        .await?;
    hub.respond_success(&request, vec![]).await?;
    Ok(())
}

#[tokio::test]
async fn an_in_flight_request_fails_when_the_connection_drops() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.resilient");
    let mut hub = connect_pair(&module, &server).await?;

    let api = module.api("acme", "calc").call_timeout(Duration::from_millis(400));
    let call = tokio::spawn(async move { api.call("slow", vec![]).await });
    let _request = hub
        .read_until(|message| matches!(&message.kind, MessageKind::Method(_)))
        .await?;
    hub.close().await?;

    let err = call.await.context("join")?.expect_err("no response ever comes");
    assert!(
        matches!(err.code(), "TIMEOUT" | "TRANSPORT"),
        "got {err:?}"
    );

    // The client recovers; the next connection serves calls normally.
    let accept = timeout(STEP, server.accept()).await.context("redial")??;
    let mut hub = ScriptedHub::from_halves(accept.0, accept.1);
    module.wait_connected(Some(STEP)).await.expect("reconnected");
    let call = tokio::spawn({
        let module = module.clone();
        async move {
            module
                .api("acme", "calc")
                .call("add", vec![json!(1), json!(2)])
                .await
        }
    });
    let request = hub
        .read_until(|message| matches!(&message.kind, MessageKind::Method(_)))
        .await?;
    hub.respond(&request, true, vec![json!(3)], "acme.calc").await?;
    assert_eq!(call.await.context("join")?.expect("payload"), vec![json!(3)]);
    Ok(())
}

#[tokio::test]
async fn force_reconnect_cycles_the_transport() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.resilient");
    let mut signals = module.signals();
    let _hub = connect_pair(&module, &server).await?;

    module.force_reconnect();
    wait_for_any(&mut signals, &[SignalKind::Disconnect], Some(STEP))
        .await
        .expect("disconnect signal");
    let _second = timeout(STEP, server.accept()).await.context("redial")??;
    wait_for_any(&mut signals, &[SignalKind::Connect], Some(STEP))
        .await
        .expect("connect signal");
    Ok(())
}

#[tokio::test]
async fn destroy_stops_the_reconnect_loop() -> Result<()> {
    let (server, _port) = start_hub().await?;
    let module = client("peer.resilient");
    let mut signals = module.signals();
    let _hub = connect_pair(&module, &server).await?;

    module.destroy().await;
    wait_for_any(&mut signals, &[SignalKind::Destroy], Some(STEP))
        .await
        .expect("destroy signal");

    // No redial follows a destroy.
    assert!(
        timeout(Duration::from_millis(1800), server.accept()).await.is_err(),
        "destroyed clients stay down"
    );
    Ok(())
}
