//! Transport lifecycle: supervisor loop, reconnect, open/close cascades.
//!
//! # Design notes
//! One supervisor task per parent client dials, runs the connection until it
//! drops, then retries with the same options after a fixed delay. The read
//! loop stays hot: frames are dispatched inline, while handler work that can
//! await responses is spawned by the dispatcher.
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

use hublink_transport::{self as transport, WsEvent, WsReader, WsWriter};
use hublink_wire as wire;

use super::{ClientInner, ConnectOptions, FamilyRole, WriterCommand, dispatch_frame};
use crate::error::{ClientError, Result};
use crate::signal::ClientSignal;

/// Delay between a close and the next dial.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

const OUTBOUND_QUEUE_DEPTH: usize = 1024;

pub(crate) fn connect(inner: &Arc<ClientInner>, options: ConnectOptions) -> Result<()> {
    let FamilyRole::Parent(parent_state) = &inner.role else {
        return Err(ClientError::validation(
            "duplicates share the parent's connection",
        ));
    };
    if inner.destroyed.load(Ordering::SeqCst) {
        return Err(ClientError::Destroyed);
    }
    *parent_state.last_connect.lock().expect("options lock") = Some(options);
    if parent_state.supervisor_running.swap(true, Ordering::SeqCst) {
        // Already supervised; drop the current socket and dial the new options.
        parent_state.reconnect_now.notify_one();
    } else {
        let inner = Arc::clone(inner);
        let span = tracing::debug_span!("broker", module = %inner.module_name);
        tokio::spawn(run_supervisor(inner).instrument(span));
    }
    Ok(())
}

async fn run_supervisor(inner: Arc<ClientInner>) {
    loop {
        if inner.destroyed.load(Ordering::SeqCst) {
            break;
        }
        let options = match &inner.role {
            FamilyRole::Parent(parent_state) => {
                parent_state.last_connect.lock().expect("options lock").clone()
            }
            FamilyRole::Duplicate { .. } => None,
        };
        let Some(options) = options else { break };
        let url = transport::ws_url(
            &options.host,
            options.port,
            &inner.web_socket_url,
            options.tls,
        );
        match transport::connect(&url).await {
            Ok((writer, reader)) => {
                metrics::counter!("hublink_client_connects_total").increment(1);
                run_connection(&inner, writer, reader).await;
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "hub connection failed");
            }
        }
        if inner.destroyed.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
    if let FamilyRole::Parent(parent_state) = &inner.role {
        parent_state.supervisor_running.store(false, Ordering::SeqCst);
    }
}

async fn run_connection(inner: &Arc<ClientInner>, mut writer: WsWriter, mut reader: WsReader) {
    let FamilyRole::Parent(parent_state) = &inner.role else {
        return;
    };
    let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(OUTBOUND_QUEUE_DEPTH);
    *parent_state.writer.lock().expect("writer lock") = Some(writer_tx.clone());

    let writer_task = tokio::spawn(async move {
        while let Some(command) = writer_rx.recv().await {
            let result = match command {
                WriterCommand::Text(text) => {
                    metrics::counter!("hublink_client_frames_out_total").increment(1);
                    writer.send_text(text).await
                }
                WriterCommand::Pong(payload) => writer.send_pong(payload).await,
                WriterCommand::Close => {
                    let _ = writer.send_close().await;
                    break;
                }
            };
            if let Err(err) = result {
                tracing::debug!(error = %err, "websocket write failed");
                break;
            }
        }
        let _ = writer.close().await;
    });

    on_open(inner);

    loop {
        if inner.destroyed.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            frame = reader.recv() => match frame {
                Some(Ok(WsEvent::Text(text))) => dispatch_frame(inner, &text).await,
                Some(Ok(WsEvent::Ping(payload))) => {
                    let _ = writer_tx.send(WriterCommand::Pong(payload)).await;
                }
                Some(Ok(WsEvent::Pong(_) | WsEvent::Binary(_))) => {}
                Some(Ok(WsEvent::Close { code, reason })) => {
                    tracing::debug!(code, reason = %reason, "hub closed the connection");
                    break;
                }
                Some(Err(err)) => {
                    // The close path below drives the reconnect.
                    tracing::warn!(error = %err, "hub connection error");
                    break;
                }
                None => break,
            },
            _ = parent_state.reconnect_now.notified() => break,
        }
    }

    *parent_state.writer.lock().expect("writer lock") = None;
    let _ = writer_tx.send(WriterCommand::Close).await;
    drop(writer_tx);
    let _ = writer_task.await;
    on_close(inner);
}

fn on_open(inner: &Arc<ClientInner>) {
    // send_replace: the flag must flip even while nobody is watching.
    inner.connected.send_replace(true);
    inner.emit_signal(ClientSignal::Connect);
    reregister(inner);
    for duplicate in inner.live_duplicates() {
        duplicate.emit_signal(ClientSignal::Connect);
        reregister(&duplicate);
        let duplicate = Arc::clone(&duplicate);
        tokio::spawn(async move {
            // A duplicate announces its identity on the shared socket.
            if let Err(err) = duplicate.ping_server().await {
                tracing::debug!(
                    module = %duplicate.module_name,
                    error = %err,
                    "duplicate ping failed"
                );
            }
        });
    }
}

fn reregister(inner: &Arc<ClientInner>) {
    let registrars: Vec<String> = inner
        .state
        .lock()
        .expect("state lock")
        .registrars
        .iter()
        .cloned()
        .collect();
    for registrar in registrars {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            if let Err(err) = inner.register_handlers_to_remote(&registrar).await {
                tracing::warn!(
                    module = %inner.module_name,
                    registrar = %registrar,
                    error = %err,
                    "handler re-registration failed"
                );
            }
        });
    }
}

fn on_close(inner: &Arc<ClientInner>) {
    if !*inner.connected.borrow() {
        return;
    }
    inner.connected.send_replace(false);
    metrics::counter!("hublink_client_disconnects_total").increment(1);
    disconnect_cleanup(inner);
    for duplicate in inner.live_duplicates() {
        disconnect_cleanup(&duplicate);
    }
}

fn disconnect_cleanup(inner: &Arc<ClientInner>) {
    inner.emit_signal(ClientSignal::Disconnect);
    // The hub's connect announcements are stale across connections.
    let server = inner.server_module.lock().expect("server lock").clone();
    if let Some(server) = server {
        let connect_event = format!("{server}.{}", wire::MODULE_CONNECT_EVENT);
        inner
            .state
            .lock()
            .expect("state lock")
            .remove_subscription(&connect_event, None);
    }
}
