//! Scripted in-process hub for integration tests.
//!
//! The hub side of each test is played by hand: accept the client's
//! connection, read its frames, and answer with crafted ones. This keeps
//! every protocol exchange visible in the test body.
#![allow(dead_code)]

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::timeout;

use hublink_client::{BrokerConfig, ClientOptions, ConnectOptions, HubClient};
use hublink_transport::{WsEvent, WsReader, WsServer, WsWriter, ws_url};
use hublink_wire::{Message, MessageKind, new_id, now_millis};

pub const HUB_MODULE: &str = "hub.core";
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScriptedHub {
    writer: WsWriter,
    reader: WsReader,
}

/// Bind a hub endpoint on an ephemeral port.
pub async fn start_hub() -> Result<(WsServer, u16)> {
    let server = WsServer::bind("127.0.0.1:0".parse()?).await?;
    let port = server.local_addr()?.port();
    Ok((server, port))
}

/// Build a client for `module`.
pub fn client(module: &str) -> HubClient {
    HubClient::new(ClientOptions {
        module_name: module.to_string(),
        web_socket_url: "/core".to_string(),
        config: BrokerConfig::default(),
    })
}

/// Connect `client` and accept its socket on the hub side.
pub async fn connect_pair(client: &HubClient, server: &WsServer) -> Result<ScriptedHub> {
    let accept = server.accept();
    tokio::pin!(accept);
    client
        .connect(ConnectOptions::new("127.0.0.1", Some(server_port(server)?)))
        .context("connect client")?;
    let (writer, reader, _peer) = timeout(STEP_TIMEOUT, &mut accept)
        .await
        .context("accept deadline")??;
    client
        .wait_connected(Some(STEP_TIMEOUT))
        .await
        .context("client connect gate")?;
    Ok(ScriptedHub { writer, reader })
}

pub fn server_port(server: &WsServer) -> Result<u16> {
    Ok(server.local_addr()?.port())
}

/// URL the clients dial; exposed for tests that check it.
pub fn hub_url(port: u16) -> String {
    ws_url("127.0.0.1", Some(port), "/core", false)
}

impl ScriptedHub {
    /// Wrap an already-accepted connection (reconnect tests).
    pub fn from_halves(writer: WsWriter, reader: WsReader) -> Self {
        Self { writer, reader }
    }

    /// Read the next JSON frame, skipping transport-level noise.
    pub async fn read_message(&mut self) -> Result<Message> {
        let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = timeout(remaining, self.reader.recv())
                .await
                .context("read deadline")?;
            match frame {
                Some(Ok(WsEvent::Text(text))) => {
                    return Message::decode(&text).context("decode frame");
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err),
                None => return Err(anyhow!("connection closed")),
            }
        }
    }

    /// Read frames until `pred` matches, answering subscribe/unsubscribe
    /// requests with success so background chatter never stalls a test.
    pub async fn read_until(&mut self, pred: impl Fn(&Message) -> bool) -> Result<Message> {
        loop {
            let message = self.read_message().await?;
            if pred(&message) {
                return Ok(message);
            }
            if matches!(message.kind, MessageKind::Subscribe | MessageKind::Unsubscribe) {
                self.respond_success(&message, Vec::new()).await?;
            }
        }
    }

    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let text = message.encode().context("encode frame")?;
        self.writer.send_text(text).await
    }

    /// Answer `original` the way a peer module would.
    pub async fn respond(
        &mut self,
        original: &Message,
        success: bool,
        data: Vec<Value>,
        sender: &str,
    ) -> Result<()> {
        let mut response = Message::new(MessageKind::Response);
        response.id = Some(new_id());
        response.time = Some(now_millis());
        response.request_id = original.id.clone();
        response.module_name = Some(sender.to_string());
        response.target_module_name = original.module_name.clone();
        response.success = Some(success);
        response.data = Some(data);
        self.send(&response).await
    }

    pub async fn respond_success(&mut self, original: &Message, data: Vec<Value>) -> Result<()> {
        self.respond(original, true, data, HUB_MODULE).await
    }

    pub async fn respond_failure(&mut self, original: &Message, error: &str) -> Result<()> {
        self.respond(original, false, vec![json!({ "error": error })], HUB_MODULE)
            .await
    }

    /// Send a hub ping, optionally targeted at one family member.
    pub async fn ping(&mut self, target: Option<&str>) -> Result<Message> {
        let mut ping = Message::new(MessageKind::Ping);
        ping.id = Some(new_id());
        ping.time = Some(now_millis());
        ping.module_name = Some(HUB_MODULE.to_string());
        ping.target_module_name = target.map(str::to_string);
        self.send(&ping).await?;
        Ok(ping)
    }

    /// Deliver an event frame.
    pub async fn send_event(&mut self, event_name: &str, data: Vec<Value>) -> Result<()> {
        let mut event = Message::event(event_name, data);
        event.id = Some(new_id());
        event.time = Some(now_millis());
        event.module_name = Some(HUB_MODULE.to_string());
        self.send(&event).await
    }

    /// Deliver a method invocation as if routed from `caller`.
    pub async fn send_method(
        &mut self,
        fqn: &str,
        caller: &str,
        data: Vec<Value>,
    ) -> Result<Message> {
        let (target, _) = hublink_wire::target_module(fqn).context("method fqn")?;
        let mut message = Message::new(MessageKind::Method(fqn.to_string()));
        message.id = Some(new_id());
        message.time = Some(now_millis());
        message.module_name = Some(caller.to_string());
        message.target_module_name = Some(target.to_string());
        message.data = Some(data);
        self.send(&message).await?;
        Ok(message)
    }

    /// Tear the connection down from the hub side.
    pub async fn close(mut self) -> Result<()> {
        self.writer.send_close().await?;
        let _ = self.writer.close().await;
        Ok(())
    }
}
