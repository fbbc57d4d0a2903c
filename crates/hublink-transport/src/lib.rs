// WebSocket transport configuration and primitives.
use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite;

/// Concrete client-side stream type behind the writer/reader halves.
type ClientStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;
/// Server-side streams skip TLS negotiation; acceptors exist for tests and demos.
type ServerStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// Transport-level configuration defaults.
///
/// ```
/// use hublink_transport::TransportConfig;
///
/// let config = TransportConfig::default();
/// assert!(config.max_packet_size > 0);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_packet_size: usize,
    pub tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        // Large enough for most dev/test payloads; the broker layer warns
        // before handing oversized frames to us.
        Self {
            max_packet_size: 4 * 1024 * 1024,
            tls: false,
        }
    }
}

/// Received WebSocket frame, reduced to what the broker layer consumes.
#[derive(Debug)]
pub enum WsEvent {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Write half of a WebSocket connection.
pub struct WsWriter {
    sink: WsSink,
}

enum WsSink {
    Client(futures_util::stream::SplitSink<ClientStream, tungstenite::Message>),
    Server(futures_util::stream::SplitSink<ServerStream, tungstenite::Message>),
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(tungstenite::Message::Text(text)).await
    }

    /// Send a pong frame in response to a ping.
    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.send(tungstenite::Message::Pong(payload)).await
    }

    /// Send a close frame.
    pub async fn send_close(&mut self) -> Result<()> {
        self.send(tungstenite::Message::Close(None)).await
    }

    /// Flush pending writes and close the sink.
    pub async fn close(&mut self) -> Result<()> {
        match &mut self.sink {
            WsSink::Client(sink) => sink.close().await.context("close websocket"),
            WsSink::Server(sink) => sink.close().await.context("close websocket"),
        }
    }

    async fn send(&mut self, message: tungstenite::Message) -> Result<()> {
        match &mut self.sink {
            WsSink::Client(sink) => sink.send(message).await.context("websocket send"),
            WsSink::Server(sink) => sink.send(message).await.context("websocket send"),
        }
    }
}

/// Read half of a WebSocket connection.
pub struct WsReader {
    stream: WsStream,
}

enum WsStream {
    Client(futures_util::stream::SplitStream<ClientStream>),
    Server(futures_util::stream::SplitStream<ServerStream>),
}

impl WsReader {
    /// Receive the next frame, returning `None` when the stream ends.
    /// Raw frame variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsEvent>> {
        loop {
            let next = match &mut self.stream {
                WsStream::Client(stream) => stream.next().await,
                WsStream::Server(stream) => stream.next().await,
            };
            match next {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsEvent::Text(text)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsEvent::Binary(data)));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsEvent::Ping(data)));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsEvent::Pong(data)));
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (frame.code.into(), frame.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsEvent::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => continue,
                Some(Err(err)) => return Some(Err(anyhow!("websocket read: {err}"))),
                None => return None,
            }
        }
    }
}

/// Build the broker URL for a hub endpoint.
///
/// ```
/// use hublink_transport::ws_url;
///
/// assert_eq!(ws_url("hub.local", Some(8080), "/core", false), "ws://hub.local:8080/core");
/// assert_eq!(ws_url("hub.local", None, "/core", true), "wss://hub.local/core");
/// ```
pub fn ws_url(host: &str, port: Option<u16>, path: &str, tls: bool) -> String {
    let scheme = if tls { "wss" } else { "ws" };
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    match port {
        Some(port) => format!("{scheme}://{host}:{port}{path}"),
        None => format!("{scheme}://{host}{path}"),
    }
}

/// Connect to a hub URL and return split writer/reader halves.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("websocket connect to {url}"))?;
    tracing::debug!(url, "websocket connected");
    let (sink, stream) = stream.split();
    Ok((
        WsWriter {
            sink: WsSink::Client(sink),
        },
        WsReader {
            stream: WsStream::Client(stream),
        },
    ))
}

/// Listening WebSocket endpoint for tests and demos.
///
/// The hub proper is an external collaborator; this acceptor exists so the
/// client crate can exercise full round trips in-process.
pub struct WsServer {
    listener: TcpListener,
}

impl WsServer {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("bind websocket server")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("read websocket local address")
    }

    /// Accept the next connection and complete the WebSocket handshake.
    pub async fn accept(&self) -> Result<(WsWriter, WsReader, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await.context("accept tcp")?;
        let stream = tokio_tungstenite::accept_async(stream)
            .await
            .context("websocket handshake")?;
        tracing::debug!(%peer, "websocket accepted");
        let (sink, stream) = stream.split();
        Ok((
            WsWriter {
                sink: WsSink::Server(sink),
            },
            WsReader {
                stream: WsStream::Server(stream),
            },
            peer,
        ))
    }
}
