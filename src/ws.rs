use crate::error::Error;
use crate::transport::{EventSink, Transport, TransportEvent, TransportHandle};
use futures_util::{SinkExt, StreamExt};
use http::{HeaderName, HeaderValue};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    client_async_tls_with_config,
    tungstenite::client::IntoClientRequest,
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::CloseFrame,
    tungstenite::Message,
    Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for the default WebSocket transport
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Additional headers for the connection request (e.g. auth)
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl WsTransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            headers: Vec::new(),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }
}

/// Default [`Transport`] backed by tokio-tungstenite.
///
/// `connect` spawns a socket task that performs the handshake and then pumps
/// frames in both directions; the handle forwards outbound frames into that
/// task. The outcome of the handshake arrives through the event sink
/// (`Opened` or `Failed`), never as a return value.
pub struct WsTransport {
    config: WsTransportConfig,
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self { config }
    }
}

impl Transport for WsTransport {
    type Handle = WsHandle;

    fn connect(&self, events: EventSink) -> WsHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(self.config.clone(), events, command_rx));
        WsHandle { command_tx }
    }
}

#[derive(Debug)]
enum WsCommand {
    Send(String),
    Close { code: u16, reason: String },
}

/// Handle to one socket task. Frames queued before the handshake completes
/// are sent once it does; if the handshake fails they are dropped.
pub struct WsHandle {
    command_tx: mpsc::UnboundedSender<WsCommand>,
}

impl TransportHandle for WsHandle {
    fn send(&self, text: String) -> bool {
        self.command_tx.send(WsCommand::Send(text)).is_ok()
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.command_tx.send(WsCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_socket(
    config: WsTransportConfig,
    events: EventSink,
    mut commands: mpsc::UnboundedReceiver<WsCommand>,
) {
    let stream = match timeout(config.connect_timeout, establish(&config)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(error)) => {
            events.emit(TransportEvent::Failed(error));
            return;
        }
        Err(_) => {
            events.emit(TransportEvent::Failed(Error::ConnectionFailed(
                "connection timeout".to_string(),
            )));
            return;
        }
    };

    info!(url = %config.url, "connected");
    events.emit(TransportEvent::Opened);

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    debug!("received ping, sending pong");
                    if let Err(error) = write.send(Message::Pong(data)).await {
                        events.emit(TransportEvent::Failed(error.into()));
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = close_details(frame);
                    info!(code, %reason, "peer initiated close");
                    events.emit(TransportEvent::Closing {
                        code,
                        reason: reason.clone(),
                    });
                    // Drive the close handshake to completion
                    while let Some(Ok(_)) = read.next().await {}
                    events.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(%error, "socket error");
                    events.emit(TransportEvent::Failed(error.into()));
                    return;
                }
                None => {
                    info!("socket stream ended");
                    events.emit(TransportEvent::Closed {
                        code: 1006,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(WsCommand::Send(text)) => {
                    if let Err(error) = write.send(Message::Text(text)).await {
                        warn!(%error, "send failed");
                        events.emit(TransportEvent::Failed(error.into()));
                        return;
                    }
                }
                Some(WsCommand::Close { code, reason }) => {
                    debug!(code, %reason, "closing socket");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    events.emit(TransportEvent::Closing {
                        code,
                        reason: reason.clone(),
                    });
                    // Wait for the peer's close or the stream to end
                    while let Some(Ok(message)) = read.next().await {
                        if matches!(message, Message::Close(_)) {
                            break;
                        }
                    }
                    events.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                None => {
                    // Handle dropped: close quietly
                    let _ = write.send(Message::Close(None)).await;
                    events.emit(TransportEvent::Closed {
                        code: 1000,
                        reason: "handle dropped".to_string(),
                    });
                    return;
                }
            }
        }
    }
}

fn close_details(frame: Option<CloseFrame<'_>>) -> (u16, String) {
    match frame {
        Some(frame) => (u16::from(frame.code), frame.reason.to_string()),
        None => (1005, String::new()),
    }
}

/// Connect the TCP stream and perform the WebSocket handshake
async fn establish(config: &WsTransportConfig) -> Result<WsStream, Error> {
    let url = Url::parse(&config.url)
        .map_err(|e| Error::ConnectionFailed(format!("invalid URL: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| Error::ConnectionFailed("no host in URL".to_string()))?;

    let is_tls = url.scheme() == "wss";
    let port = url.port().unwrap_or(if is_tls { 443 } else { 80 });

    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::ConnectionFailed(format!("invalid WebSocket request: {e}")))?;
    for (name, value) in &config.headers {
        request.headers_mut().insert(name.clone(), value.clone());
    }

    let tcp_stream = connect_direct(host, port).await?;
    set_tcp_options(&tcp_stream);

    let connector = if is_tls {
        let tls = native_tls::TlsConnector::new()
            .map_err(|e| Error::ConnectionFailed(format!("TLS error: {e}")))?;
        Some(Connector::NativeTls(tls))
    } else {
        None
    };

    let (ws_stream, _response) = client_async_tls_with_config(request, tcp_stream, None, connector)
        .await
        .map_err(Error::WebSocket)?;

    Ok(ws_stream)
}

async fn connect_direct(host: &str, port: u16) -> Result<tokio::net::TcpStream, Error> {
    let dest_addr: SocketAddr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::ConnectionFailed(format!("DNS lookup failed: {e}")))?
        .next()
        .ok_or_else(|| Error::ConnectionFailed(format!("no addresses found for {host}")))?;

    let socket = if dest_addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| Error::ConnectionFailed(format!("failed to create socket: {e}")))?;

    socket
        .connect(dest_addr)
        .await
        .map_err(|e| Error::ConnectionFailed(format!("TCP connect to {dest_addr} failed: {e}")))
}

/// Disable Nagle and enable keepalive to detect dead connections
fn set_tcp_options(stream: &tokio::net::TcpStream) {
    let sock = socket2::SockRef::from(stream);
    let _ = sock.set_nodelay(true);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));
    let _ = sock.set_tcp_keepalive(&keepalive);
}
