//! WebSocket transport, optionally tunnelled through an HTTP proxy

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{MessageSink, MessageStream};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where and how to open the socket
#[derive(Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint, credentials included
    pub url: Url,
    /// HTTP proxy to tunnel through
    pub proxy: Option<Url>,
    /// Deadline for the TCP, TLS and WebSocket handshakes together
    pub connect_timeout: Duration,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("url", &redact(&self.url))
            .field("proxy", &self.proxy.as_ref().map(redact))
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// Render a URL with its query and password hidden
#[must_use]
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    if shown.query().is_some() {
        shown.set_query(Some("<redacted>"));
    }
    if shown.password().is_some() {
        let _ = shown.set_password(Some("<redacted>"));
    }
    shown.to_string()
}

fn ws_error(e: tungstenite::Error) -> Error {
    Error::Transport(e.to_string())
}

/// Open the WebSocket and split it into its two halves
///
/// # Errors
///
/// Returns [`Error::Transport`] if the connection cannot be established in time
pub async fn connect(config: &TransportConfig) -> Result<(WsSink, WsStream)> {
    tracing::debug!(
        url = %redact(&config.url),
        proxy = config.proxy.is_some(),
        "connecting"
    );

    let socket = tokio::time::timeout(config.connect_timeout, open_socket(config))
        .await
        .map_err(|_| {
            Error::Transport(format!(
                "connect timed out after {}s",
                config.connect_timeout.as_secs()
            ))
        })??;

    tracing::info!(host = config.url.host_str().unwrap_or_default(), "connected");

    let (sink, stream) = socket.split();
    Ok((WsSink { inner: sink }, WsStream { inner: stream }))
}

async fn open_socket(config: &TransportConfig) -> Result<Socket> {
    if let Some(proxy) = &config.proxy {
        let tunnel = open_tunnel(proxy, &config.url).await?;
        let (socket, _response) = tokio_tungstenite::client_async_tls(config.url.as_str(), tunnel)
            .await
            .map_err(ws_error)?;
        return Ok(socket);
    }

    let (socket, _response) = tokio_tungstenite::connect_async(config.url.as_str())
        .await
        .map_err(ws_error)?;
    Ok(socket)
}

/// Open a TCP tunnel to `target` through an HTTP `CONNECT` proxy
async fn open_tunnel(proxy: &Url, target: &Url) -> Result<TcpStream> {
    if proxy.scheme() != "http" {
        return Err(Error::Config(format!(
            "unsupported proxy scheme: {}",
            proxy.scheme()
        )));
    }

    let proxy_host = proxy
        .host_str()
        .ok_or_else(|| Error::Config("proxy URL has no host".to_string()))?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(80);

    let target_host = target
        .host_str()
        .ok_or_else(|| Error::Config("endpoint URL has no host".to_string()))?;
    let target_port = target.port_or_known_default().unwrap_or(443);

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| Error::Transport(format!("proxy connect failed: {e}")))?;

    let tunnel = if proxy.username().is_empty() {
        async_http_proxy::http_connect_tokio(&mut stream, target_host, target_port).await
    } else {
        let user = urlencoding::decode(proxy.username())
            .map_err(|e| Error::Config(format!("invalid proxy username: {e}")))?;
        let password = urlencoding::decode(proxy.password().unwrap_or_default())
            .map_err(|e| Error::Config(format!("invalid proxy password: {e}")))?;
        async_http_proxy::http_connect_tokio_with_basic_auth(
            &mut stream,
            target_host,
            target_port,
            &user,
            &password,
        )
        .await
    };
    tunnel.map_err(|e| {
        Error::Transport(format!(
            "proxy refused tunnel to {target_host}:{target_port}: {e}"
        ))
    })?;

    tracing::debug!(proxy = %redact(proxy), target_host, target_port, "proxy tunnel established");
    Ok(stream)
}

/// Outbound half of the WebSocket
pub struct WsSink {
    inner: SplitSink<Socket, Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(ws_error)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await.map_err(ws_error)
    }
}

/// Inbound half of the WebSocket
pub struct WsStream {
    inner: SplitStream<Socket>,
}

#[async_trait]
impl MessageStream for WsStream {
    async fn next_message(&mut self) -> Option<Result<String>> {
        loop {
            let frame = match self.inner.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(ws_error(e))),
            };

            match frame {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                // The service delivers JSON in binary frames too
                Message::Binary(data) => {
                    return Some(String::from_utf8(data.to_vec()).map_err(|e| {
                        Error::Decode(format!("binary frame is not UTF-8: {e}"))
                    }));
                }
                Message::Close(frame) => {
                    tracing::info!(?frame, "connection closed by server");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
