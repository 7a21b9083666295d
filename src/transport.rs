//! WebSocket transport: dial target derivation and connection establishment.
//!
//! The channel to a device service is addressed as
//! `<scheme>://<host>/<base-path>/<deviceID>/<service>` and reached through a
//! gateway that forwards JSON-RPC to the device. Authorization happens at
//! upgrade time via an `Authorization` header on the dial request.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{DevlinkError, Result};

/// A live WebSocket connection to the gateway.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Outbound half, owned by the writer task.
pub(crate) type WsSink = SplitSink<WsStream, Message>;
/// Inbound half, owned by the read loop.
pub(crate) type WsSource = SplitStream<WsStream>;

/// Join base URL, device id and service into the dial target.
pub(crate) fn dial_url(base: &str, device_id: &str, service: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), device_id, service)
}

/// Dial the gateway, attaching the authorization header if one was supplied.
///
/// The whole handshake (TCP connect, TLS, WebSocket upgrade) is bounded by
/// `timeout`.
pub(crate) async fn dial(
    url: &str,
    authorization: Option<&str>,
    timeout: Duration,
) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| DevlinkError::InvalidUrl(e.to_string()))?;

    if let Some(value) = authorization {
        let header =
            HeaderValue::from_str(value).map_err(|e| DevlinkError::Auth(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, header);
    }

    let (stream, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| DevlinkError::Deadline)??;

    Ok(stream)
}
