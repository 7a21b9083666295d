//! Client builder and runtime loop.
//!
//! [`Client`] multiplexes a single persistent WebSocket connection to a
//! device-hosted JSON-RPC service:
//!
//! 1. `connect` dials `<base>/<deviceID>/<service>` and spawns the read loop
//! 2. `call` issues a correlated request and awaits its response or timeout
//! 3. server notifications fan out to [`Subscription`]s
//! 4. a read failure earns one reconnect attempt; a second failure closes
//!    the client
//!
//! # Example
//!
//! ```ignore
//! use devlink::{Client, StaticAuth};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), devlink::DevlinkError> {
//!     let client = Client::builder("wss://gw.example.com/rpc", "mac:001122334455", "config")
//!         .auth(StaticAuth::new("Bearer token"))
//!         .build();
//!     client.connect().await?;
//!
//!     let mut events = client.subscribe(16)?;
//!     let outcome = client.call("ping", None, None).await?;
//!     println!("{:?} {:?}", outcome.result, outcome.error);
//!
//!     while let Some(evt) = events.recv().await {
//!         println!("{:?}", evt);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use serde_json::value::RawValue;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::auth::AuthProvider;
use crate::envelope::{classify, Inbound, Request, RpcError};
use crate::error::{DevlinkError, Result};
use crate::events::{Event, EventBus, EventKind, Subscription};
use crate::pending::PendingCalls;
use crate::transport::{dial, dial_url, WsSink, WsSource};
use crate::writer::{spawn_writer_task, WriterHandle, DEFAULT_WRITER_CAPACITY};

/// Default per-call timeout when the caller supplies none.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on the initial dial handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause before the single reconnect attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(300);

/// Bound on the reconnect dial.
const DEFAULT_RECONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// `source` stamped on every event this client publishes; the polling
/// discovery adapter stamps its own, letting consumers tell them apart.
const EVENT_SOURCE: &str = "adapter";

/// Lifecycle of the client's single connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; only `close` (a no-op by then) succeeds afterwards.
    Closed,
}

/// Outcome of a completed call.
///
/// An `error` here is application data carried in the response envelope, not
/// a failure of the call mechanism.
#[derive(Debug)]
pub struct CallOutcome {
    /// Raw result payload; decode with `serde_json` into a caller-chosen
    /// shape.
    pub result: Option<Box<RawValue>>,
    /// Structured JSON-RPC error, if the device returned one.
    pub error: Option<RpcError>,
}

struct Config {
    base_url: String,
    device_id: String,
    service: String,
    auth: Option<Arc<dyn AuthProvider>>,
    call_timeout: Duration,
    handshake_timeout: Duration,
    reconnect_delay: Duration,
    reconnect_timeout: Duration,
    writer_capacity: usize,
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    cfg: Config,
}

impl ClientBuilder {
    /// Start a builder for the given endpoint. `base_url` is the gateway
    /// WebSocket URL prefix without trailing slash; `device_id` and
    /// `service` identify the logical endpoint.
    pub fn new(
        base_url: impl Into<String>,
        device_id: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            cfg: Config {
                base_url: base_url.into(),
                device_id: device_id.into(),
                service: service.into(),
                auth: None,
                call_timeout: DEFAULT_CALL_TIMEOUT,
                handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
                reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
                writer_capacity: DEFAULT_WRITER_CAPACITY,
            },
        }
    }

    /// Supply the authorization provider consulted at dial time.
    pub fn auth(mut self, auth: impl AuthProvider + 'static) -> Self {
        self.cfg.auth = Some(Arc::new(auth));
        self
    }

    /// Default timeout applied to calls that don't specify one. Default: 5s.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.call_timeout = timeout;
        self
    }

    /// Bound on the initial dial handshake. Default: 10s.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.handshake_timeout = timeout;
        self
    }

    /// Pause between a read failure and the reconnect attempt. Default: 300ms.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.cfg.reconnect_delay = delay;
        self
    }

    /// Bound on the reconnect dial. Default: 2s.
    pub fn reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.reconnect_timeout = timeout;
        self
    }

    /// Capacity of the outbound frame queue. Default: 64.
    pub fn writer_capacity(mut self, capacity: usize) -> Self {
        self.cfg.writer_capacity = capacity;
        self
    }

    /// Build the client in the Disconnected state.
    pub fn build(self) -> Client {
        Client {
            inner: Arc::new(Inner {
                cfg: self.cfg,
                state: Mutex::new(ConnectionState::Disconnected),
                pending: PendingCalls::new(),
                bus: EventBus::new(),
                writer: Mutex::new(None),
                read_task: Mutex::new(None),
            }),
        }
    }
}

/// A client multiplexing one JSON-RPC channel to a device service.
///
/// Cheap to clone via internal `Arc`; all methods take `&self` and are safe
/// to invoke from any number of tasks concurrently.
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: Config,
    state: Mutex<ConnectionState>,
    pending: PendingCalls,
    bus: EventBus,
    writer: Mutex<Option<WriterHandle<WsSink>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(
        base_url: impl Into<String>,
        device_id: impl Into<String>,
        service: impl Into<String>,
    ) -> ClientBuilder {
        ClientBuilder::new(base_url, device_id, service)
    }

    /// Establish the connection and start the read loop.
    ///
    /// A no-op when already connected; fails with [`DevlinkError::Closed`]
    /// after `close`.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            match *state {
                ConnectionState::Closed => return Err(DevlinkError::Closed),
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        let url = dial_url(
            &self.inner.cfg.base_url,
            &self.inner.cfg.device_id,
            &self.inner.cfg.service,
        );
        let authorization = authorization_header(&self.inner.cfg);
        let stream = match dial(
            &url,
            authorization.as_deref(),
            self.inner.cfg.handshake_timeout,
        )
        .await
        {
            Ok(s) => s,
            Err(e) => {
                // Closed stays terminal even when a close raced the dial.
                let mut state = self.inner.state.lock().unwrap();
                if *state == ConnectionState::Connecting {
                    *state = ConnectionState::Disconnected;
                }
                return Err(e);
            }
        };

        let (sink, source) = stream.split();
        {
            // Re-check under the lock: a close that ran while the dial was
            // in flight must not be overwritten, and the whole install
            // happens before any read failure can transition the state.
            let mut state = self.inner.state.lock().unwrap();
            if *state == ConnectionState::Connecting {
                let (writer, _writer_task) =
                    spawn_writer_task(sink, self.inner.cfg.writer_capacity);
                *self.inner.writer.lock().unwrap() = Some(writer);
                *state = ConnectionState::Connected;

                let inner = self.inner.clone();
                let handle = tokio::spawn(read_loop(inner, source));
                *self.inner.read_task.lock().unwrap() = Some(handle);
                tracing::debug!(url = %url, "connected");
                return Ok(());
            }
        }

        // The client was closed mid-dial; discard the fresh connection
        // instead of installing it.
        let mut sink = sink;
        let _ = futures_util::SinkExt::close(&mut sink).await;
        Err(DevlinkError::Closed)
    }

    /// Issue a JSON-RPC call and await its response.
    ///
    /// `timeout` of `None` or zero defaults to the configured call timeout.
    /// Fails fast with [`DevlinkError::NotConnected`] when no live transport
    /// exists; there is no connect-on-demand. A deadline only ends this
    /// call's wait — the remote operation is not cancelled, and a reply
    /// arriving later is discarded as an orphan.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<CallOutcome> {
        if method.is_empty() {
            return Err(DevlinkError::MethodRequired);
        }
        let timeout = match timeout {
            Some(t) if !t.is_zero() => t,
            _ => self.inner.cfg.call_timeout,
        };

        if *self.inner.state.lock().unwrap() != ConnectionState::Connected {
            return Err(DevlinkError::NotConnected);
        }
        let writer = self
            .inner
            .writer
            .lock()
            .unwrap()
            .clone()
            .ok_or(DevlinkError::NotConnected)?;

        let id = Uuid::new_v4().to_string();
        let text = Request::new(&id, method, params.as_ref()).encode()?;
        // The guard deregisters on drop, covering timeout, write failure,
        // and a caller abandoning this future mid-flight.
        let mut pending = self.inner.pending.register(id);

        writer.write(text).await?;

        match tokio::time::timeout(timeout, &mut pending.rx).await {
            Err(_) => Err(DevlinkError::Deadline),
            // Sender dropped: the table was drained by close.
            Ok(Err(_)) => Err(DevlinkError::ConnectionClosed),
            Ok(Ok(resp)) => Ok(CallOutcome {
                result: resp.result,
                error: resp.error,
            }),
        }
    }

    /// Subscribe to connection-state changes and server notifications.
    ///
    /// `buffer` bounds the subscriber's queue; events beyond it are dropped
    /// for this subscriber only.
    pub fn subscribe(&self, buffer: usize) -> Result<Subscription> {
        if *self.inner.state.lock().unwrap() == ConnectionState::Closed {
            return Err(DevlinkError::Closed);
        }
        Ok(self.inner.bus.subscribe(buffer))
    }

    /// Close the client: terminal and idempotent.
    ///
    /// Closes the transport, resolves every pending call with a
    /// connection-closed error, and ends every subscription exactly once.
    pub async fn close(&self) {
        self.inner.shutdown(true).await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// The device this client is bound to.
    pub fn device_id(&self) -> &str {
        &self.inner.cfg.device_id
    }
}

impl Clone for Client {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        *self.state.lock().unwrap() == ConnectionState::Closed
    }

    fn publish(&self, kind: EventKind, payload: Value) {
        self.bus.publish(Event::now(
            kind,
            self.cfg.device_id.clone(),
            EVENT_SOURCE,
            payload,
        ));
    }

    /// Redial with the same parameters and atomically swap the transport:
    /// the writer closes the old sink and installs the new one, and the
    /// caller resumes reading from the returned source. Pending calls are
    /// not disturbed.
    async fn redial(&self) -> Result<WsSource> {
        let url = dial_url(&self.cfg.base_url, &self.cfg.device_id, &self.cfg.service);
        let authorization = authorization_header(&self.cfg);
        let stream = dial(&url, authorization.as_deref(), self.cfg.reconnect_timeout).await?;
        let (sink, source) = stream.split();

        let writer = self.writer.lock().unwrap().clone();
        match writer {
            Some(w) => w.swap(sink).await,
            None => return Err(DevlinkError::NotConnected),
        }
        Ok(source)
    }

    /// Shared close path for `Client::close` and the read loop's fatal exit.
    /// The read loop must not abort itself, hence `abort_reader`.
    async fn shutdown(&self, abort_reader: bool) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        let writer = self.writer.lock().unwrap().take();
        if let Some(w) = writer {
            w.shutdown().await;
        }
        self.pending.cancel_all();
        self.bus.close_all();

        if abort_reader {
            let task = self.read_task.lock().unwrap().take();
            if let Some(t) = task {
                t.abort();
            }
        }
        tracing::debug!(device_id = %self.cfg.device_id, "client closed");
    }
}

fn authorization_header(cfg: &Config) -> Option<String> {
    let auth = cfg.auth.as_ref()?;
    match auth.authorization_value() {
        Ok(v) if !v.is_empty() => Some(v),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %e, "authorization value unavailable, dialing without header");
            None
        }
    }
}

/// Per-connection-epoch read loop: classify inbound frames, complete pending
/// calls, publish notifications, and drive the bounded recovery on failure.
async fn read_loop(inner: Arc<Inner>, mut source: WsSource) {
    let mut retried = false;
    loop {
        let failure = match source.next().await {
            Some(Ok(Message::Text(text))) => {
                handle_frame(&inner, text.as_str());
                continue;
            }
            // Binary, ping and pong frames are not part of the protocol.
            Some(Ok(Message::Close(_))) | None => "connection closed by peer".to_string(),
            Some(Ok(_)) => continue,
            Some(Err(e)) => e.to_string(),
        };

        if inner.is_closed() {
            return;
        }

        // The retried flag spans this loop's whole lifetime: after one
        // successful reconnect, the next failure is fatal immediately.
        // Intentionally preserved pending product clarification; see
        // DESIGN.md.
        if !retried {
            retried = true;
            inner.publish(
                EventKind::Offline,
                json!(format!("read error, retrying once: {failure}")),
            );
            tokio::time::sleep(inner.cfg.reconnect_delay).await;
            match inner.redial().await {
                Ok(new_source) => {
                    tracing::debug!("reconnected");
                    source = new_source;
                    continue;
                }
                Err(e) => tracing::warn!(error = %e, "reconnect failed"),
            }
        }

        inner.publish(EventKind::Offline, Value::String(failure));
        inner.shutdown(false).await;
        return;
    }
}

fn handle_frame(inner: &Inner, text: &str) {
    match classify(text) {
        Inbound::Response(resp) => {
            let id = resp.id.clone();
            if !inner.pending.complete(&id, resp) {
                // Orphan: e.g. the reply arrived after a local timeout
                // already resolved the call.
                tracing::debug!(%id, "discarding response with no pending call");
            }
        }
        Inbound::Notification(note) => {
            let payload = json!({ "method": note.method, "params": note.params });
            inner.publish(EventKind::Notification, payload);
        }
        Inbound::Malformed => {
            tracing::debug!("discarding malformed frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> Client {
        Client::builder("ws://localhost:9", "mac:001122334455", "config").build()
    }

    #[test]
    fn builder_defaults() {
        let client = test_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.inner.cfg.call_timeout, DEFAULT_CALL_TIMEOUT);
        assert_eq!(client.inner.cfg.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(client.device_id(), "mac:001122334455");
    }

    #[test]
    fn builder_configuration() {
        let client = Client::builder("ws://localhost:9", "dev", "svc")
            .call_timeout(Duration::from_secs(1))
            .handshake_timeout(Duration::from_secs(2))
            .reconnect_delay(Duration::from_millis(10))
            .reconnect_timeout(Duration::from_millis(500))
            .writer_capacity(8)
            .build();

        assert_eq!(client.inner.cfg.call_timeout, Duration::from_secs(1));
        assert_eq!(client.inner.cfg.handshake_timeout, Duration::from_secs(2));
        assert_eq!(client.inner.cfg.reconnect_delay, Duration::from_millis(10));
        assert_eq!(
            client.inner.cfg.reconnect_timeout,
            Duration::from_millis(500)
        );
        assert_eq!(client.inner.cfg.writer_capacity, 8);
    }

    #[tokio::test]
    async fn call_requires_method() {
        let client = test_client();
        let err = client.call("", None, None).await.unwrap_err();
        assert!(matches!(err, DevlinkError::MethodRequired));
    }

    #[tokio::test]
    async fn call_without_connection_fails_fast() {
        let client = test_client();
        let err = client.call("ping", None, None).await.unwrap_err();
        assert!(matches!(err, DevlinkError::NotConnected));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminal() {
        let client = test_client();
        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Closed);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, DevlinkError::Closed));
        let err = client.subscribe(4).unwrap_err();
        assert!(matches!(err, DevlinkError::Closed));
        let err = client.call("ping", None, None).await.unwrap_err();
        assert!(matches!(err, DevlinkError::NotConnected));
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let client = test_client();
        let mut sub = client.subscribe(4).unwrap();
        client.close().await;
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn auth_header_skipped_when_empty_or_failing() {
        use crate::auth::StaticAuth;

        let cfg = Client::builder("ws://x", "d", "s")
            .auth(StaticAuth::new(""))
            .build();
        assert!(authorization_header(&cfg.inner.cfg).is_none());

        struct FailingAuth;
        impl crate::auth::AuthProvider for FailingAuth {
            fn authorization_value(&self) -> crate::error::Result<String> {
                Err(DevlinkError::Auth("token source down".into()))
            }
        }
        let cfg = Client::builder("ws://x", "d", "s").auth(FailingAuth).build();
        assert!(authorization_header(&cfg.inner.cfg).is_none());

        let cfg = Client::builder("ws://x", "d", "s")
            .auth(StaticAuth::new("Bearer t"))
            .build();
        assert_eq!(
            authorization_header(&cfg.inner.cfg).as_deref(),
            Some("Bearer t")
        );
    }
}
