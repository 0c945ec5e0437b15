//! Connection management and request dispatch.

use crate::error::ClientError;
use crate::stream::ClientStream;
use crate::transaction::TransactionState;
use oxidb_protocol::value::to_wire;
use oxidb_protocol::{read_frame, write_frame, Command, Request, Response};
use oxidb_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web PKI roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the configured host).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    /// TLS enabled, verified against the bundled roots.
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Username and password for `auth_simple`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Limit on waiting for each response. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
    /// Credentials sent right after connecting (optional).
    pub auth: Option<Credentials>,
    /// TLS configuration (optional).
    pub tls: Option<TlsClientConfig>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: None,
            auth: None,
            tls: None,
        }
    }

    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = Some(Credentials::new(username, password));
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }
}

/// A connection to an OxiDB server.
///
/// Frames carry no correlation id, so the stream mutex is held across the
/// whole write-then-read cycle of every request. Concurrent callers queue on
/// it and each receives the response to its own request.
///
/// Once closed, either explicitly or because a request failed at the
/// transport level, a connection is never reopened.
pub struct Connection {
    config: ConnectionConfig,
    /// `None` once closed, and while a request is in flight.
    stream: Mutex<Option<ClientStream>>,
    open: AtomicBool,
    transaction: parking_lot::Mutex<TransactionState>,
}

impl Connection {
    /// Connects to the server and authenticates if credentials are configured.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        let stream = ClientStream::connect(&config).await?;
        let conn = Self::new(config, stream);
        tracing::debug!(addr = %conn.config.addr(), "connected");

        if let Some(creds) = conn.config.auth.clone() {
            if let Err(e) = conn.authenticate(&creds).await {
                conn.close().await;
                return Err(e);
            }
        }

        Ok(conn)
    }

    fn new(config: ConnectionConfig, stream: ClientStream) -> Self {
        Self {
            config,
            stream: Mutex::new(Some(stream)),
            open: AtomicBool::new(true),
            transaction: parking_lot::Mutex::new(TransactionState::Idle),
        }
    }

    async fn authenticate(&self, creds: &Credentials) -> Result<(), ClientError> {
        tracing::debug!(username = %creds.username, "authenticating");
        let request = Request::new(Command::AuthSimple)
            .with("username", creds.username.as_str())
            .with("password", creds.password.as_str());

        let response = self.request(&request).await?;
        if response.is_error() {
            return Err(ClientError::from_response(response));
        }
        Ok(())
    }

    /// Sends one request and waits for its response.
    ///
    /// The lock is held from before the write until the response is decoded.
    /// A transport or framing failure (including an elapsed read timeout)
    /// closes the connection. A failed envelope is returned as-is; it is the
    /// caller's job to classify it.
    pub async fn request<T>(&self, payload: &T) -> Result<Response, ClientError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = to_wire(payload).map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        let mut guard = self.stream.lock().await;
        if !self.is_open() {
            return Err(ClientError::ConnectionClosed);
        }
        // Taken for the duration of the cycle. If this future is dropped
        // mid-request the stream goes with it, since its framing state is lost.
        let Some(mut stream) = guard.take() else {
            self.mark_closed();
            return Err(ClientError::ConnectionClosed);
        };

        match self.exchange(&mut stream, &bytes).await {
            Ok(response) => {
                *guard = Some(stream);
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(error = %e, "request failed, closing connection");
                drop(stream);
                self.mark_closed();
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        stream: &mut ClientStream,
        payload: &[u8],
    ) -> Result<Response, ClientError> {
        let written = write_frame(stream, payload).await?;

        let frame = match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read_frame(stream))
                .await
                .map_err(|_| ClientError::ReadTimeout(limit))??,
            None => read_frame(stream).await?,
        };
        tracing::debug!(written, read = frame.len(), "request complete");

        Ok(Response::decode(&frame)?)
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.set_transaction_state(TransactionState::Idle);
    }

    /// Returns whether the connection can still carry requests.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Closes the connection. Calling this more than once is harmless.
    ///
    /// Waits for an in-flight request to finish first.
    pub async fn close(&self) {
        self.mark_closed();
        let stream = self.stream.lock().await.take();
        if let Some(mut stream) = stream {
            tracing::debug!(addr = %self.config.addr(), "closing connection");
            let _ = stream.shutdown().await;
        }
    }

    /// Returns the configuration this connection was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns the client's view of the server-side transaction.
    pub fn transaction_state(&self) -> TransactionState {
        *self.transaction.lock()
    }

    pub(crate) fn set_transaction_state(&self, state: TransactionState) {
        *self.transaction.lock() = state;
    }

    /// Moves `Idle` to `Active`. Returns false if a transaction was already active.
    pub(crate) fn reserve_transaction(&self) -> bool {
        let mut state = self.transaction.lock();
        if *state == TransactionState::Active {
            return false;
        }
        *state = TransactionState::Active;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxidb_protocol::value::from_wire;
    use oxidb_protocol::Value;
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};

    async fn listener() -> (TcpListener, ConnectionConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ConnectionConfig::new("127.0.0.1", port))
    }

    async fn recv(socket: &mut TcpStream) -> Option<Value> {
        let payload = read_frame(socket).await.ok()?;
        Some(from_wire(&payload).unwrap())
    }

    async fn send(socket: &mut TcpStream, value: Value) {
        write_frame(socket, &to_wire(&value).unwrap()).await.unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:4444");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.read_timeout.is_none());
        assert!(config.auth.is_none());
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_request_response() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = recv(&mut socket).await.unwrap();
            assert_eq!(request, json!({"cmd": "ping"}));
            send(&mut socket, json!({"ok": true, "data": "pong"})).await;
        });

        let conn = Connection::open(config).await.unwrap();
        let response = conn.request(&Request::new(Command::Ping)).await.unwrap();
        assert_eq!(response.data, Some(json!("pong")));
        assert!(conn.is_open());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection_open() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            while recv(&mut socket).await.is_some() {
                send(&mut socket, json!({"ok": false, "error": "collection not found"})).await;
            }
        });

        let conn = Connection::open(config).await.unwrap();
        for _ in 0..2 {
            let response = conn.request(&json!({"cmd": "count"})).await.unwrap();
            assert!(response.is_error());
        }
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_eof_poisons_connection() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = recv(&mut socket).await;
            // Reply with a truncated frame, then hang up
            use tokio::io::AsyncWriteExt;
            socket.write_all(&[0x20, 0x00, 0x00, 0x00, b'{']).await.unwrap();
        });

        let conn = Connection::open(config).await.unwrap();
        conn.set_transaction_state(TransactionState::Active);

        let err = conn.request(&Request::new(Command::Ping)).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
        assert!(!conn.is_open());
        assert_eq!(conn.transaction_state(), TransactionState::Idle);

        let err = conn.request(&Request::new(Command::Ping)).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_malformed_response_poisons_connection() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = recv(&mut socket).await;
            write_frame(&mut socket, b"not json").await.unwrap();
            let _ = recv(&mut socket).await;
        });

        let conn = Connection::open(config).await.unwrap();
        let err = conn.request(&Request::new(Command::Ping)).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_read_timeout_poisons_connection() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = recv(&mut socket).await;
            // Never answer
            let _ = recv(&mut socket).await;
        });

        let conn = Connection::open(config.with_read_timeout(Duration::from_millis(50)))
            .await
            .unwrap();
        let err = conn.request(&Request::new(Command::Ping)).await.unwrap_err();
        assert!(matches!(err, ClientError::ReadTimeout(_)));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await.unwrap();
        });

        let conn = Connection::open(config).await.unwrap();
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_open());

        let err = conn.request(&Request::new(Command::Ping)).await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_auth_sent_before_anything_else() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let auth = recv(&mut socket).await.unwrap();
            send(&mut socket, json!({"ok": true, "data": {"role": "admin", "done": true}})).await;
            let ping = recv(&mut socket).await.unwrap();
            send(&mut socket, json!({"ok": true, "data": "pong"})).await;
            (auth, ping)
        });

        let conn = Connection::open(config.with_credentials("admin", "secret"))
            .await
            .unwrap();
        conn.request(&Request::new(Command::Ping)).await.unwrap();

        let (auth, ping) = server.await.unwrap();
        assert_eq!(
            auth,
            json!({"cmd": "auth_simple", "username": "admin", "password": "secret"})
        );
        assert_eq!(ping["cmd"], "ping");
    }

    #[tokio::test]
    async fn test_failed_auth_fails_open() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = recv(&mut socket).await;
            send(&mut socket, json!({"ok": false, "error": "authentication failed"})).await;
        });

        let result = Connection::open(config.with_credentials("admin", "wrong")).await;
        match result {
            Err(ClientError::Operation(msg)) => assert_eq!(msg, "authentication failed"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("open should fail"),
        }
    }

    #[tokio::test]
    async fn test_reserve_transaction() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await.unwrap();
        });

        let conn = Connection::open(config).await.unwrap();
        assert!(conn.reserve_transaction());
        assert!(!conn.reserve_transaction());
        assert_eq!(conn.transaction_state(), TransactionState::Active);

        conn.close().await;
        assert_eq!(conn.transaction_state(), TransactionState::Idle);
    }
}
