//! Socket.IO transport
//!
//! Production `Transport` on top of rust_socketio's async client.

use crate::config::TlsConfig;
use crate::error::{SocketError, TransportError};
use crate::transport::{Connection, OpenRequest, Transport, TransportEvent, TransportEventSender};
use futures::future::BoxFuture;
use futures::FutureExt;
use native_tls::{Certificate, Identity, TlsConnector};
use rust_socketio::{
    asynchronous::{Client, ClientBuilder},
    Event, Payload, TransportType,
};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

type ReadySender = Arc<Mutex<Option<oneshot::Sender<Result<(), TransportError>>>>>;

/// Socket.IO transport
#[derive(Debug, Clone, Default)]
pub struct SocketIoTransport {
    connector: Option<TlsConnector>,
}

impl SocketIoTransport {
    /// Build the transport. Certificates are loaded once, here, so a bad
    /// TLS setup fails before any connect.
    pub fn new(tls: &TlsConfig) -> Result<Self, SocketError> {
        Ok(Self {
            connector: build_tls_connector(tls)?,
        })
    }
}

/// TLS connector for a custom CA, a client identity (mTLS) or the insecure
/// development mode. `None` means the platform defaults.
fn build_tls_connector(tls: &TlsConfig) -> Result<Option<TlsConnector>, SocketError> {
    if tls.ca_cert_path.is_none() && tls.client_cert_path.is_none() && !tls.danger_accept_invalid_certs
    {
        return Ok(None);
    }
    let mut builder = TlsConnector::builder();

    if let Some(path) = &tls.ca_cert_path {
        info!("[SocketIo] Loading CA certificate from {:?}", path);
        let ca = Certificate::from_pem(&read_file(path, "CA certificate")?)
            .map_err(|e| tls_error("CA certificate", e))?;
        builder.add_root_certificate(ca);
    }

    if let Some(path) = &tls.client_cert_path {
        info!("[SocketIo] Loading client identity from {:?}", path);
        builder.identity(load_identity(tls, path)?);
    }

    if tls.danger_accept_invalid_certs {
        warn!("[SocketIo] TLS certificate verification disabled - FOR DEVELOPMENT ONLY");
        builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| tls_error("connector", e))
}

fn load_identity(tls: &TlsConfig, cert_path: &Path) -> Result<Identity, SocketError> {
    let cert = read_file(cert_path, "client certificate")?;
    let pkcs12 = matches!(
        cert_path.extension().and_then(|ext| ext.to_str()),
        Some("p12" | "pfx")
    );
    if pkcs12 {
        let password = tls.client_p12_password.as_deref().unwrap_or("");
        return Identity::from_pkcs12(&cert, password).map_err(|e| tls_error("PKCS#12 bundle", e));
    }

    let key_path = tls.client_key_path.as_ref().ok_or_else(|| {
        SocketError::Tls("client key path required for a PEM client certificate".into())
    })?;
    let key = read_file(key_path, "client key")?;
    Identity::from_pkcs8(&cert, &key).map_err(|e| tls_error("PEM identity", e))
}

fn read_file(path: &Path, what: &str) -> Result<Vec<u8>, SocketError> {
    fs::read(path).map_err(|e| SocketError::Tls(format!("cannot read {} {:?}: {}", what, path, e)))
}

fn tls_error(what: &str, err: impl std::fmt::Display) -> SocketError {
    SocketError::Tls(format!("invalid {}: {}", what, err))
}

impl Transport for SocketIoTransport {
    fn open(
        &self,
        request: OpenRequest,
        events: TransportEventSender,
    ) -> BoxFuture<'static, Result<Arc<dyn Connection>, TransportError>> {
        let connector = self.connector.clone();
        async move { open_connection(request, events, connector).await }.boxed()
    }
}

async fn open_connection(
    request: OpenRequest,
    events: TransportEventSender,
    tls: Option<TlsConnector>,
) -> Result<Arc<dyn Connection>, TransportError> {
    let deadline = Instant::now() + request.timeout;
    info!(
        "[SocketIo] Connecting to {}{} as {}",
        request.url, request.namespace, request.credential.user_id
    );

    let (ready_tx, ready_rx) = oneshot::channel();
    let ready: ReadySender = Arc::new(Mutex::new(Some(ready_tx)));
    let token = request.credential.auth_token.clone();

    // Recovery belongs to the client's reconnection controller, so the
    // library's own reconnect loop stays off. WebSocket only, no polling.
    let mut builder = ClientBuilder::new(request.url.as_str())
        .namespace(request.namespace.as_str())
        .transport_type(TransportType::Websocket)
        .reconnect(false)
        .auth(json!({
            "token": token,
            "userId": request.credential.user_id,
        }))
        .opening_header("Authorization", format!("Bearer {}", token));

    if let Some(connector) = tls {
        builder = builder.tls_config(connector);
    }

    let builder = builder
        .on(Event::Connect, {
            let ready = ready.clone();
            let tx = events.clone();
            move |_, _| {
                let ready = ready.clone();
                let tx = tx.clone();
                async move {
                    debug!("[SocketIo] connect acknowledged");
                    if !resolve_ready(&ready, Ok(())) {
                        let _ = tx.send(TransportEvent::Connected);
                    }
                }
                .boxed()
            }
        })
        .on(Event::Close, {
            let tx = events.clone();
            move |_, _| {
                let tx = tx.clone();
                async move {
                    warn!("[SocketIo] Socket closed");
                    let _ = tx.send(TransportEvent::Disconnected {
                        reason: "transport close".into(),
                    });
                }
                .boxed()
            }
        })
        .on(Event::Error, {
            let ready = ready.clone();
            let tx = events.clone();
            move |payload, _| {
                let ready = ready.clone();
                let tx = tx.clone();
                async move {
                    let message = payload_text(payload);
                    error!("[SocketIo] Socket error: {}", message);
                    let err = TransportError::classify(message);
                    if !resolve_ready(&ready, Err(err.clone())) {
                        let _ = tx.send(TransportEvent::ConnectError(err));
                    }
                }
                .boxed()
            }
        })
        .on_any({
            let tx = events.clone();
            move |event, payload, _| {
                let tx = tx.clone();
                async move {
                    let name = match event {
                        Event::Custom(name) => name,
                        Event::Message => "message".to_string(),
                        _ => return,
                    };
                    let payload = extract_payload(payload);
                    let _ = tx.send(TransportEvent::Event { name, payload });
                }
                .boxed()
            }
        });

    let client = match timeout(request.timeout, builder.connect()).await {
        Ok(Ok(client)) => client,
        Ok(Err(e)) => return Err(TransportError::classify(e.to_string())),
        Err(_) => {
            return Err(TransportError::timeout(format!(
                "no handshake within {:?}",
                request.timeout
            )))
        }
    };
    let mut guard = HalfOpen(Some(client));

    match tokio::time::timeout_at(deadline, ready_rx).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e),
        Ok(Err(_)) => return Err(TransportError::network("connection dropped during handshake")),
        Err(_) => {
            return Err(TransportError::timeout(format!(
                "server did not acknowledge within {:?}",
                request.timeout
            )))
        }
    }

    let Some(client) = guard.0.take() else {
        return Err(TransportError::network("client released during handshake"));
    };
    info!("[SocketIo] Socket connected successfully");
    Ok(Arc::new(SocketIoConnection::spawn(client)))
}

/// Resolve the pending handshake, if any. Returns `false` once the
/// handshake has already been resolved.
fn resolve_ready(ready: &ReadySender, result: Result<(), TransportError>) -> bool {
    let sender = match ready.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    match sender {
        Some(sender) => {
            let _ = sender.send(result);
            true
        }
        None => false,
    }
}

/// Disconnects a client whose handshake never completed.
struct HalfOpen(Option<Client>);

impl Drop for HalfOpen {
    fn drop(&mut self) {
        if let Some(client) = self.0.take() {
            debug!("[SocketIo] releasing half-open client");
            tokio::spawn(async move {
                let _ = client.disconnect().await;
            });
        }
    }
}

enum Outbound {
    Emit(String, Value),
    Close,
}

/// Live Socket.IO connection. Sends are handed to one writer task so that
/// `send` never blocks and keeps call order.
struct SocketIoConnection {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SocketIoConnection {
    fn spawn(client: Client) -> Self {
        let (outbound, mut rx) = mpsc::unbounded_channel::<Outbound>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    Outbound::Emit(event, payload) => {
                        debug!("[SocketIo] Emitting event: {}", event);
                        let payload = if payload.is_null() {
                            Payload::Text(vec![])
                        } else {
                            Payload::Text(vec![payload])
                        };
                        if let Err(e) = client.emit(event.as_str(), payload).await {
                            warn!("[SocketIo] Emit {} failed: {}", event, e);
                        }
                    }
                    Outbound::Close => break,
                }
            }
            if let Err(e) = client.disconnect().await {
                error!("[SocketIo] Disconnect error: {:?}", e);
            }
        });
        Self { outbound }
    }
}

impl Connection for SocketIoConnection {
    fn send(&self, event: &str, payload: &Value) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Emit(event.to_string(), payload.clone()))
            .map_err(|_| TransportError::network("connection closed"))
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

fn extract_payload(payload: Payload) -> Value {
    match payload {
        Payload::Text(mut values) => match values.len() {
            0 => Value::Null,
            1 => values.remove(0),
            _ => Value::Array(values),
        },
        _ => Value::Null,
    }
}

fn payload_text(payload: Payload) -> String {
    match extract_payload(payload) {
        Value::String(s) => s,
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_payload() {
        assert_eq!(extract_payload(Payload::Text(vec![])), Value::Null);
        assert_eq!(extract_payload(Payload::Text(vec![json!("p1")])), json!("p1"));
        assert_eq!(
            extract_payload(Payload::Text(vec![json!(1), json!(2)])),
            json!([1, 2])
        );
    }

    #[test]
    fn test_payload_text_prefers_message_field() {
        let text = payload_text(Payload::Text(vec![json!({"message": "Authentication error"})]));
        assert_eq!(text, "Authentication error");
        assert!(TransportError::classify(text).is_authentication());
        assert_eq!(payload_text(Payload::Text(vec![json!("boom")])), "boom");
    }

    #[test]
    fn test_no_tls_connector_by_default() {
        let transport = SocketIoTransport::new(&TlsConfig::default()).unwrap();
        assert!(transport.connector.is_none());
    }

    #[test]
    fn test_pem_cert_without_key_is_rejected() {
        let dir = std::env::temp_dir().join(format!("spheroseg-tls-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let cert = dir.join("client.pem");
        fs::write(&cert, b"not a real certificate").unwrap();

        let err = SocketIoTransport::new(&TlsConfig {
            client_cert_path: Some(cert),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(&err, SocketError::Tls(m) if m.contains("client key path required")));
        assert!(err.is_terminal());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_ca_file_is_a_tls_error() {
        let err = SocketIoTransport::new(&TlsConfig {
            ca_cert_path: Some("/nonexistent/spheroseg-ca.pem".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), "tls");
    }
}
