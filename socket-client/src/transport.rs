//! Transport seam
//!
//! The client owns one `Connection` at a time and learns about everything
//! that happens on it through the `TransportEvent` channel handed to
//! `Transport::open`.

use crate::credential::Credential;
use crate::error::TransportError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything a transport needs to open one authenticated connection.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub url: String,
    pub namespace: String,
    pub credential: Credential,
    /// Handshake bound; the transport reports `Timeout` when it elapses.
    pub timeout: Duration,
}

/// Signals raised by a transport after `open` was called.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError(TransportError),
    Event { name: String, payload: Value },
    /// Native reconnection succeeded on the same connection.
    Reconnected,
    ReconnectAttempt(u32),
    ReconnectError(String),
    ReconnectFailed,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// One live, bidirectional connection.
pub trait Connection: Send + Sync {
    /// Queue one outbound event. Must not block; sends on the same
    /// connection go out in call order.
    fn send(&self, event: &str, payload: &Value) -> Result<(), TransportError>;

    /// Release the connection. Idempotent.
    fn close(&self);
}

pub trait Transport: Send + Sync + 'static {
    /// Open a connection. Resolves once the server acknowledged it.
    ///
    /// Dropping the returned future before it resolves must not leave a
    /// half-open connection behind.
    fn open(
        &self,
        request: OpenRequest,
        events: TransportEventSender,
    ) -> BoxFuture<'static, Result<Arc<dyn Connection>, TransportError>>;
}
