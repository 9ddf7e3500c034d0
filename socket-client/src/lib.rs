//! Realtime client for the segmentation service
//!
//! Keeps one authenticated Socket.IO connection alive, queues commands
//! while offline and fans server events out to registered listeners.

mod backoff;
mod client;
mod config;
mod credential;
mod error;
mod events;
mod keepalive;
mod listeners;
mod outbox;
mod socketio;
mod transport;

#[cfg(test)]
mod testing;

pub use backoff::ReconnectionController;
pub use client::{ConnectionState, RealtimeClient};
pub use config::{RoomPolicy, SocketConfig, TlsConfig};
pub use credential::Credential;
pub use error::{SocketError, TransportError, TransportErrorKind};
pub use events::{
    // Lifecycle notifications
    CONNECT, CONNECTION_LOST, CONNECT_ERROR, DISCONNECT, RECONNECTED, RECONNECTING,
    RECONNECT_FAILED,
    // Outbound commands
    JOIN_PROJECT, LEAVE_PROJECT, PING, REQUEST_QUEUE_STATS,
    // Inbound events
    NOTIFICATION, QUEUE_STATS_ALIAS, QUEUE_STATS_UPDATE, SEGMENTATION_UPDATE, SYSTEM_MESSAGE,
    // Payloads
    QueueStatsUpdate, SegmentationStatus, SegmentationUpdate, ServerEvent, ServerNotification,
    SystemMessage, SystemMessageLevel,
};
pub use listeners::{DispatchReport, Listener, ListenerId, Subscription};
pub use outbox::QueuedMessage;
pub use socketio::SocketIoTransport;
pub use transport::{
    Connection, OpenRequest, Transport, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
