//! Socket event definitions
//!
//! Wire names exchanged with the segmentation server, the client-side
//! lifecycle notifications, and typed views over inbound payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================== Outbound (Client → Server) ====================

pub const JOIN_PROJECT: &str = "join-project";
pub const LEAVE_PROJECT: &str = "leave-project";
pub const REQUEST_QUEUE_STATS: &str = "request-queue-stats";
pub const PING: &str = "ping";

// ==================== Inbound (Server → Client) ====================

pub const SEGMENTATION_UPDATE: &str = "segmentation-update";
/// Canonical queue stats name; the server also uses `queueStats`.
pub const QUEUE_STATS_UPDATE: &str = "queue-stats-update";
pub const QUEUE_STATS_ALIAS: &str = "queueStats";
pub const NOTIFICATION: &str = "notification";
pub const SYSTEM_MESSAGE: &str = "system-message";

// ==================== Lifecycle notifications ====================

pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const CONNECT_ERROR: &str = "connect_error";
pub const RECONNECTING: &str = "reconnecting";
pub const RECONNECTED: &str = "reconnected";
pub const RECONNECT_FAILED: &str = "reconnect_failed";
pub const CONNECTION_LOST: &str = "connection_lost";

// ==================== Payloads ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl SegmentationStatus {
    pub fn is_final(self) -> bool {
        matches!(self, SegmentationStatus::Completed | SegmentationStatus::Failed)
    }
}

/// Per-image segmentation progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationUpdate {
    pub image_id: String,
    pub project_id: String,
    pub status: SegmentationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-project queue counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsUpdate {
    pub project_id: String,
    pub queued: u64,
    pub processing: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_count: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(rename = "type")]
    pub level: SystemMessageLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Typed inbound server event
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SegmentationUpdate(SegmentationUpdate),
    QueueStats(QueueStatsUpdate),
    Notification(ServerNotification),
    SystemMessage(SystemMessage),
}

impl ServerEvent {
    /// Parse an inbound payload by wire name. Unknown names yield `Ok(None)`.
    pub fn parse(name: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match name {
            SEGMENTATION_UPDATE => {
                ServerEvent::SegmentationUpdate(SegmentationUpdate::deserialize(payload)?)
            }
            QUEUE_STATS_UPDATE | QUEUE_STATS_ALIAS => {
                ServerEvent::QueueStats(QueueStatsUpdate::deserialize(payload)?)
            }
            NOTIFICATION => ServerEvent::Notification(ServerNotification::deserialize(payload)?),
            SYSTEM_MESSAGE => ServerEvent::SystemMessage(SystemMessage::deserialize(payload)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SegmentationUpdate(_) => SEGMENTATION_UPDATE,
            ServerEvent::QueueStats(_) => QUEUE_STATS_UPDATE,
            ServerEvent::Notification(_) => NOTIFICATION,
            ServerEvent::SystemMessage(_) => SYSTEM_MESSAGE,
        }
    }
}

/// Map an inbound wire name onto its canonical name.
pub fn canonical_name<'a, S: AsRef<str>>(name: &'a str, queue_stats_aliases: &[S]) -> &'a str {
    if queue_stats_aliases.iter().any(|alias| alias.as_ref() == name) {
        QUEUE_STATS_UPDATE
    } else {
        name
    }
}
