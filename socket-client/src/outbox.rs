//! Outbound message queue and room membership tracker
//!
//! Both are plain data owned by the client session; the client holds its
//! session lock around every call.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

/// A command buffered while no live connection exists.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub event: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO buffer for commands issued while not connected.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<QueuedMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &str, payload: Value) {
        self.messages.push_back(QueuedMessage {
            event: event.to_string(),
            payload,
            enqueued_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Send every entry in enqueue order, in a single pass.
    ///
    /// Stops at the first failed send; that entry and everything after it
    /// stay queued in their original order. Returns the number sent.
    pub fn flush<F, E>(&mut self, mut send: F) -> Result<usize, (usize, E)>
    where
        F: FnMut(&QueuedMessage) -> Result<(), E>,
    {
        let mut sent = 0;
        while let Some(message) = self.messages.front() {
            if let Err(e) = send(message) {
                return Err((sent, e));
            }
            self.messages.pop_front();
            sent += 1;
        }
        Ok(sent)
    }

    /// Remove and return every queued message.
    pub fn drain(&mut self) -> Vec<QueuedMessage> {
        self.messages.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Project rooms the client wants to observe, kept in join order.
#[derive(Debug, Default)]
pub struct RoomTracker {
    order: Vec<String>,
    members: HashSet<String>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the room was already tracked.
    pub fn join(&mut self, project_id: &str) -> bool {
        if !self.members.insert(project_id.to_string()) {
            return false;
        }
        self.order.push(project_id.to_string());
        true
    }

    /// Returns `false` when the room was not tracked.
    pub fn leave(&mut self, project_id: &str) -> bool {
        if !self.members.remove(project_id) {
            return false;
        }
        self.order.retain(|id| id != project_id);
        true
    }

    /// Rooms in original join order.
    pub fn rooms(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}
