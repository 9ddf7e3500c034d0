//! Keep-alive timer
//!
//! Sends `ping` on a fixed interval over one live connection. The task is
//! owned by the connected link and aborted whenever that link stops being
//! the connected one.

use crate::events::PING;
use crate::transport::Connection;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct KeepAlive {
    handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Start pinging; the first ping goes out one full interval from now.
    pub fn start(connection: Arc<dyn Connection>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = connection.send(PING, &Value::Null) {
                    warn!("[KeepAlive] ping failed, stopping: {}", e);
                    break;
                }
                debug!("[KeepAlive] ping sent");
            }
        });
        info!("[KeepAlive] started ({:?})", period);
        Self { handle }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
