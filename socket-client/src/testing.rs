//! Scripted in-memory transport for tests

use crate::credential::Credential;
use crate::error::TransportError;
use crate::transport::{Connection, OpenRequest, Transport, TransportEvent, TransportEventSender};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How the next `open` call behaves. An empty script accepts.
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    AcceptAfter(Duration),
    Reject(TransportError),
    Hang,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub connection: usize,
    pub event: String,
    pub payload: Value,
}

struct MockLink {
    events: TransportEventSender,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Script>,
    open_times: Vec<Instant>,
    credentials: Vec<Credential>,
    links: Vec<MockLink>,
    sent: Vec<Sent>,
}

#[derive(Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script<I: IntoIterator<Item = Script>>(&self, outcomes: I) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().open_times.len()
    }

    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().open_times.clone()
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.state.lock().unwrap().credentials.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().links.len()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().unwrap().sent.clone()
    }

    /// `(event, payload)` pairs sent on one connection, pings excluded.
    pub fn sent_on(&self, connection: usize) -> Vec<(String, Value)> {
        self.sent()
            .into_iter()
            .filter(|s| s.connection == connection && s.event != "ping")
            .map(|s| (s.event, s.payload))
            .collect()
    }

    pub fn pings_on(&self, connection: usize) -> usize {
        self.sent()
            .iter()
            .filter(|s| s.connection == connection && s.event == "ping")
            .count()
    }

    pub fn is_closed(&self, connection: usize) -> bool {
        self.state.lock().unwrap().links[connection]
            .closed
            .load(Ordering::SeqCst)
    }

    /// Make every later send on a connection fail, without a drop event.
    pub fn sever(&self, connection: usize) {
        self.state.lock().unwrap().links[connection]
            .closed
            .store(true, Ordering::SeqCst);
    }

    /// Raise a transport event on a specific connection.
    pub fn inject(&self, connection: usize, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        let _ = state.links[connection].events.send(event);
    }

    fn latest(&self) -> usize {
        self.connections() - 1
    }

    pub fn push_event(&self, name: &str, payload: Value) {
        self.inject(
            self.latest(),
            TransportEvent::Event {
                name: name.to_string(),
                payload,
            },
        );
    }

    pub fn drop_connection(&self) {
        self.inject(
            self.latest(),
            TransportEvent::Disconnected {
                reason: "transport close".into(),
            },
        );
    }
}

struct MockConnection {
    index: usize,
    closed: Arc<AtomicBool>,
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    fn send(&self, event: &str, payload: &Value) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::network("connection closed"));
        }
        self.state.lock().unwrap().sent.push(Sent {
            connection: self.index,
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        request: OpenRequest,
        events: TransportEventSender,
    ) -> BoxFuture<'static, Result<Arc<dyn Connection>, TransportError>> {
        let state = self.state.clone();
        let outcome = {
            let mut s = state.lock().unwrap();
            s.open_times.push(Instant::now());
            s.credentials.push(request.credential.clone());
            s.script.pop_front().unwrap_or(Script::Accept)
        };

        async move {
            match outcome {
                Script::Accept => {}
                Script::AcceptAfter(delay) => tokio::time::sleep(delay).await,
                Script::Reject(err) => return Err(err),
                Script::Hang => futures::future::pending::<()>().await,
            }
            let closed = Arc::new(AtomicBool::new(false));
            let index = {
                let mut s = state.lock().unwrap();
                s.links.push(MockLink {
                    events: events.clone(),
                    closed: closed.clone(),
                });
                s.links.len() - 1
            };
            let _ = events.send(TransportEvent::Connected);
            Ok(Arc::new(MockConnection {
                index,
                closed,
                state,
            }) as Arc<dyn Connection>)
        }
        .boxed()
    }
}
