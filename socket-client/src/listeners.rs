//! Listener registry
//!
//! Per-event subscriber lists with insertion-ordered fan-out. Each callback
//! runs isolated: a panicking listener is logged and skipped, the rest of
//! the list still runs and the registry stays usable.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error};

/// Event callback. Payloads are delivered as received; validation belongs
/// to the callback.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    callback: Listener,
}

#[derive(Default)]
struct Table {
    next_id: u64,
    entries: HashMap<String, Vec<Entry>>,
}

fn lock(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    table: Arc<Mutex<Table>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; the same `Arc` may be registered more than once.
    pub fn add(&self, event: &str, callback: Listener) -> Subscription {
        let mut table = lock(&self.table);
        table.next_id += 1;
        let id = ListenerId(table.next_id);
        table
            .entries
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, callback });

        Subscription {
            table: Arc::downgrade(&self.table),
            event: event.to_string(),
            id,
        }
    }

    /// Remove every registration of exactly this callback for `event`.
    pub fn remove(&self, event: &str, callback: &Listener) -> bool {
        let mut table = lock(&self.table);
        remove_where(&mut table, event, |entry| same_listener(&entry.callback, callback))
    }

    /// Deliver `payload` to every listener of `event` in registration order.
    ///
    /// The list is snapshotted before any callback runs, so callbacks may
    /// subscribe or unsubscribe (themselves included) without deadlocking.
    pub fn dispatch(&self, event: &str, payload: &Value) -> DispatchReport {
        let snapshot: Vec<(ListenerId, Listener)> = {
            let table = lock(&self.table);
            match table.entries.get(event) {
                Some(entries) => entries
                    .iter()
                    .map(|e| (e.id, e.callback.clone()))
                    .collect(),
                None => return DispatchReport::default(),
            }
        };

        let mut report = DispatchReport::default();
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        "[Listeners] listener {:?} for '{}' panicked: {}",
                        id,
                        event,
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        debug!(
            "[Listeners] '{}' dispatched to {} listener(s), {} failed",
            event, report.delivered, report.failed
        );
        report
    }

    pub fn count(&self, event: &str) -> usize {
        lock(&self.table).entries.get(event).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        lock(&self.table).entries.clear();
    }
}

fn remove_where<F>(table: &mut Table, event: &str, matches: F) -> bool
where
    F: Fn(&Entry) -> bool,
{
    let Some(entries) = table.entries.get_mut(event) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|entry| !matches(entry));
    let removed = entries.len() != before;
    if entries.is_empty() {
        table.entries.remove(event);
    }
    removed
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle returned by `on()`. Dropping it keeps the listener registered;
/// `unsubscribe()` removes exactly the registration it was issued for.
#[derive(Debug)]
pub struct Subscription {
    table: Weak<Mutex<Table>>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    pub(crate) fn detached(event: &str) -> Self {
        Self {
            table: Weak::new(),
            event: event.to_string(),
            id: ListenerId(0),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_active(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => lock(&table)
                .entries
                .get(&self.event)
                .is_some_and(|entries| entries.iter().any(|e| e.id == self.id)),
            None => false,
        }
    }

    pub fn unsubscribe(self) -> bool {
        match self.table.upgrade() {
            Some(table) => {
                let mut table = lock(&table);
                remove_where(&mut table, &self.event, |entry| entry.id == self.id)
            }
            None => false,
        }
    }
}
