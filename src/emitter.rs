/*!
Per-connector event channel.

Every registered connector owns one [`Emitter`]. The store attaches its own
handlers to it and the connector implementation emits on it whenever the
wallet reports something (new accounts, chain switch, external disconnect).
*/

use crate::{
    address::{Address, ChainId},
    connector::Uid,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Change,
    Disconnect,
    Message,
}

/// Lifecycle messages sent on the [`EventKind::Message`] channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// sent by `connect` before it talks to the wallet
    Connecting,
    Other {
        kind: String,
        data: Option<serde_json::Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectorEvent {
    Connect {
        accounts: Vec<Address>,
        chain_id: ChainId,
    },
    Change {
        accounts: Option<Vec<Address>>,
        chain_id: Option<ChainId>,
    },
    Disconnect,
    Message(Message),
}

impl ConnectorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect { .. } => EventKind::Connect,
            Self::Change { .. } => EventKind::Change,
            Self::Disconnect => EventKind::Disconnect,
            Self::Message(_) => EventKind::Message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type Callback = dyn Fn(&Uid, &ConnectorEvent);

/// A callback with an identity.
///
/// Two clones of the same listener are the same subscription: attaching it
/// twice to an event is a no-op and detaching it removes it, whichever clone
/// is used.
#[derive(Clone)]
pub struct Listener {
    id: ListenerId,
    callback: Arc<Callback>,
}

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Uid, &ConnectorEvent) + 'static,
    {
        Self {
            id: ListenerId::next(),
            callback: Arc::new(callback),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    fn call(&self, uid: &Uid, event: &ConnectorEvent) {
        (self.callback)(uid, event)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.id.0).finish()
    }
}

/// A named subscription: one listener on one event kind.
pub type Subscription<'a> = (EventKind, &'a Listener);

#[derive(Clone)]
pub struct Emitter {
    uid: Uid,
    table: Arc<Mutex<HashMap<EventKind, Vec<Listener>>>>,
}

impl Emitter {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            table: Arc::default(),
        }
    }

    /// uid of the connector this emitter belongs to
    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    /// attach the listener, returns `false` if it was already attached
    pub fn on(&self, kind: EventKind, listener: &Listener) -> bool {
        self.rewire(&[], &[(kind, listener)]) > 0
    }

    /// detach the listener, returns `false` if it was not attached
    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        self.rewire(&[(kind, listener)], &[]) > 0
    }

    /// Apply a subscription set transition in one step: every `detach`
    /// subscription is removed, then every `attach` subscription not yet
    /// present is added.
    ///
    /// Returns the number of subscriptions actually removed or added.
    pub fn rewire(&self, detach: &[Subscription<'_>], attach: &[Subscription<'_>]) -> usize {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed = 0;

        for (kind, listener) in detach {
            if let Some(listeners) = table.get_mut(kind) {
                let before = listeners.len();
                listeners.retain(|l| l != *listener);
                changed += before - listeners.len();
            }
        }

        for (kind, listener) in attach {
            let listeners = table.entry(*kind).or_default();
            if !listeners.contains(*listener) {
                listeners.push((*listener).clone());
                changed += 1;
            }
        }

        changed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn is_listening(&self, kind: EventKind, listener: &Listener) -> bool {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .is_some_and(|listeners| listeners.contains(listener))
    }

    /// Call every listener of the event's kind, in subscription order.
    ///
    /// The table is not locked while the listeners run, so they are free to
    /// subscribe or unsubscribe.
    pub fn emit(&self, event: ConnectorEvent) {
        let listeners = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        log::trace!(
            "connector {} emits {:?} to {} listener(s)",
            self.uid,
            event.kind(),
            listeners.len()
        );

        for listener in listeners {
            listener.call(&self.uid, &event);
        }
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").field("uid", &self.uid).finish()
    }
}
