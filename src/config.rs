/*!
The shared, reactive store.

A [`Config`] owns the connection [`State`], the registry of connectors and
the optional durable [`Storage`]. It is a cheap handle: clones share the
same store.

State is only ever changed through [`Config::set_state`], which applies a
function to the current state under a lock and then notifies the
subscribers.
*/

use crate::{
    address::{Accounts, ChainId},
    connector::{ConnectorContext, ConnectorHandle, CreateConnector, Uid},
    emitter::{ConnectorEvent, Emitter, EventKind, Listener},
    storage::{DEFAULT_KEY_PREFIX, Storage, StorageBackend},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// An authorised account/chain relationship with one connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub accounts: Accounts,
    pub chain_id: ChainId,
    pub connector: ConnectorHandle,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub status: Status,
    /// uid of the connector in use, set iff `status` is connected
    pub current: Option<Uid>,
    /// ordered by uid, i.e. by connector registration
    pub connections: BTreeMap<Uid, Connection>,
}

impl State {
    pub fn current_connection(&self) -> Option<&Connection> {
        self.current
            .as_ref()
            .and_then(|uid| self.connections.get(uid))
    }

    /// Add (or replace) the connection and make it the current one.
    pub(crate) fn with_connection(mut self, connection: Connection) -> Self {
        let uid = connection.connector.uid().clone();
        self.connections.insert(uid.clone(), connection);
        self.current = Some(uid);
        self.status = Status::Connected;
        self
    }

    /// Remove the connection. If it was the current one, the first remaining
    /// connection takes over.
    pub(crate) fn without_connection(mut self, uid: &Uid) -> Self {
        self.connections.remove(uid);

        match self.connections.keys().next() {
            None => {
                self.current = None;
                self.status = Status::Disconnected;
            }
            Some(first) => {
                if self.current.as_ref() == Some(uid) || self.current.is_none() {
                    self.current = Some(first.clone());
                }
            }
        }
        self
    }
}

/// Settings a frontend may ship as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigOptions {
    /// chains the application supports, handed over to the connectors
    pub chains: Vec<ChainId>,
    pub storage_key_prefix: String,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            chains: Vec::new(),
            storage_key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type StateListener = dyn Fn(&State, &State);

/// The store's own handlers, bound once and attached to the connectors'
/// emitters.
pub(crate) struct Events {
    pub(crate) connect: Listener,
    pub(crate) change: Listener,
    pub(crate) disconnect: Listener,
}

impl Events {
    fn bind(store: &Weak<Inner>) -> Self {
        let handler = |on_event: fn(&Config, &Uid, &ConnectorEvent)| {
            let store = store.clone();
            Listener::new(move |uid, event| {
                // a connector may outlive the store it was set up with
                if let Some(inner) = store.upgrade() {
                    on_event(&Config { inner }, uid, event)
                }
            })
        };

        Self {
            connect: handler(Config::on_connect),
            change: handler(Config::on_change),
            disconnect: handler(Config::on_disconnect),
        }
    }
}

struct Inner {
    options: ConfigOptions,
    storage: Option<Storage>,
    state: Mutex<State>,
    subscribers: Mutex<Vec<(SubscriptionId, Arc<StateListener>)>>,
    next_subscription: AtomicU64,
    connectors: Mutex<Vec<ConnectorHandle>>,
    events: Events,
    connecting: Mutex<HashSet<Uid>>,
    reconnecting: AtomicBool,
}

#[derive(Clone)]
pub struct Config {
    inner: Arc<Inner>,
}

#[derive(Default)]
pub struct ConfigBuilder {
    options: ConfigOptions,
    storage: Option<Arc<dyn StorageBackend>>,
    connectors: Vec<Arc<dyn CreateConnector>>,
}

impl ConfigBuilder {
    pub fn options(mut self, options: ConfigOptions) -> Self {
        self.options = options;
        self
    }

    pub fn chains(mut self, chains: impl IntoIterator<Item = ChainId>) -> Self {
        self.options.chains = chains.into_iter().collect();
        self
    }

    /// Durable storage backend, keys are prefixed with
    /// [`ConfigOptions::storage_key_prefix`].
    pub fn storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(backend);
        self
    }

    /// connector set up as soon as the store is built
    pub fn connector(mut self, factory: Arc<dyn CreateConnector>) -> Self {
        self.connectors.push(factory);
        self
    }

    pub fn build(self) -> Config {
        let storage = self
            .storage
            .map(|backend| Storage::with_key_prefix(self.options.storage_key_prefix.clone(), backend));

        let config = Config {
            inner: Arc::new_cyclic(|store| Inner {
                options: self.options,
                storage,
                state: Mutex::default(),
                subscribers: Mutex::default(),
                next_subscription: AtomicU64::new(0),
                connectors: Mutex::default(),
                events: Events::bind(store),
                connecting: Mutex::default(),
                reconnecting: AtomicBool::new(false),
            }),
        };

        for factory in self.connectors {
            config.setup_connector(factory.as_ref());
        }

        config
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn new(options: ConfigOptions) -> Self {
        Self::builder().options(options).build()
    }

    pub fn options(&self) -> &ConfigOptions {
        &self.inner.options
    }

    pub fn chains(&self) -> &[ChainId] {
        &self.inner.options.chains
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.inner.storage.as_ref()
    }

    /// snapshot of the current state
    pub fn state(&self) -> State {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the state with `update(&current)`.
    ///
    /// The update runs under the store's lock and must not call back into
    /// the store. Subscribers run after the lock is released, and only if the
    /// state actually changed.
    pub fn set_state<F>(&self, update: F)
    where
        F: FnOnce(&State) -> State,
    {
        let (next, previous) = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let next = update(&state);
            if next == *state {
                return;
            }
            let previous = std::mem::replace(&mut *state, next.clone());
            (next, previous)
        };

        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in subscribers {
            listener(&next, &previous);
        }
    }

    /// Be notified with `(state, previous_state)` after every change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&State, &State) + 'static,
    {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<StateListener> = Arc::new(listener);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(subscription, _)| *subscription != id);
        before != subscribers.len()
    }

    /// registered connectors, in registration order
    pub fn connectors(&self) -> Vec<ConnectorHandle> {
        self.inner
            .connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connector(&self, uid: &Uid) -> Option<ConnectorHandle> {
        self.inner
            .connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|connector| connector.uid() == uid)
            .cloned()
    }

    /// Register the factory's connector, or return the one already
    /// registered under the same id.
    pub fn setup_connector(&self, factory: &dyn CreateConnector) -> ConnectorHandle {
        self.setup_connector_with_uid(factory, Uid::next())
    }

    pub(crate) fn setup_connector_with_uid(
        &self,
        factory: &dyn CreateConnector,
        uid: Uid,
    ) -> ConnectorHandle {
        if let Some(existing) = self.registered(factory.id()) {
            return existing;
        }

        // the registry is not locked while the factory runs, it may call
        // back into the store
        let emitter = Emitter::new(uid);
        let connector = factory.create(ConnectorContext {
            emitter: emitter.clone(),
            chains: self.inner.options.chains.clone(),
            storage: self.inner.storage.clone(),
        });
        let handle = ConnectorHandle::new(emitter, connector);

        let mut connectors = self
            .inner
            .connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // the factory itself may have registered the same id meanwhile
        if let Some(existing) = connectors
            .iter()
            .find(|connector| connector.id() == factory.id())
        {
            return existing.clone();
        }
        handle
            .emitter()
            .on(EventKind::Connect, &self.inner.events.connect);

        log::debug!("connector `{}' set up with uid {}", handle.id(), handle.uid());
        connectors.push(handle.clone());
        handle
    }

    fn registered(&self, id: &str) -> Option<ConnectorHandle> {
        self.inner
            .connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|connector| connector.id() == id)
            .cloned()
    }

    pub(crate) fn events(&self) -> &Events {
        &self.inner.events
    }

    /// Stop listening for an unsolicited `connect`, start following the
    /// connection's changes.
    pub(crate) fn watch_connection(&self, connector: &ConnectorHandle) {
        let events = self.events();
        connector.emitter().rewire(
            &[(EventKind::Connect, &events.connect)],
            &[
                (EventKind::Change, &events.change),
                (EventKind::Disconnect, &events.disconnect),
            ],
        );
    }

    /// The reverse of [`Config::watch_connection`].
    pub(crate) fn unwatch_connection(&self, connector: &ConnectorHandle) {
        let events = self.events();
        connector.emitter().rewire(
            &[
                (EventKind::Change, &events.change),
                (EventKind::Disconnect, &events.disconnect),
            ],
            &[(EventKind::Connect, &events.connect)],
        );
    }

    /// Mark a connection attempt for `uid` as in flight. Returns `None` if
    /// one already is; the mark is cleared when the guard drops.
    pub(crate) fn begin_connect(&self, uid: &Uid) -> Option<InFlight<'_>> {
        let inserted = self
            .inner
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uid.clone());

        inserted.then(|| InFlight {
            config: self,
            uid: uid.clone(),
        })
    }

    pub(crate) fn begin_reconnect(&self) -> Option<Reconnecting<'_>> {
        self.inner
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Reconnecting { config: self })
    }

    fn on_connect(&self, uid: &Uid, event: &ConnectorEvent) {
        let ConnectorEvent::Connect { accounts, chain_id } = event else {
            return;
        };

        let state = self.state();
        // an action is already taking care of it
        if matches!(state.status, Status::Connecting | Status::Reconnecting)
            || state.connections.contains_key(uid)
        {
            return;
        }
        let Some(connector) = self.connector(uid) else {
            return;
        };
        let Ok(accounts) = Accounts::try_from(accounts.clone()) else {
            log::debug!("connector {uid} connected without accounts, ignored");
            return;
        };

        self.watch_connection(&connector);
        let connection = Connection {
            accounts,
            chain_id: *chain_id,
            connector,
        };
        self.set_state(|state| state.clone().with_connection(connection));
    }

    fn on_change(&self, uid: &Uid, event: &ConnectorEvent) {
        let ConnectorEvent::Change { accounts, chain_id } = event else {
            return;
        };
        let accounts = accounts
            .clone()
            .and_then(|accounts| Accounts::try_from(accounts).ok());

        self.set_state(|state| {
            let mut state = state.clone();
            if let Some(connection) = state.connections.get_mut(uid) {
                if let Some(accounts) = accounts {
                    connection.accounts = accounts;
                }
                if let Some(chain_id) = chain_id {
                    connection.chain_id = *chain_id;
                }
            }
            state
        });
    }

    fn on_disconnect(&self, uid: &Uid, _event: &ConnectorEvent) {
        let Some(connector) = self.connector(uid) else {
            return;
        };

        self.unwatch_connection(&connector);
        self.set_state(|state| state.clone().without_connection(uid));
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("options", &self.inner.options)
            .field("storage", &self.inner.storage)
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) struct InFlight<'a> {
    config: &'a Config,
    uid: Uid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.config
            .inner
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.uid);
    }
}

pub(crate) struct Reconnecting<'a> {
    config: &'a Config,
}

impl Drop for Reconnecting<'_> {
    fn drop(&mut self) {
        self.config
            .inner
            .reconnecting
            .store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        address::Address,
        emitter::{ConnectorEvent, EventKind},
        connector::Connector,
        testing::{MockConnector, accounts, mock},
    };
    use serde_json::json;
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    fn connected(config: &Config, factory: &dyn CreateConnector, uid: &str) -> ConnectorHandle {
        let handle = config.setup_connector_with_uid(factory, Uid::from(uid));
        config.watch_connection(&handle);
        let connection = Connection {
            accounts: accounts(&["0x01"]),
            chain_id: ChainId(1),
            connector: handle.clone(),
        };
        config.set_state(|state| state.clone().with_connection(connection));
        handle
    }

    #[test]
    fn options_json() {
        let options: ConfigOptions = serde_json::from_value(json!({
            "chains": [1, 5],
            "storageKeyPrefix": "app",
        }))
        .unwrap();
        assert_eq!(options.chains, vec![ChainId(1), ChainId(5)]);
        assert_eq!(options.storage_key_prefix, "app");

        let defaults: ConfigOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(defaults, ConfigOptions::default());
        assert_eq!(defaults.storage_key_prefix, "dapp");
    }

    #[test]
    fn setup_is_idempotent_per_id() {
        let config = Config::new(ConfigOptions::default());
        let (_, factory) = mock("lace");

        let first = config.setup_connector(factory.as_ref());
        let second = config.setup_connector(factory.as_ref());

        assert_eq!(first, second);
        assert_eq!(config.connectors().len(), 1);
        assert_eq!(first.emitter().listener_count(EventKind::Connect), 1);
        assert_eq!(config.connector(first.uid()), Some(first));
    }

    /// A factory looking at the store while it creates its connector.
    struct Inquisitive {
        config: Config,
        registered: Cell<Option<usize>>,
    }

    impl CreateConnector for Inquisitive {
        fn id(&self) -> &str {
            "inquisitive"
        }

        fn create(&self, _context: ConnectorContext) -> Arc<dyn Connector> {
            self.registered.set(Some(self.config.connectors().len()));
            Arc::new(MockConnector::new("inquisitive"))
        }
    }

    #[test]
    fn factory_may_use_the_store() {
        let config = Config::new(ConfigOptions::default());
        let (_, lace) = mock("lace");
        config.setup_connector(lace.as_ref());
        let factory = Inquisitive {
            config: config.clone(),
            registered: Cell::new(None),
        };

        let handle = config.setup_connector(&factory);

        assert_eq!(factory.registered.get(), Some(1));
        assert_eq!(config.connectors().len(), 2);
        assert_eq!(config.setup_connector(&factory), handle);
        assert_eq!(handle.emitter().listener_count(EventKind::Connect), 1);
    }

    #[test]
    fn builder_sets_up_connectors_and_storage() {
        let (_, lace) = mock("lace");
        let (_, eternl) = mock("eternl");
        let config = Config::builder()
            .chains([ChainId(1)])
            .storage(Arc::new(crate::storage::MemoryStorage::new()))
            .connector(lace)
            .connector(eternl)
            .build();

        let ids: Vec<String> = config
            .connectors()
            .iter()
            .map(|connector| connector.id().to_owned())
            .collect();
        assert_eq!(ids, ["lace", "eternl"]);
        assert_eq!(config.chains(), &[ChainId(1)]);
        assert_eq!(config.storage().map(Storage::key_prefix), Some("dapp"));
    }

    #[test]
    fn set_state_notifies_only_on_change() {
        let config = Config::new(ConfigOptions::default());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let id = {
            let seen = Rc::clone(&seen);
            config.subscribe(move |state, previous| {
                seen.borrow_mut().push((previous.status, state.status))
            })
        };

        config.set_state(|state| state.clone());
        config.set_state(|state| State {
            status: Status::Connecting,
            ..state.clone()
        });
        assert_eq!(
            seen.borrow().as_slice(),
            &[(Status::Disconnected, Status::Connecting)]
        );

        assert!(config.unsubscribe(id));
        assert!(!config.unsubscribe(id));
        config.set_state(|state| State {
            status: Status::Disconnected,
            ..state.clone()
        });
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn unsolicited_connect_event_adds_connection() {
        let config = Config::new(ConfigOptions::default());
        let (wallet, factory) = mock("lace");
        let handle = config.setup_connector(factory.as_ref());

        wallet.emit(ConnectorEvent::Connect {
            accounts: vec![Address::from_hex("0x0a").unwrap()],
            chain_id: ChainId(1),
        });

        let state = config.state();
        assert_eq!(state.status, Status::Connected);
        assert_eq!(state.current.as_ref(), Some(handle.uid()));
        assert_eq!(
            state.connections[handle.uid()].accounts,
            accounts(&["0x0a"])
        );
        assert_eq!(handle.emitter().listener_count(EventKind::Connect), 0);
        assert!(handle
            .emitter()
            .is_listening(EventKind::Change, &config.events().change));
        assert!(handle
            .emitter()
            .is_listening(EventKind::Disconnect, &config.events().disconnect));
    }

    #[test]
    fn connect_event_is_ignored_while_connecting() {
        let config = Config::new(ConfigOptions::default());
        let (wallet, factory) = mock("lace");
        config.setup_connector(factory.as_ref());
        config.set_state(|state| State {
            status: Status::Connecting,
            ..state.clone()
        });

        wallet.emit(ConnectorEvent::Connect {
            accounts: vec![Address::from_hex("0x0a").unwrap()],
            chain_id: ChainId(1),
        });

        assert!(config.state().connections.is_empty());
    }

    #[test]
    fn change_event_updates_connection() {
        let config = Config::new(ConfigOptions::default());
        let (wallet, factory) = mock("lace");
        let handle = connected(&config, factory.as_ref(), "A");

        wallet.emit(ConnectorEvent::Change {
            accounts: None,
            chain_id: Some(ChainId(5)),
        });
        wallet.emit(ConnectorEvent::Change {
            accounts: Some(vec![]),
            chain_id: None,
        });

        let connection = &config.state().connections[handle.uid()];
        assert_eq!(connection.chain_id, ChainId(5));
        assert_eq!(connection.accounts, accounts(&["0x01"]));

        wallet.emit(ConnectorEvent::Change {
            accounts: Some(vec![
                Address::from_hex("0x02").unwrap(),
                Address::from_hex("0x03").unwrap(),
            ]),
            chain_id: None,
        });
        assert_eq!(
            config.state().connections[handle.uid()].accounts,
            accounts(&["0x02", "0x03"])
        );
    }

    #[test]
    fn disconnect_event_falls_back_to_remaining_connection() {
        let config = Config::new(ConfigOptions::default());
        let (_, first) = mock("lace");
        let (second_wallet, second) = mock("eternl");
        let first = connected(&config, first.as_ref(), "A");
        let second = connected(&config, second.as_ref(), "B");
        assert_eq!(config.state().current.as_ref(), Some(second.uid()));

        second_wallet.emit(ConnectorEvent::Disconnect);

        let state = config.state();
        assert_eq!(state.status, Status::Connected);
        assert_eq!(state.current.as_ref(), Some(first.uid()));
        assert!(!state.connections.contains_key(second.uid()));
        assert_eq!(second.emitter().listener_count(EventKind::Change), 0);
        assert!(second
            .emitter()
            .is_listening(EventKind::Connect, &config.events().connect));
    }

    #[test]
    fn disconnect_event_of_last_connection() {
        let config = Config::new(ConfigOptions::default());
        let (wallet, factory) = mock("lace");
        connected(&config, factory.as_ref(), "A");

        wallet.emit(ConnectorEvent::Disconnect);

        let state = config.state();
        assert_eq!(state.status, Status::Disconnected);
        assert_eq!(state.current, None);
        assert!(state.connections.is_empty());
    }

    #[test]
    fn handlers_do_not_keep_the_store_alive() {
        let (wallet, factory) = mock("lace");
        let config = Config::new(ConfigOptions::default());
        config.setup_connector(factory.as_ref());
        drop(config);

        wallet.emit(ConnectorEvent::Connect {
            accounts: vec![Address::from_hex("0x0a").unwrap()],
            chain_id: ChainId(1),
        });
    }

    #[test]
    fn in_flight_guard_is_released_on_drop() {
        let config = Config::new(ConfigOptions::default());
        let uid = Uid::from("A");

        let guard = config.begin_connect(&uid);
        assert!(guard.is_some());
        assert!(config.begin_connect(&uid).is_none());
        drop(guard);
        assert!(config.begin_connect(&uid).is_some());

        let reconnecting = config.begin_reconnect();
        assert!(reconnecting.is_some());
        assert!(config.begin_reconnect().is_none());
        drop(reconnecting);
        assert!(config.begin_reconnect().is_some());
    }
}
