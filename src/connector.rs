use crate::{
    address::{Accounts, Address, ChainId},
    emitter::Emitter,
    error::ConnectError,
    storage::Storage,
};
use async_trait::async_trait;
use std::{
    fmt,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Unique identifier of a registered connector instance.
///
/// Allocated by the store when a connector is set up. Unlike
/// [`Connector::id`], which names the kind of wallet (`"lace"`), the uid
/// names one instance for the lifetime of the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(String);

impl Uid {
    /// Zero padded, so that comparing uids compares allocation order.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(format!("{:012x}", NEXT.fetch_add(1, Ordering::Relaxed)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(uid: &str) -> Self {
        Self(uid.to_owned())
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the handshake is called with: every connection parameter except the
/// connector itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectRequest {
    /// chain the application would like to be on
    pub chain_id: Option<ChainId>,
    /// `true` when restoring a previous session, the connector should
    /// not prompt the user
    pub is_reconnecting: bool,
    /// connector specific parameters, passed through verbatim
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectResponse {
    pub accounts: Vec<Address>,
    pub chain_id: ChainId,
}

/// The capability set every wallet integration provides.
#[async_trait(?Send)]
pub trait Connector {
    /// identifier of the wallet integration, e.g. `"lace"`
    fn id(&self) -> &str;

    /// human readable name of the wallet
    fn name(&self) -> &str;

    /// Accounts the application is already authorised to use. Must not
    /// prompt the user.
    async fn get_accounts(&self) -> Result<Vec<Address>, ConnectError>;

    async fn get_chain_id(&self) -> Result<ChainId, ConnectError>;

    /// The approval handshake. This is where the user may be prompted.
    async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse, ConnectError>;

    async fn disconnect(&self) -> Result<(), ConnectError>;

    /// Whether a reconnect may succeed without prompting the user.
    async fn is_authorized(&self) -> Result<bool, ConnectError> {
        Ok(!self.get_accounts().await?.is_empty())
    }
}

/// What a factory receives when the store sets up its connector.
#[derive(Clone)]
pub struct ConnectorContext {
    pub emitter: Emitter,
    pub chains: Vec<ChainId>,
    pub storage: Option<Storage>,
}

/// Builds a [`Connector`] on first use.
///
/// Setup is idempotent per [`CreateConnector::id`]: a store only ever
/// creates one connector for a given id.
pub trait CreateConnector {
    fn id(&self) -> &str;

    fn create(&self, context: ConnectorContext) -> Arc<dyn Connector>;
}

/// A registered connector: the implementation, its uid and its emitter.
#[derive(Clone)]
pub struct ConnectorHandle {
    uid: Uid,
    emitter: Emitter,
    connector: Arc<dyn Connector>,
}

impl ConnectorHandle {
    pub(crate) fn new(emitter: Emitter, connector: Arc<dyn Connector>) -> Self {
        Self {
            uid: emitter.uid().clone(),
            emitter,
            connector,
        }
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

impl Deref for ConnectorHandle {
    type Target = dyn Connector;

    fn deref(&self) -> &Self::Target {
        self.connector.as_ref()
    }
}

impl PartialEq for ConnectorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for ConnectorHandle {}

impl fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("uid", &self.uid)
            .field("id", &self.connector.id())
            .finish()
    }
}

/// A connector given to an action: either already registered, or a factory
/// the store registers on the spot.
#[derive(Clone)]
pub enum ConnectorSource {
    Handle(ConnectorHandle),
    Factory(Arc<dyn CreateConnector>),
}

impl From<ConnectorHandle> for ConnectorSource {
    fn from(handle: ConnectorHandle) -> Self {
        Self::Handle(handle)
    }
}

impl From<&ConnectorHandle> for ConnectorSource {
    fn from(handle: &ConnectorHandle) -> Self {
        Self::Handle(handle.clone())
    }
}

impl From<Arc<dyn CreateConnector>> for ConnectorSource {
    fn from(factory: Arc<dyn CreateConnector>) -> Self {
        Self::Factory(factory)
    }
}

/// Result of a successful connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    pub accounts: Accounts,
    pub chain_id: ChainId,
}
