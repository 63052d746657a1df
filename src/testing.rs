//! Scripted connector and storage doubles for the unit tests.

use crate::{
    address::{Accounts, Address, ChainId},
    connector::{ConnectRequest, ConnectResponse, Connector, ConnectorContext, CreateConnector},
    emitter::{ConnectorEvent, Emitter},
    error::{APIError, ConnectError, StorageError},
    storage::StorageBackend,
};
use async_trait::async_trait;
use futures::channel::oneshot;
use std::{
    cell::{Cell, RefCell},
    sync::Arc,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn address(hex: &str) -> Address {
    Address::from_hex(hex).unwrap()
}

pub fn accounts(hexes: &[&str]) -> Accounts {
    Accounts::try_from(hexes.iter().map(|hex| address(hex)).collect::<Vec<_>>()).unwrap()
}

fn not_authorized() -> ConnectError {
    ConnectError::Api(APIError::internal("not authorized"))
}

/// A wallet whose answers are set by the test.
///
/// By default nothing is authorised (accounts and chain queries fail) and the handshake
/// succeeds with `["0x01"]` on chain 1.
pub struct MockConnector {
    id: String,
    emitter: RefCell<Option<Emitter>>,
    pub accounts: RefCell<Result<Vec<Address>, ConnectError>>,
    pub chain_id: RefCell<Result<ChainId, ConnectError>>,
    pub handshake: RefCell<Result<ConnectResponse, ConnectError>>,
    pub disconnect_result: RefCell<Result<(), ConnectError>>,
    /// when set, the handshake waits for the sender before answering
    pub gate: RefCell<Option<oneshot::Receiver<()>>>,
    /// when set, `get_accounts` only answers once `get_chain_id` was called
    accounts_gate: RefCell<Option<oneshot::Receiver<()>>>,
    chain_queried: RefCell<Option<oneshot::Sender<()>>>,
    pub requests: RefCell<Vec<ConnectRequest>>,
    pub queries: Cell<usize>,
    pub disconnects: Cell<usize>,
}

impl MockConnector {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            emitter: RefCell::new(None),
            accounts: RefCell::new(Err(not_authorized())),
            chain_id: RefCell::new(Err(not_authorized())),
            handshake: RefCell::new(Ok(ConnectResponse {
                accounts: vec![address("0x01")],
                chain_id: ChainId(1),
            })),
            disconnect_result: RefCell::new(Ok(())),
            gate: RefCell::new(None),
            accounts_gate: RefCell::new(None),
            chain_queried: RefCell::new(None),
            requests: RefCell::new(Vec::new()),
            queries: Cell::new(0),
            disconnects: Cell::new(0),
        }
    }

    /// the wallet already authorised the application
    pub fn authorize(&self, hexes: &[&str], chain_id: u64) {
        *self.accounts.borrow_mut() = Ok(hexes.iter().map(|hex| address(hex)).collect());
        *self.chain_id.borrow_mut() = Ok(ChainId(chain_id));
    }

    pub fn handshake_returns(&self, hexes: &[&str], chain_id: u64) {
        *self.handshake.borrow_mut() = Ok(ConnectResponse {
            accounts: hexes.iter().map(|hex| address(hex)).collect(),
            chain_id: ChainId(chain_id),
        });
    }

    pub fn handshake_fails(&self, error: ConnectError) {
        *self.handshake.borrow_mut() = Err(error);
    }

    pub fn hold_handshake(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        *self.gate.borrow_mut() = Some(receiver);
        sender
    }

    /// `get_accounts` stays pending until `get_chain_id` has been called, so
    /// awaiting one before starting the other never completes
    pub fn answer_accounts_after_chain(&self) {
        let (sender, receiver) = oneshot::channel();
        *self.accounts_gate.borrow_mut() = Some(receiver);
        *self.chain_queried.borrow_mut() = Some(sender);
    }

    pub fn handshakes(&self) -> usize {
        self.requests.borrow().len()
    }

    /// emit as the wallet would
    pub fn emit(&self, event: ConnectorEvent) {
        let emitter = self.emitter.borrow().clone();
        if let Some(emitter) = emitter {
            emitter.emit(event);
        }
    }
}

#[async_trait(?Send)]
impl Connector for MockConnector {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, ConnectError> {
        self.queries.set(self.queries.get() + 1);
        let gate = self.accounts_gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.accounts.borrow().clone()
    }

    async fn get_chain_id(&self) -> Result<ChainId, ConnectError> {
        self.queries.set(self.queries.get() + 1);
        let chain_queried = self.chain_queried.borrow_mut().take();
        if let Some(chain_queried) = chain_queried {
            let _ = chain_queried.send(());
        }
        self.chain_id.borrow().clone()
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse, ConnectError> {
        self.requests.borrow_mut().push(request);
        let gate = self.gate.borrow_mut().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.handshake.borrow().clone()
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        self.disconnects.set(self.disconnects.get() + 1);
        self.disconnect_result.borrow().clone()
    }
}

pub struct MockFactory(Arc<MockConnector>);

impl CreateConnector for MockFactory {
    fn id(&self) -> &str {
        &self.0.id
    }

    fn create(&self, context: ConnectorContext) -> Arc<dyn Connector> {
        *self.0.emitter.borrow_mut() = Some(context.emitter);
        self.0.clone()
    }
}

pub fn mock(id: &str) -> (Arc<MockConnector>, Arc<dyn CreateConnector>) {
    let connector = Arc::new(MockConnector::new(id));
    let factory: Arc<dyn CreateConnector> = Arc::new(MockFactory(Arc::clone(&connector)));
    (connector, factory)
}

/// A backend that refuses every write.
#[derive(Default)]
pub struct FailingStorage {
    pub writes: Cell<usize>,
}

#[async_trait(?Send)]
impl StorageBackend for FailingStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        self.writes.set(self.writes.get() + 1);
        Err(StorageError::Backend("quota exceeded".to_owned()))
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Backend("quota exceeded".to_owned()))
    }
}

/// A backend whose writes never complete.
#[derive(Default)]
pub struct StallingStorage {
    pub writes: Cell<usize>,
}

#[async_trait(?Send)]
impl StorageBackend for StallingStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        self.writes.set(self.writes.get() + 1);
        futures::future::pending().await
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        futures::future::pending().await
    }
}
