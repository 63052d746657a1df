use crate::{
    address::{Accounts, ChainId},
    config::{Config, Connection, State, Status},
    connector::{ConnectRequest, ConnectResult, ConnectorHandle, ConnectorSource},
    emitter::{ConnectorEvent, Message},
    error::{APIError, ConnectError},
};
use futures::future;

#[derive(Clone)]
pub struct ConnectParameters {
    pub connector: ConnectorSource,
    /// chain to connect to, if the connector can choose
    pub chain_id: Option<ChainId>,
    /// connector specific parameters, handed to the handshake untouched
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ConnectParameters {
    pub fn new(connector: impl Into<ConnectorSource>) -> Self {
        Self {
            connector: connector.into(),
            chain_id: None,
            params: serde_json::Map::new(),
        }
    }

    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Undoes what `connect` did to the store, unless disarmed: puts the status
/// back to what it was before and, once the handshake succeeded, rewires the
/// connector back to the unsolicited `connect` handler. Covers errors as well
/// as a caller dropping the future.
struct Rollback<'a> {
    config: &'a Config,
    armed: bool,
    rewired: Option<ConnectorHandle>,
}

impl<'a> Rollback<'a> {
    fn new(config: &'a Config) -> Self {
        Self {
            config,
            armed: true,
            rewired: None,
        }
    }

    /// Start following the connector's changes. A connector that already
    /// has a connection was watched before and stays watched on rollback.
    fn watch(&mut self, connector: &ConnectorHandle) {
        if !self.config.state().connections.contains_key(connector.uid()) {
            self.rewired = Some(connector.clone());
        }
        self.config.watch_connection(connector);
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if let Some(connector) = self.rewired.take() {
            log::debug!("connector {} abandoned after its handshake", connector.uid());
            self.config.unwatch_connection(&connector);
        }
        // keep the current connector connected
        self.config.set_state(|state| State {
            status: if state.current.is_some() {
                Status::Connected
            } else {
                Status::Disconnected
            },
            ..state.clone()
        });
    }
}

/// Connect the application to a wallet.
///
/// If the wallet already authorised the application, the existing
/// authorisation is adopted without prompting the user and nothing is
/// persisted. Otherwise the connector's handshake runs, the store starts
/// following the connector's events and the connector is remembered as the
/// most recently used one.
///
/// # Errors
///
/// * [`ConnectError::AlreadyConnected`] if the connector is the current one,
///   or if it is already being connected. Nothing is changed in that case.
/// * whatever the handshake fails with, untouched. The status goes back to
///   `connected` if another connector is current, `disconnected` otherwise.
pub async fn connect(
    config: &Config,
    parameters: ConnectParameters,
) -> Result<ConnectResult, ConnectError> {
    let ConnectParameters {
        connector,
        chain_id,
        params,
    } = parameters;

    let connector = match connector {
        ConnectorSource::Factory(factory) => config.setup_connector(factory.as_ref()),
        ConnectorSource::Handle(handle) => handle,
    };

    if config.state().current.as_ref() == Some(connector.uid()) {
        return Err(ConnectError::AlreadyConnected);
    }
    let Some(_in_flight) = config.begin_connect(connector.uid()) else {
        log::debug!("connector {} is already connecting", connector.uid());
        return Err(ConnectError::AlreadyConnected);
    };

    let mut rollback = Rollback::new(config);
    config.set_state(|state| State {
        status: Status::Connecting,
        ..state.clone()
    });
    connector
        .emitter()
        .emit(ConnectorEvent::Message(Message::Connecting));

    let request = ConnectRequest {
        chain_id,
        is_reconnecting: false,
        params,
    };
    let result = establish(&mut rollback, &connector, request).await?;

    rollback.disarm();
    Ok(result)
}

async fn establish(
    rollback: &mut Rollback<'_>,
    connector: &ConnectorHandle,
    request: ConnectRequest,
) -> Result<ConnectResult, ConnectError> {
    let config = rollback.config;
    let (accounts, chain_id) =
        future::join(connector.get_accounts(), connector.get_chain_id()).await;

    let authorised = accounts
        .ok()
        .and_then(|accounts| Accounts::try_from(accounts).ok())
        .zip(chain_id.ok());
    if let Some((accounts, chain_id)) = authorised {
        log::debug!(
            "connector `{}' already authorised on chain {chain_id}",
            connector.id()
        );
        commit(config, connector, accounts.clone(), chain_id);
        return Ok(ConnectResult { accounts, chain_id });
    }

    log::debug!("connecting to `{}'", connector.id());
    let response = connector.connect(request).await?;
    let accounts = Accounts::try_from(response.accounts).map_err(|error| {
        APIError::internal(format!("connector `{}': {error}", connector.id()))
    })?;

    rollback.watch(connector);
    super::remember_connector(config, connector).await;
    commit(config, connector, accounts.clone(), response.chain_id);

    Ok(ConnectResult {
        accounts,
        chain_id: response.chain_id,
    })
}

fn commit(config: &Config, connector: &ConnectorHandle, accounts: Accounts, chain_id: ChainId) {
    let connection = Connection {
        accounts,
        chain_id,
        connector: connector.clone(),
    };
    config.set_state(|state| state.clone().with_connection(connection));
}
