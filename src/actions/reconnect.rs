use crate::{
    address::Accounts,
    config::{Config, Connection, State, Status},
    connector::{ConnectRequest, ConnectorHandle, ConnectorSource},
    storage::RECENT_CONNECTOR_ID,
};
use std::collections::HashSet;

/// Restore the connections of a previous visit.
///
/// Every candidate (the given connectors, or all the registered ones) that
/// is still authorised is connected again without prompting the user. The
/// most recently used connector is tried first and becomes the current one,
/// unless a connector is already current.
///
/// Wallets that fail are skipped, as are the ones a `connect` is already
/// working on. A call made while another reconnect is running returns
/// immediately with no connections.
pub async fn reconnect(
    config: &Config,
    connectors: Option<Vec<ConnectorSource>>,
) -> Vec<Connection> {
    let Some(_reconnecting) = config.begin_reconnect() else {
        log::debug!("reconnect already in progress");
        return Vec::new();
    };

    config.set_state(|state| State {
        status: if state.current.is_some() {
            Status::Reconnecting
        } else {
            Status::Connecting
        },
        ..state.clone()
    });

    let mut candidates: Vec<ConnectorHandle> = match connectors {
        Some(sources) => sources
            .into_iter()
            .map(|source| match source {
                ConnectorSource::Factory(factory) => config.setup_connector(factory.as_ref()),
                ConnectorSource::Handle(handle) => handle,
            })
            .collect(),
        None => config.connectors(),
    };
    if let Some(recent) = recent_connector_id(config).await {
        // stable: the others keep their order
        candidates.sort_by_key(|connector| connector.id() != recent);
    }

    let mut seen = HashSet::new();
    let mut connections = Vec::new();
    for connector in candidates {
        if !seen.insert(connector.uid().clone())
            || config.state().connections.contains_key(connector.uid())
        {
            continue;
        }
        let Some(_in_flight) = config.begin_connect(connector.uid()) else {
            log::debug!("connector {} is already connecting, skipped", connector.uid());
            continue;
        };

        match connector.is_authorized().await {
            Ok(true) => (),
            Ok(false) => continue,
            Err(error) => {
                log::debug!("connector `{}' authorisation unknown: {error}", connector.id());
                continue;
            }
        }

        let request = ConnectRequest {
            is_reconnecting: true,
            ..ConnectRequest::default()
        };
        let response = match connector.connect(request).await {
            Ok(response) => response,
            Err(error) => {
                log::debug!("couldn't reconnect `{}': {error}", connector.id());
                continue;
            }
        };
        let Ok(accounts) = Accounts::try_from(response.accounts) else {
            continue;
        };

        config.watch_connection(&connector);
        let connection = Connection {
            accounts,
            chain_id: response.chain_id,
            connector,
        };
        config.set_state(|state| {
            let mut next = state.clone().with_connection(connection.clone());
            next.status = state.status;
            if state.current.is_some() {
                next.current = state.current.clone();
            }
            next
        });
        connections.push(connection);
    }

    config.set_state(|state| State {
        status: if state.connections.is_empty() {
            Status::Disconnected
        } else {
            Status::Connected
        },
        ..state.clone()
    });

    connections
}

async fn recent_connector_id(config: &Config) -> Option<String> {
    let storage = config.storage()?;

    match storage.get_item::<String>(RECENT_CONNECTOR_ID).await {
        Ok(id) => id,
        Err(error) => {
            log::warn!("couldn't read the recent connector: {error}");
            None
        }
    }
}
