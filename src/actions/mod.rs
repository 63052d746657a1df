/*!
Connection actions.

These are the operations an application calls: [`connect`] a wallet,
[`disconnect`] it, or [`reconnect`] the wallets authorised during a previous
visit.
*/

mod connect;
mod disconnect;
mod reconnect;

pub use self::{
    connect::{ConnectParameters, connect},
    disconnect::disconnect,
    reconnect::reconnect,
};

use crate::{config::Config, connector::ConnectorHandle, storage::RECENT_CONNECTOR_ID};

/// Remember `connector` as the most recently used one.
///
/// Best effort: without storage this does nothing and a failing storage is
/// only logged.
async fn remember_connector(config: &Config, connector: &ConnectorHandle) {
    let Some(storage) = config.storage() else {
        return;
    };

    if let Err(error) = storage.set_item(RECENT_CONNECTOR_ID, connector.id()).await {
        log::warn!(
            "couldn't remember `{}' as the recent connector: {error}",
            connector.id()
        );
    }
}
