/*!

# dApp wallet connector

This library coordinates wallet connectors on behalf of a decentralized
application frontend. It keeps track of which wallets are connected, with
which accounts and on which chain, and remembers the wallet used last so the
connection can be restored on the next visit.

## Features

- Register wallet connectors, lazily, once per connector id
- Connect, adopting an existing authorisation without prompting the user
- Follow account, chain and disconnection events from the wallets
- Reconnect the wallets authorised during a previous visit
- CIP-30 browser wallets out of the box (see [`injected`])

## Usage

First create the store, with the connectors the application supports:

```no_run
use dapp_connector::{Config, injected, storage::LocalStorage};
use std::sync::Arc;

let mut builder = Config::builder().storage(Arc::new(LocalStorage));
for wallet in injected::wallets() {
    builder = builder.connector(Arc::new(wallet));
}
let config = builder.build();
```

Then connect one of them. If the user already approved the application the
wallet is adopted without a prompt:

```no_run
# use dapp_connector::Config;
# async fn test(config: Config) -> anyhow::Result<()> {
use dapp_connector::actions::{ConnectParameters, connect};

let connector = config.connectors().pop().unwrap();
let connection = connect(&config, ConnectParameters::new(connector)).await?;
println!("connected {} on chain {}", connection.accounts.first(), connection.chain_id);
# Ok(()) }
```

The store is reactive, [`Config::subscribe`] to be notified of every change
of the connection [`State`].

*/

pub mod actions;
mod address;
mod config;
mod connector;
pub mod emitter;
pub mod error;
pub mod ffi;
pub mod injected;
pub mod storage;
#[cfg(test)]
mod testing;

pub use self::{
    address::{Accounts, Address, AddressError, ChainId, EmptyAccounts},
    config::{
        Config, ConfigBuilder, ConfigOptions, Connection, State, Status, SubscriptionId,
    },
    connector::{
        ConnectRequest, ConnectResponse, ConnectResult, Connector, ConnectorContext,
        ConnectorHandle, ConnectorSource, CreateConnector, Uid,
    },
    error::ConnectError,
};
