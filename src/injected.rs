/*!
Connector for the CIP-30 wallets injected by browser extensions under
`window.cardano`.

```no_run
use dapp_connector::{Config, injected::wallets};
use std::sync::Arc;

let mut builder = Config::builder();
for wallet in wallets() {
    builder = builder.connector(Arc::new(wallet));
}
let config = builder.build();
```
*/

use crate::{
    address::{Address, ChainId},
    connector::{ConnectRequest, ConnectResponse, Connector, ConnectorContext, CreateConnector},
    emitter::{ConnectorEvent, Emitter},
    error::{APIError, APIErrorCode, ConnectError},
    ffi,
};
use async_trait::async_trait;
use std::{cell::RefCell, sync::Arc};
use wasm_bindgen::JsValue;

/// List the wallets that may be available.
///
/// If the list is empty it means we didn't detect any wallets that we support
/// and support CIP30. However it is possible we are simply missing this wallet
/// and wallets are welcomed to add support.
///
/// Alternatively, it is also possible the wallets were not injected yet by the
/// extensions. You should make sure the page is loaded fully before calling this
/// function (or do refresh the value from time to time).
///
pub fn wallets() -> Vec<Cip30Factory> {
    let Some(cardano) = cardano() else {
        return Vec::new();
    };

    js_sys::Object::keys(&cardano)
        .iter()
        .filter_map(|key| key.as_string())
        .filter(|key| lookup(key).is_some())
        .map(Cip30Factory::new)
        .collect()
}

/// attempt to find the wallet by its key under `window.cardano`
///
/// This function is equivalent to
///
/// `wallets().into_iter().find(|wallet| wallet.key() == key)`
///
pub fn wallet(key: &str) -> Option<Cip30Factory> {
    lookup(key).map(|_| Cip30Factory::new(key.to_owned()))
}

fn cardano() -> Option<js_sys::Object> {
    let window = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("window")).ok()?;
    let cardano = js_sys::Reflect::get(&window, &JsValue::from_str("cardano")).ok()?;

    cardano.is_object().then(|| cardano.into())
}

fn lookup(key: &str) -> Option<ffi::Cip30Wallet> {
    let cardano = cardano()?;
    let element = js_sys::Reflect::get(&cardano, &JsValue::from_str(key)).ok()?;

    looks_like_cip30_wallet(&element).then(|| ffi::Cip30Wallet::from(element))
}

fn looks_like_cip30_wallet(value: &JsValue) -> bool {
    if !value.is_object() {
        return false;
    }

    let has_string_property = |prop: &str| {
        js_sys::Reflect::get(value, &JsValue::from_str(prop))
            .ok()
            .and_then(|v| v.as_string())
            .is_some()
    };

    let has_function_property = |prop: &str| {
        js_sys::Reflect::get(value, &JsValue::from_str(prop))
            .ok()
            .map(|v| v.is_function())
            .unwrap_or(false)
    };

    has_string_property("name")
        && has_string_property("apiVersion")
        && has_string_property("icon")
        && has_function_property("enable")
        && has_function_property("isEnabled")
}

fn api_error(error: JsValue) -> APIError {
    serde_wasm_bindgen::from_value(error).unwrap_or_else(|decode_error| {
        APIError::internal(format!("Couldn't decode the error content: {decode_error}"))
    })
}

/// Parse the CIP-30 hexadecimal addresses, making sure they are valid
/// Cardano addresses.
fn decode_addresses(addresses: js_sys::Array) -> Result<Vec<Address>, APIError> {
    let mut decoded = Vec::with_capacity(addresses.length() as usize);
    for address in addresses {
        let Some(address) = address.as_string() else {
            return Err(APIError::internal(format!("Invalid address: {address:?}")));
        };
        let bytes = hex::decode(&address).map_err(|error| {
            APIError::internal(format!("Invalid address `{address}': {error}"))
        })?;
        pallas_addresses::Address::from_bytes(&bytes).map_err(|error| {
            APIError::internal(format!("Invalid address `{address}': {error}"))
        })?;
        let address = Address::from_bytes(bytes).map_err(|error| {
            APIError::internal(format!("Invalid address `{address}': {error}"))
        })?;
        decoded.push(address);
    }
    Ok(decoded)
}

/// Options of the CIP-30 `enable` call, read from the connection parameters.
#[derive(Debug, Default, serde::Deserialize, serde::Serialize)]
struct EnableOptions {
    #[serde(default)]
    extensions: Vec<ffi::Extension>,
}

impl EnableOptions {
    fn from_params(
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Option<Self>, APIError> {
        let Some(extensions) = params.get("extensions") else {
            return Ok(None);
        };

        serde_json::from_value(serde_json::json!({ "extensions": extensions }))
            .map(Some)
            .map_err(|error| APIError {
                code: APIErrorCode::InvalidRequest,
                info: format!("Invalid extensions: {error}"),
            })
    }
}

/// Creates the [`Cip30Connector`] of one injected wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cip30Factory {
    key: String,
}

impl Cip30Factory {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// the wallet's key under `window.cardano`, e.g. `"lace"`
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl CreateConnector for Cip30Factory {
    fn id(&self) -> &str {
        &self.key
    }

    fn create(&self, context: ConnectorContext) -> Arc<dyn Connector> {
        Arc::new(Cip30Connector::new(self.key.clone(), context.emitter))
    }
}

pub struct Cip30Connector {
    key: String,
    name: String,
    emitter: Emitter,
    api: RefCell<Option<ffi::Cip30Api>>,
}

impl Cip30Connector {
    fn new(key: String, emitter: Emitter) -> Self {
        let name = lookup(&key)
            .map(|wallet| wallet.name())
            .unwrap_or_else(|| key.clone());

        Self {
            key,
            name,
            emitter,
            api: RefCell::new(None),
        }
    }

    /// The wallet is looked up on every use: extensions may inject it after
    /// the page has loaded.
    fn wallet(&self) -> Result<ffi::Cip30Wallet, ConnectError> {
        lookup(&self.key).ok_or_else(|| ConnectError::ProviderNotFound(self.key.clone()))
    }

    async fn is_enabled(&self) -> Result<bool, ConnectError> {
        let enabled = self.wallet()?.enabled().await.map_err(api_error)?;

        enabled.as_bool().ok_or_else(|| {
            APIError::internal(format!("Unexpected returned JSON Object: {enabled:?}")).into()
        })
    }

    /// The API of an already enabled wallet, never prompts the user.
    async fn enabled_api(&self) -> Result<ffi::Cip30Api, ConnectError> {
        if let Some(api) = self.api.borrow().clone() {
            return Ok(api);
        }

        if !self.is_enabled().await? {
            return Err(APIError {
                code: APIErrorCode::Refused,
                info: "The application is not authorised yet".to_owned(),
            }
            .into());
        }
        self.enable(JsValue::UNDEFINED).await
    }

    async fn enable(&self, options: JsValue) -> Result<ffi::Cip30Api, ConnectError> {
        let api = self
            .wallet()?
            .enable(options)
            .await
            .map_err(api_error)?;
        self.api.replace(Some(api.clone()));
        Ok(api)
    }

    async fn accounts_of(api: &ffi::Cip30Api) -> Result<Vec<Address>, APIError> {
        let used = api.get_used_addresses(None).await.map_err(api_error)?;
        let used = decode_addresses(used)?;
        if !used.is_empty() {
            return Ok(used);
        }

        // a fresh wallet has not used any address yet
        let unused = api.get_unused_addresses().await.map_err(api_error)?;
        decode_addresses(unused)
    }

    async fn chain_id_of(api: &ffi::Cip30Api) -> Result<ChainId, APIError> {
        let id = api.network_id().await.map_err(api_error)?;

        match id.as_f64() {
            Some(number) if number >= 0.0 && number.fract() == 0.0 => Ok(ChainId(number as u64)),
            _ => Err(APIError::internal(format!("Unknown network id: {id:?}"))),
        }
    }
}

#[async_trait(?Send)]
impl Connector for Cip30Connector {
    fn id(&self) -> &str {
        &self.key
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, ConnectError> {
        let api = self.enabled_api().await?;

        match Self::accounts_of(&api).await {
            Err(error) if error.code == APIErrorCode::AccountChange => {
                log::debug!("wallet `{}' switched account, enabling again", self.key);
                self.api.replace(None);

                let api = self.enabled_api().await?;
                let accounts = Self::accounts_of(&api).await?;
                self.emitter.emit(ConnectorEvent::Change {
                    accounts: Some(accounts.clone()),
                    chain_id: None,
                });
                Ok(accounts)
            }
            result => Ok(result?),
        }
    }

    async fn get_chain_id(&self) -> Result<ChainId, ConnectError> {
        let api = self.enabled_api().await?;
        Ok(Self::chain_id_of(&api).await?)
    }

    async fn connect(&self, request: ConnectRequest) -> Result<ConnectResponse, ConnectError> {
        let options = match EnableOptions::from_params(&request.params)? {
            Some(options) => serde_wasm_bindgen::to_value(&options).map_err(|error| {
                APIError::internal(format!("Couldn't encode the enable options: {error}"))
            })?,
            None => JsValue::UNDEFINED,
        };

        let api = self.enable(options).await?;
        let accounts = Self::accounts_of(&api).await?;
        let chain_id = Self::chain_id_of(&api).await?;

        if let Some(requested) = request.chain_id.filter(|requested| *requested != chain_id) {
            // CIP-30 has no way to ask the wallet to switch networks
            log::debug!(
                "wallet `{}' is on network {chain_id}, not {requested}",
                self.key
            );
        }

        Ok(ConnectResponse { accounts, chain_id })
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        // CIP-30 has no revocation, forget the API object
        self.api.replace(None);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, ConnectError> {
        self.is_enabled().await
    }
}
