use js_sys::Array;
use wasm_bindgen::prelude::*;

/// Used to specify optional pagination for some API calls. Limits results to
/// `limit` each page, and uses a 0-indexing `page` to refer to which of those
/// pages of `limit` items each.
#[wasm_bindgen]
pub struct Paginate {
    /// the page index
    pub page: usize,
    /// the limit of elements per pages
    pub limit: usize,
}

#[wasm_bindgen]
extern "C" {
    /// The API object returned by a successful `enable`.
    #[derive(Clone, PartialEq)]
    pub type Cip30Api;

    /// Returns the network id of the currently connected account.
    /// 0 is testnet and 1 is mainnet but other networks can possibly be
    /// returned by wallets. This result will stay the same unless
    /// the connected account has changed
    #[wasm_bindgen(method, catch, js_name = "getNetworkId")]
    pub async fn network_id(this: &Cip30Api) -> Result<JsValue, JsValue>;

    /// Addresses of the wallet that have been used in a transaction.
    /// Hexadecimal encoded.
    #[wasm_bindgen(method, catch, js_name = "getUsedAddresses")]
    pub async fn get_used_addresses(
        this: &Cip30Api,
        paginate: Option<Paginate>,
    ) -> Result<Array, JsValue>;

    /// Addresses of the wallet that have never been used.
    /// Hexadecimal encoded.
    #[wasm_bindgen(method, catch, js_name = "getUnusedAddresses")]
    pub async fn get_unused_addresses(this: &Cip30Api) -> Result<Array, JsValue>;
}
