use super::Cip30Api;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    /// A CIP-30 wallet as injected under `window.cardano.<name>`.
    #[derive(Clone, PartialEq)]
    pub type Cip30Wallet;

    /// A name for the wallet which can be used inside of the dApp for the
    /// purpose of asking the user which wallet they would like to connect with.
    #[wasm_bindgen(method, getter)]
    pub fn name(this: &Cip30Wallet) -> String;

    /// The version number of the API that the wallet supports.
    #[wasm_bindgen(method, getter, js_name = "apiVersion")]
    pub fn version(this: &Cip30Wallet) -> String;

    /// A URI image (e.g. data URI base64 or other) for img src for the wallet.
    #[wasm_bindgen(method, getter)]
    pub fn icon(this: &Cip30Wallet) -> String;

    /// Check if the dApp is connected to the wallet. Returns true if connected
    /// or whitelisted, indicating wallet.enable() will succeed without prompts.
    #[wasm_bindgen(method, catch, js_name = "isEnabled")]
    pub async fn enabled(this: &Cip30Wallet) -> Result<JsValue, JsValue>;

    /// Establishes initial connection with user's wallet, returning a full API
    /// object. Prompts for user permission on first connect, subsequent
    /// connections may use cached permissions.
    ///
    /// `options` is either `undefined` or `{ extensions: [{ cip: n }, ...] }`.
    ///
    /// More details [CIP-0030](https://github.com/cardano-foundation/CIPs/tree/master/CIP-0030#cardanowalletnameenable-extensions-extension----promiseapi)
    ///
    #[wasm_bindgen(method, catch, js_name = "enable")]
    pub async fn enable(this: &Cip30Wallet, options: JsValue) -> Result<Cip30Api, JsValue>;
}
