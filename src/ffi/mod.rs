//! Raw bindings to the CIP-30 wallet objects injected by browser extensions.

pub mod cip30;
pub mod cip30_api;

pub use self::{cip30::Cip30Wallet, cip30_api::Cip30Api};

/// A CIP-30 extension, e.g. `{ "cip": 95 }`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize, serde::Serialize,
)]
pub struct Extension {
    pub cip: u64,
}
