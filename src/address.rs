use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, ops::Deref, str::FromStr};

/// An account address as handed over by a wallet.
///
/// Wallets disagree on the `0x` prefix, so parsing accepts both forms. The
/// address is always displayed with the prefix.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Vec<u8>);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,
    #[error("Invalid hexadecimal address `{input}': {error}")]
    InvalidHex {
        input: String,
        error: hex::FromHexError,
    },
}

impl Address {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, AddressError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(input: &str) -> Result<Self, AddressError> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        let bytes = hex::decode(digits).map_err(|error| AddressError::InvalidHex {
            input: input.to_owned(),
            error,
        })?;
        Self::from_bytes(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&self.to_string()).finish()
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Ordered, non-empty list of the addresses authorised by a connector.
///
/// The first entry is the active account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Accounts(Vec<Address>);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("A connection needs at least one account")]
pub struct EmptyAccounts;

impl Accounts {
    pub fn first(&self) -> &Address {
        // non-empty by construction
        &self.0[0]
    }

    pub fn into_vec(self) -> Vec<Address> {
        self.0
    }
}

impl TryFrom<Vec<Address>> for Accounts {
    type Error = EmptyAccounts;

    fn try_from(accounts: Vec<Address>) -> Result<Self, Self::Error> {
        if accounts.is_empty() {
            Err(EmptyAccounts)
        } else {
            Ok(Self(accounts))
        }
    }
}

impl Deref for Accounts {
    type Target = [Address];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Accounts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let accounts = Vec::<Address>::deserialize(deserializer)?;
        Self::try_from(accounts).map_err(serde::de::Error::custom)
    }
}

/// Identifier of the chain (or network) a connector is on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
