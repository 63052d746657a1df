/// Error codes a wallet may return when a request fails.
///
/// The CIP-30 codes come first; wallets bridging an EIP-1193 provider
/// sometimes surface the JSON-RPC codes instead, so the two that matter to
/// the connection flow are recognised as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum APIErrorCode {
    #[error("Invalid inputs.")]
    InvalidRequest,
    #[error("An error occured during the execution of this API call.")]
    InternalError,
    #[error("The request was denied. The wallet may be disconnected.")]
    Refused,
    /// If this error happens we might need to re-authenticate.
    #[error("The account has changed.")]
    AccountChange,
    #[error("The user rejected the request.")]
    UserRejectedRequest,
    /// A request of the same kind is already pending in the wallet.
    #[error("Requested resource not available.")]
    ResourceUnavailable,
    #[error("Unknown error code `{0}'")]
    Unknown(i64),
}

#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error, serde::Deserialize,
)]
#[error("{code}. {info}.")]
pub struct APIError {
    pub code: APIErrorCode,
    #[serde(alias = "message")]
    pub info: String,
}

impl APIError {
    pub(crate) fn internal(info: impl Into<String>) -> Self {
        Self {
            code: APIErrorCode::InternalError,
            info: info.into(),
        }
    }
}

/// Failures of the durable key-value storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Couldn't encode or decode the stored value: {0}")]
    Codec(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(error.to_string())
    }
}

/// Errors returned by the connection actions.
///
/// [`AlreadyConnected`] is raised before anything is mutated. The wallet
/// related variants are passed through from the connector untouched.
///
/// [`AlreadyConnected`]: ConnectError::AlreadyConnected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Connector already connected.")]
    AlreadyConnected,
    #[error("User rejected the request. {info}")]
    UserRejected { info: String },
    #[error("Requested resource not available. {info}")]
    ResourceUnavailable { info: String },
    #[error("Wallet provider `{0}' not found.")]
    ProviderNotFound(String),
    #[error(transparent)]
    Api(APIError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ConnectError {
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, Self::UserRejected { .. })
    }
}

impl From<APIError> for ConnectError {
    fn from(error: APIError) -> Self {
        match error.code {
            APIErrorCode::Refused | APIErrorCode::UserRejectedRequest => {
                Self::UserRejected { info: error.info }
            }
            APIErrorCode::ResourceUnavailable => Self::ResourceUnavailable { info: error.info },
            _ => Self::Api(error),
        }
    }
}

impl<'de> serde::Deserialize<'de> for APIErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;
        impl serde::de::Visitor<'_> for Visitor {
            type Value = APIErrorCode;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "Expecting an integer APIErrorCode")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    -1 => Ok(APIErrorCode::InvalidRequest),
                    -2 => Ok(APIErrorCode::InternalError),
                    -3 => Ok(APIErrorCode::Refused),
                    -4 => Ok(APIErrorCode::AccountChange),
                    4001 => Ok(APIErrorCode::UserRejectedRequest),
                    -32002 => Ok(APIErrorCode::ResourceUnavailable),
                    unknown => Ok(APIErrorCode::Unknown(unknown)),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let v = i64::try_from(v)
                    .map_err(|_| E::custom(format!("error code `{v}' out of range")))?;
                self.visit_i64(v)
            }

            // browsers hand every number over as a double
            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v.fract() != 0.0 {
                    return Err(E::custom(format!("error code `{v}' is not an integer")));
                }
                self.visit_i64(v as i64)
            }
        }

        deserializer.deserialize_i64(Visitor)
    }
}
