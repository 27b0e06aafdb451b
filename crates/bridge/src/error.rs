/// Crate-wide result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Relay errors. None of these escape the engine: configuration problems are
/// excluded and logged, dispatch failures are logged per target, and lookups
/// of unknown links are silent no-ops.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value could not be used.
    #[error("invalid relay configuration: {message}")]
    Config { message: String },

    /// Transport failure while talking to a delivery endpoint.
    #[error("{operation} via endpoint {endpoint_id} failed: {message}")]
    Dispatch {
        endpoint_id: String,
        operation: &'static str,
        message: String,
    },

    /// No link record exists for the requested origin message.
    #[error("no relayed copies recorded for message {origin_message_id} on bridge {bridge_id}")]
    Lookup {
        bridge_id: String,
        origin_message_id: String,
    },

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn config(message: impl std::fmt::Display) -> Self {
        Self::Config {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn dispatch(
        endpoint_id: impl Into<String>,
        operation: &'static str,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Dispatch {
            endpoint_id: endpoint_id.into(),
            operation,
            message: message.to_string(),
        }
    }
}

impl rainbow_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Config { message }
    }
}

rainbow_common::impl_context!(Error);
