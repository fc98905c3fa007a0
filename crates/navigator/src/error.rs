#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NavigatorError {
    #[error("{0}")]
    Transport(String),

    #[error("empty")]
    Empty,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NavigatorError>;

impl From<serde_json::Error> for NavigatorError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl NavigatorError {
    /// Wraps a failed backend round-trip.
    pub fn transport(error: impl std::fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }

    /// Whether the error came from directory resolution rather than
    /// from a failed call.
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Empty | Self::AccessDenied(_))
    }
}
