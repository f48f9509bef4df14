//! Shared error definitions for tiller primitives.

/// The result type used throughout tiller-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when handling core primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier string could not be parsed.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of the parse failure.
        message: String,
    },

    /// A label key or value was rejected.
    #[error("invalid label: {message}")]
    InvalidLabel {
        /// Description of the rejected label.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "not a ulid".into(),
        };
        assert!(err.to_string().contains("invalid identifier"));
    }
}
