//! Identity error types.

/// Errors raised while building or parsing an [`EntityId`](crate::EntityId).
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The version string is not a 1-3 component version.
    #[error("Invalid version '{input}': {source}")]
    InvalidVersion {
        input: String,
        #[source]
        source: semver::Error,
    },

    /// The identity text is not of the form `name@version`.
    #[error("Invalid identity '{0}', expected name@version")]
    InvalidFormat(String),

    /// The identity has an empty name.
    #[error("Identity name cannot be empty")]
    EmptyName,
}

/// Identity result type
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IdentityError::InvalidFormat("Module".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid identity 'Module', expected name@version"
        );
    }
}
