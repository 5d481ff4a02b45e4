use thiserror::Error;

/// Errors surfaced by tree and map operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum TreeError {
    /// A node was asked to hold more entries than its capacity allows on a
    /// path that cannot split, such as an internal split landing on a
    /// duplicate separator key.
    #[error("node capacity exceeded on an unsplittable path")]
    CapacityViolation,

    /// The requested key is not present.
    #[error("key not found")]
    NotFound,

    /// Reserved for a strict map mode that rejects re-insertion.
    #[error("duplicate key")]
    DuplicateKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            TreeError::CapacityViolation.to_string(),
            "node capacity exceeded on an unsplittable path"
        );
        assert_eq!(TreeError::NotFound.to_string(), "key not found");
        assert_eq!(TreeError::DuplicateKey.to_string(), "duplicate key");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TreeError>();
    }
}
