use itertools::Itertools;

pub type VatResult<T> = Result<T, VatError>;

/// Every error here is fatal to the current delivery. Nothing in this crate
/// retries; the enclosing vat decides what a failed delivery means.
#[derive(Debug, thiserror::Error)]
pub enum VatError {
    /// A caller broke the GC or kind protocol: retiring an identity that is
    /// still exported, cross-facet invocation, a durable kind redefined with
    /// a different shape.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Persisted bookkeeping does not match what the vat believes is live.
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("defineDurableKind not called for tags: [{}]", .tags.iter().join(","))]
    Reconnection { tags: Vec<String> },
    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("cannot marshal: {0}")]
    Marshal(String),
    #[error("{tag} has no method {method:?}")]
    NoSuchMethod { tag: String, method: String },
    /// Raised by vat-authored behavior code.
    #[error("{0}")]
    Behavior(String),
    #[error("corrupt persisted record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Protocol,
    Integrity,
    Reconnection,
    Behavior,
}

impl VatError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        VatError::Protocol(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        VatError::Integrity(msg.into())
    }

    pub fn behavior(msg: impl Into<String>) -> Self {
        VatError::Behavior(msg.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            VatError::Protocol(_) => ErrorClass::Protocol,
            VatError::Integrity(_)
            | VatError::PayloadTooLarge { .. }
            | VatError::Marshal(_)
            | VatError::Json(_) => ErrorClass::Integrity,
            VatError::Reconnection { .. } => ErrorClass::Reconnection,
            VatError::NoSuchMethod { .. } | VatError::Behavior(_) => ErrorClass::Behavior,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnection_names_every_tag() {
        let err = VatError::Reconnection {
            tags: vec!["purse".to_owned(), "payment".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "defineDurableKind not called for tags: [purse,payment]"
        );
        assert_eq!(err.class(), ErrorClass::Reconnection);
    }

    #[test]
    fn size_policy_is_an_integrity_failure() {
        let err = VatError::PayloadTooLarge { size: 10, limit: 4 };
        assert_eq!(err.class(), ErrorClass::Integrity);
    }
}
