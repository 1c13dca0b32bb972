#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DelegationError {
    #[error("class not found: {name}{}", cause_suffix(.cause))]
    ClassNotFound {
        name: String,
        cause: Option<String>,
    },
    #[error("resource not found: {path}")]
    ResourceNotFound { path: String },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("module {module} failed: {reason}")]
    Module { module: String, reason: String },
}

impl DelegationError {
    pub fn class_not_found(name: impl Into<String>) -> Self {
        Self::ClassNotFound {
            name: name.into(),
            cause: None,
        }
    }

    pub fn class_not_found_with(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::ClassNotFound {
            name: name.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ClassNotFound { .. } | Self::ResourceNotFound { .. }
        )
    }
}

fn cause_suffix(cause: &Option<String>) -> String {
    match cause {
        Some(cause) => format!(" ({cause})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, DelegationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_cause() {
        let err = DelegationError::class_not_found_with("a.b.C", "timed out after 10ms");
        assert_eq!(err.to_string(), "class not found: a.b.C (timed out after 10ms)");

        let err = DelegationError::class_not_found("a.b.C");
        assert_eq!(err.to_string(), "class not found: a.b.C");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_invalid_filter_is_not_a_lookup_miss() {
        let err = DelegationError::InvalidFilter("empty name".to_string());
        assert!(!err.is_not_found());
    }
}
