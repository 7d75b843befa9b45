//! Query construction error types
//!
//! Every failure raised while building a query plan is reported through
//! [`QueryError`]. Errors are raised at the point of detection and are never
//! retried; a failed call leaves the designer it was invoked on untouched.

use thiserror::Error;

/// Errors that can occur while assembling or executing a query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The join topology or a combinator is malformed
    #[error("Structural error: {0}")]
    Structural(String),

    /// A field, member, entity or association could not be located
    #[error("Resolution error: {message}")]
    Resolution {
        message: String,
        entity: Option<String>,
        member: Option<String>,
    },

    /// An operator or aggregate combination the lowering tables do not cover
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// A required input was missing or empty
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The backend failed while running a composed expression
    #[error("Execution error: {0}")]
    Execution(String),
}

impl QueryError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Resolution failure that is not tied to a specific member
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
            entity: None,
            member: None,
        }
    }

    /// A member lookup failed on an entity type
    pub fn member_not_found(entity: &str, member: &str, suggestion: Option<String>) -> Self {
        let mut message = format!("member '{}' not found on entity '{}'", member, entity);
        if let Some(suggestion) = suggestion {
            message.push_str(&format!(" (did you mean '{}'?)", suggestion));
        }
        Self::Resolution {
            message,
            entity: Some(entity.to_string()),
            member: Some(member.to_string()),
        }
    }

    /// The entity type is not declared in the schema
    pub fn entity_not_found(entity: &str) -> Self {
        Self::Resolution {
            message: format!("entity '{}' is not declared in the schema", entity),
            entity: Some(entity.to_string()),
            member: None,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }

    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument(_))
    }
}

/// Result type for query construction and execution
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_not_found_message() {
        let err = QueryError::member_not_found("Customer", "Contry", Some("Country".to_string()));
        assert_eq!(
            err.to_string(),
            "Resolution error: member 'Contry' not found on entity 'Customer' (did you mean 'Country'?)"
        );
        assert!(err.is_resolution());
    }

    #[test]
    fn test_kind_predicates() {
        assert!(QueryError::structural("dup").is_structural());
        assert!(QueryError::unsupported("op").is_unsupported());
        assert!(QueryError::argument("empty").is_argument());
        assert!(!QueryError::execution("boom").is_structural());
    }
}
