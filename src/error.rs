use thiserror::Error;

use crate::parse::ParseError;

/// Unified error type for rule registration, matching and dynamic evaluation.
///
/// Internal consistency failures (popping an empty stack, an override with no
/// prior assignment record) are panics, not variants of this enum.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("too many context keys: cannot register '{key}', the limit is {limit}")]
    TooManyContextKeys { key: String, limit: usize },

    #[error("invalid rule: {reason}")]
    InvalidRule { reason: String },

    #[error("evaluation of `{expression}` failed: {message}\ncontext:\n{context}")]
    Evaluation {
        expression: String,
        message: String,
        context: String,
    },

    #[error("context exceeded {limit} assignments while chaining\ncontext:\n{context}")]
    ChainingLimit { limit: usize, context: String },

    #[error("value at '{path}' is not settable")]
    NotSettable { path: String },

    #[error("parent link '{value}' for key '{key}' would create a cycle")]
    CyclicValueParent { key: String, value: String },

    #[error("rule set: {reason}")]
    RuleSet { reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_keys_message() {
        let err = MetaError::TooManyContextKeys {
            key: "k64".into(),
            limit: 64,
        };
        assert_eq!(
            err.to_string(),
            "too many context keys: cannot register 'k64', the limit is 64"
        );
    }

    #[test]
    fn evaluation_message_carries_context() {
        let err = MetaError::Evaluation {
            expression: "a / b".into(),
            message: "division by zero".into(),
            context: "0: a = 1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`a / b`"));
        assert!(msg.contains("division by zero"));
        assert!(msg.contains("0: a = 1"));
    }

    #[test]
    fn parse_error_is_transparent() {
        let err = MetaError::from(ParseError::new("unexpected token"));
        assert_eq!(err.to_string(), "parse error: unexpected token");
    }
}
