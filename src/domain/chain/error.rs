//! Chain error types

use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Errors that terminate a chain run
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChainError {
    /// Raised or returned by link code
    #[error("{0}")]
    Failed(String),

    /// Explicit cancellation requested on the execution context
    #[error("Chain cancelled: {0}")]
    Cancelled(String),

    /// Failure carrying an arbitrary JSON payload
    #[error("Chain failed with value: {0}")]
    Value(Value),

    #[error("Chain run ended before the remainder completed")]
    Abandoned,
}

impl ChainError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }
}

impl From<&str> for ChainError {
    fn from(message: &str) -> Self {
        Self::failed(message)
    }
}

impl From<String> for ChainError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<anyhow::Error> for ChainError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(format!("{:#}", error))
    }
}

/// Runtime category of a value offered as a chain link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
    Undefined,
    Function,
}

impl LinkType {
    /// Categorize a dynamic JSON value
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Boolean,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::Null => Self::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while registering links
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Unsupported chain-link type. Only functions are allowed. Input value was {0}")]
    UnsupportedLinkType(LinkType),
}

impl RegistrationError {
    pub fn unsupported(link_type: LinkType) -> Self {
        Self::UnsupportedLinkType(link_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = ChainError::failed("B failed!");
        assert_eq!(err.to_string(), "B failed!");

        let err = ChainError::cancelled("shutdown");
        assert_eq!(err.to_string(), "Chain cancelled: shutdown");

        let err = ChainError::value(json!("B failed!"));
        assert_eq!(err.to_string(), "Chain failed with value: \"B failed!\"");
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(ChainError::from("boom"), ChainError::failed("boom"));
        assert_ne!(ChainError::failed("boom"), ChainError::cancelled("boom"));
    }

    #[test]
    fn test_anyhow_conversion_keeps_context() {
        let err: ChainError = anyhow::anyhow!("disk full").context("writing report").into();
        assert_eq!(err, ChainError::failed("writing report: disk full"));
    }

    #[test]
    fn test_link_type_of_value() {
        let cases = [
            (json!("foo"), "string"),
            (json!(123), "number"),
            (json!(true), "boolean"),
            (json!(null), "null"),
            (json!({}), "object"),
            (json!([]), "array"),
        ];

        for (value, expected) in cases {
            assert_eq!(LinkType::of_value(&value).as_str(), expected);
        }
    }

    #[test]
    fn test_registration_error_message() {
        let err = RegistrationError::unsupported(LinkType::Undefined);
        assert_eq!(
            err.to_string(),
            "Unsupported chain-link type. Only functions are allowed. Input value was undefined"
        );
    }
}
