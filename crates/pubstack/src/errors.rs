// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the pubstack forwarder.
//!
//! Only [`Creation`] ever reaches a caller: every other error is reported to a
//! [`crate::observer::FailureObserver`] and the affected event or batch is
//! dropped.

/// Malformed construction parameters.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("scope id must not be empty")]
    MissingScope,

    #[error("invalid endpoint url '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid size for {field}: '{value}'")]
    InvalidSize { field: &'static str, value: String },

    #[error("{0} must be greater than 0")]
    ZeroValue(&'static str),
}

/// Failure to obtain a configuration document from the remote source.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("received status {0} instead of 200")]
    Status(u16),

    #[error("malformed configuration document: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failure to deliver a batch to the intake.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("received status {0} instead of 200")]
    Status(u16),
}

/// Module construction failure; no background task is running when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("failed to reach endpoint: {0}")]
    Unreachable(FetchError),

    #[error("failed to fetch initial configuration: {0}")]
    Bootstrap(FetchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidDuration {
            field: "buffers.timeout",
            value: "15 minutes".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid duration for buffers.timeout: '15 minutes'"
        );

        let error = Creation::Unreachable(FetchError::Status(503));
        assert_eq!(
            error.to_string(),
            "failed to reach endpoint: received status 503 instead of 200"
        );
    }

    #[test]
    fn test_config_error_converts_into_creation() {
        let error: Creation = ConfigError::MissingScope.into();
        assert!(matches!(error, Creation::Config(ConfigError::MissingScope)));
    }
}
