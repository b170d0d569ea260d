// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Source Adapter
//!
//! This module provides the error taxonomy for the adapter. The `AmqpError` enum
//! covers configuration validation, channel provisioning, topology setup, delivery
//! operations, and teardown. Recoverable errors are returned as values so the
//! hosting pipeline can back off and retry; contract violations are marked
//! non-retryable so a caller cannot accidentally retry past a collaborator defect.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Invalid or inconsistent caller-supplied options, detected at init time
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// The bounded connect wait elapsed before the broker answered
    #[error("timed out connecting to the broker")]
    ConnectTimeoutError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// The channel's underlying connection is already gone; expected during
    /// disconnection races, never fatal
    #[error("channel no longer available")]
    ChannelUnavailableError,

    /// Structured error returned by the pool's checkout operation
    #[error("failure to checkout a channel from the pool: {0}")]
    PoolCheckoutError(String),

    /// Structured error returned by the pool's checkin operation
    #[error("failure to checkin a channel into the pool: {0}")]
    PoolCheckinError(String),

    /// The after-connect hook reported a failure
    #[error("after connect hook failed: {0}")]
    HookError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{0}` to exchange `{1}`")]
    BindQueueError(String, String),

    /// Error declaring a consumer on a queue
    #[error("failure to declare consumer on queue `{0}`")]
    ConsumerDeclarationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// Error closing a channel or connection
    #[error("failure to close `{0}`")]
    CloseError(String),

    /// A collaborator (pool or hook) broke its contract; a defect, not a
    /// retryable condition
    #[error("collaborator contract violation: {0}")]
    ContractViolation(String),
}

impl AmqpError {
    /// Whether the hosting pipeline may retry after receiving this error.
    ///
    /// Configuration errors require operator intervention and contract
    /// violations are collaborator defects; everything else is a transient
    /// broker-side condition.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AmqpError::ConfigurationError(_) | AmqpError::ContractViolation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_and_contract_errors_are_not_retryable() {
        assert!(!AmqpError::ConfigurationError("bad queue".to_owned()).is_retryable());
        assert!(!AmqpError::ContractViolation("broken pool".to_owned()).is_retryable());
    }

    #[test]
    fn provisioning_and_delivery_errors_are_retryable() {
        assert!(AmqpError::ConnectionError.is_retryable());
        assert!(AmqpError::ConnectTimeoutError.is_retryable());
        assert!(AmqpError::PoolCheckoutError("exhausted".to_owned()).is_retryable());
        assert!(AmqpError::ChannelUnavailableError.is_retryable());
        assert!(AmqpError::QoSDeclarationError("prefetch".to_owned()).is_retryable());
    }
}
