// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # After-Connect Hook
//!
//! A hook to execute caller-supplied logic right after a channel is
//! provisioned and before the adapter applies QoS and declares topology.
//! Typical use: declaring exchanges the queue will be bound to, when the
//! consumer is in charge of creating the objects it relies on.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::Channel;

/// Caller-supplied logic invoked with the freshly provisioned channel.
///
/// A hook failure aborts the setup sequence; the channel is released before
/// the error is returned to the caller.
#[async_trait]
pub trait AfterConnect: Send + Sync {
    async fn run(&self, channel: &Channel) -> Result<(), AmqpError>;
}
