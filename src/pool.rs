// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # External Channel Pool Capability
//!
//! This module defines the contract an external channel pool must implement for
//! the adapter to borrow channels instead of owning a dedicated connection. The
//! pool owns the underlying connections; the adapter only checks a channel out
//! for the lifetime of one connect cycle and checks it back in on teardown.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::Channel;

/// Capability contract for an external channel pool.
///
/// Implementations manage a shared set of channels across multiple adapter
/// instances. `checkout` hands a live channel to exactly one borrower at a
/// time; `checkin` returns it. Structured errors (pool exhausted, pool closed)
/// are surfaced as [`AmqpError`] values and passed through to the caller
/// verbatim, which is expected to back off and retry.
#[async_trait]
pub trait ChannelPool: Send + Sync {
    /// Checks a channel out of the pool for exclusive use by one adapter.
    async fn checkout(&self) -> Result<Channel, AmqpError>;

    /// Returns a previously checked-out channel to the pool.
    async fn checkin(&self, channel: Channel) -> Result<(), AmqpError>;
}

#[cfg(test)]
mockall::mock! {
    pub ChannelPool {}

    #[async_trait]
    impl ChannelPool for ChannelPool {
        async fn checkout(&self) -> Result<Channel, AmqpError>;
        async fn checkin(&self, channel: Channel) -> Result<(), AmqpError>;
    }
}
