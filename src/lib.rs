// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Source Adapter
//!
//! Lets a message-processing pipeline consume from a RabbitMQ queue by
//! managing the connection/channel lifecycle, queue topology setup, message
//! acknowledgment, and option validation. Channels are provisioned either
//! over a dedicated connection the adapter owns or borrowed from an external
//! pool; every partial failure during setup rolls back exactly what was
//! acquired. The retry/backoff scheduling across reconnect attempts belongs
//! to the hosting pipeline, which re-validates options and calls
//! [`channel::setup_channel`] once per attempt.

mod otel;
mod topology;

pub mod channel;
pub mod consumer;
pub mod errors;
pub mod hook;
pub mod options;
pub mod pool;
