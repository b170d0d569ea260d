// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Operations
//!
//! Consuming, cancelling, acknowledging and rejecting deliveries on a
//! provisioned channel. Ack and reject tolerate the channel having vanished
//! underneath them: during a disconnect the broker client races with in-flight
//! acknowledgments, so a dead channel yields a soft "no longer available"
//! error instead of a failure the pipeline would treat as fatal.

use crate::{
    channel::ChannelHandle,
    errors::AmqpError,
    options::Configuration,
    otel,
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicRejectOptions},
    types::FieldTable,
    Channel, Consumer,
};
use opentelemetry::KeyValue;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Starts consuming from the effective queue and returns the consumer.
///
/// The consumer tag is generated from the instance name; it is available via
/// `Consumer::tag` and is the handle for a later [`cancel`]. A broker
/// rejection here is a loud failure: consuming is a setup-time operation that
/// is expected to succeed whenever the channel is healthy.
pub async fn consume(handle: &ChannelHandle, cfg: &Configuration) -> Result<Consumer, AmqpError> {
    let tag = format!("{}-{}", cfg.name(), Uuid::new_v4());

    debug!("starting consumer: {} on queue: {}", tag, handle.queue());

    match handle
        .channel()
        .basic_consume(
            handle.queue(),
            &tag,
            BasicConsumeOptions {
                no_local: cfg.consume.no_local,
                no_ack: cfg.consume.no_ack,
                exclusive: cfg.consume.exclusive,
                nowait: cfg.consume.nowait,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            Err(AmqpError::ConsumerDeclarationError(
                handle.queue().to_owned(),
            ))
        }
        Ok(consumer) => {
            debug!("consumer started");
            Ok(consumer)
        }
    }
}

/// Stops delivery for the given consumer tag.
pub async fn cancel(channel: &Channel, consumer_tag: &str) -> Result<(), AmqpError> {
    debug!("cancelling consumer: {}", consumer_tag);

    match channel
        .basic_cancel(consumer_tag, BasicCancelOptions::default())
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to cancel the consumer");
            Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()))
        }
        _ => Ok(()),
    }
}

/// Acknowledges a single delivery.
///
/// Returns the soft [`AmqpError::ChannelUnavailableError`] when the channel is
/// already gone; this is an expected race during disconnection.
pub async fn ack(channel: &Channel, delivery_tag: u64) -> Result<(), AmqpError> {
    let mut span = otel::start_span("amqp ack", vec![delivery_tag_attribute(delivery_tag)]);

    if !channel.status().connected() {
        warn!("ack on a channel that is no longer available");
        otel::end_error(&mut span, &AmqpError::ChannelUnavailableError);
        return Err(AmqpError::ChannelUnavailableError);
    }

    match channel
        .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
        .await
    {
        Ok(()) => {
            otel::end_ok(span);
            Ok(())
        }
        Err(err) => {
            let err = if channel.status().connected() {
                error!(error = err.to_string(), "error to ack message");
                AmqpError::AckMessageError
            } else {
                warn!(error = err.to_string(), "channel vanished during ack");
                AmqpError::ChannelUnavailableError
            };
            otel::end_error(&mut span, &err);
            Err(err)
        }
    }
}

/// Rejects a single delivery, optionally requeueing it.
///
/// Same dead-channel tolerance as [`ack`].
pub async fn reject(channel: &Channel, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
    let mut span = otel::start_span(
        "amqp reject",
        vec![
            delivery_tag_attribute(delivery_tag),
            KeyValue::new("messaging.requeue", requeue),
        ],
    );

    if !channel.status().connected() {
        warn!("reject on a channel that is no longer available");
        otel::end_error(&mut span, &AmqpError::ChannelUnavailableError);
        return Err(AmqpError::ChannelUnavailableError);
    }

    match channel
        .basic_reject(delivery_tag, BasicRejectOptions { requeue })
        .await
    {
        Ok(()) => {
            otel::end_ok(span);
            Ok(())
        }
        Err(err) => {
            let err = if channel.status().connected() {
                error!(error = err.to_string(), "error to reject message");
                AmqpError::RejectMessageError
            } else {
                warn!(error = err.to_string(), "channel vanished during reject");
                AmqpError::ChannelUnavailableError
            };
            otel::end_error(&mut span, &err);
            Err(err)
        }
    }
}

// Delivery tags are u64 and span attributes are i64 or strings; rendering as
// a decimal string keeps large tags faithful.
fn delivery_tag_attribute(delivery_tag: u64) -> KeyValue {
    KeyValue::new("messaging.delivery_tag", delivery_tag.to_string())
}

/// Extracts the configured metadata fields from a delivery into a string map.
///
/// Fields whose value is absent on the delivery are skipped; unknown field
/// names are ignored with a warning so a configuration typo surfaces in the
/// logs instead of silently producing empty metadata.
pub fn delivery_metadata(delivery: &Delivery, cfg: &Configuration) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    for field in &cfg.metadata {
        let value = match field.as_str() {
            "exchange" => Some(delivery.exchange.to_string()),
            "routing_key" => Some(delivery.routing_key.to_string()),
            "delivery_tag" => Some(delivery.delivery_tag.to_string()),
            "redelivered" => Some(delivery.redelivered.to_string()),
            "content_type" => delivery
                .properties
                .content_type()
                .as_ref()
                .map(ToString::to_string),
            "content_encoding" => delivery
                .properties
                .content_encoding()
                .as_ref()
                .map(ToString::to_string),
            "correlation_id" => delivery
                .properties
                .correlation_id()
                .as_ref()
                .map(ToString::to_string),
            "message_id" => delivery
                .properties
                .message_id()
                .as_ref()
                .map(ToString::to_string),
            "app_id" => delivery
                .properties
                .app_id()
                .as_ref()
                .map(ToString::to_string),
            "reply_to" => delivery
                .properties
                .reply_to()
                .as_ref()
                .map(ToString::to_string),
            "expiration" => delivery
                .properties
                .expiration()
                .as_ref()
                .map(ToString::to_string),
            "kind" => delivery.properties.kind().as_ref().map(ToString::to_string),
            "priority" => delivery
                .properties
                .priority()
                .as_ref()
                .map(ToString::to_string),
            "timestamp" => delivery
                .properties
                .timestamp()
                .as_ref()
                .map(ToString::to_string),
            unknown => {
                warn!("unknown metadata field: {}", unknown);
                None
            }
        };

        if let Some(value) = value {
            metadata.insert(field.clone(), value);
        }
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Value;

    #[test]
    fn delivery_tag_attribute_is_not_truncated() {
        let attribute = delivery_tag_attribute(u64::MAX);

        assert_eq!(
            attribute.value,
            Value::String(u64::MAX.to_string().into())
        );
    }
}
