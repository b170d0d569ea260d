// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Setup
//!
//! The sequential setup pipeline run over a freshly provisioned channel:
//! after-connect hook, QoS, optional queue declare, bindings. The steps run
//! strictly in that order because later steps depend on earlier outcomes; in
//! particular, binding uses the possibly server-assigned queue name returned
//! by the declare step. The pipeline short-circuits on the first failure and
//! leaves rollback to the caller so the original error reason is preserved.

use crate::{errors::AmqpError, options::Configuration};
use lapin::{
    options::{BasicQosOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    Channel,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Runs the setup pipeline and returns the effective queue name.
pub(crate) async fn install(cfg: &Configuration, channel: &Channel) -> Result<String, AmqpError> {
    run_after_connect(cfg, channel).await?;
    apply_qos(cfg, channel).await?;
    let queue = declare_queue(cfg, channel).await?;
    bind_queue(cfg, channel, &queue).await?;

    Ok(queue)
}

async fn run_after_connect(cfg: &Configuration, channel: &Channel) -> Result<(), AmqpError> {
    let Some(hook) = &cfg.after_connect else {
        return Ok(());
    };

    debug!("running the after connect hook...");
    match hook.run(channel).await {
        Ok(()) => {
            debug!("after connect hook succeeded");
            Ok(())
        }
        Err(err) => {
            error!(error = err.to_string(), "after connect hook failed");
            Err(err)
        }
    }
}

async fn apply_qos(cfg: &Configuration, channel: &Channel) -> Result<(), AmqpError> {
    debug!("configuring qos: prefetch_count {}", cfg.qos.prefetch_count);

    match channel
        .basic_qos(
            cfg.qos.prefetch_count,
            BasicQosOptions {
                global: cfg.qos.global,
            },
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to configure qos");
            Err(AmqpError::QoSDeclarationError(format!(
                "prefetch_count={}",
                cfg.qos.prefetch_count
            )))
        }
        _ => Ok(()),
    }
}

/// Declares the queue when declare options are present, otherwise passes the
/// configured name through unchanged. The broker may assign a different name
/// than requested; the assigned name is what subsequent steps must use.
async fn declare_queue(cfg: &Configuration, channel: &Channel) -> Result<String, AmqpError> {
    let Some(declare) = &cfg.declare else {
        return Ok(cfg.queue.clone());
    };

    debug!("declaring queue: {}", cfg.queue);

    let mut queue_args = BTreeMap::new();

    if let Some(ttl) = declare.ttl {
        queue_args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(ttl)),
        );
    }

    if let Some(max) = declare.max_length {
        queue_args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH),
            AMQPValue::LongInt(LongInt::from(max)),
        );
    }

    if let Some(max_bytes) = declare.max_length_bytes {
        queue_args.insert(
            ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
            AMQPValue::LongInt(LongInt::from(max_bytes)),
        );
    }

    match channel
        .queue_declare(
            &cfg.queue,
            QueueDeclareOptions {
                passive: declare.passive,
                durable: declare.durable,
                exclusive: declare.exclusive,
                auto_delete: declare.auto_delete,
                nowait: declare.nowait,
            },
            FieldTable::from(queue_args),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to declare the queue");
            Err(AmqpError::DeclareQueueError(cfg.queue.clone()))
        }
        Ok(queue) => {
            let name = queue.name().as_str().to_owned();
            debug!("queue: {} was declared", name);
            Ok(name)
        }
    }
}

async fn bind_queue(cfg: &Configuration, channel: &Channel, queue: &str) -> Result<(), AmqpError> {
    for binding in &cfg.bindings {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, binding.exchange, binding.routing_key
        );

        match channel
            .queue_bind(
                queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                binding_arguments(&binding.arguments),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");

                return Err(AmqpError::BindQueueError(
                    queue.to_owned(),
                    binding.exchange.clone(),
                ));
            }
            _ => debug!("queue was bound to: {}", binding.exchange),
        }
    }

    Ok(())
}

fn binding_arguments(arguments: &BTreeMap<String, String>) -> FieldTable {
    let mut args = BTreeMap::new();

    for (key, value) in arguments {
        args.insert(
            ShortString::from(key.clone()),
            AMQPValue::LongString(LongString::from(value.clone())),
        );
    }

    FieldTable::from(args)
}
