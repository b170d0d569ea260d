// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Provisioning and Teardown
//!
//! This module obtains a usable channel for one connect cycle and releases it
//! again. Two provisioning strategies exist, selected by the validated
//! connection specification: opening a dedicated connection the adapter owns,
//! or checking a channel out of an external pool that keeps ownership of the
//! underlying connection.
//!
//! Every partial failure during setup rolls back what was acquired: a failed
//! channel-open closes the fresh connection, a failed topology step releases
//! the channel through the strategy that produced it, and a connect attempt
//! that outlives its deadline is aborted so a late-arriving connection cannot
//! leak past a caller that already gave up.

use crate::{
    errors::AmqpError,
    options::{Configuration, ConnectionSpec},
    otel, topology,
};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use opentelemetry::KeyValue;
use std::time::Duration;
use tracing::{debug, error, warn};

/// A provisioned channel together with its ownership information.
///
/// When the adapter opened the connection itself, the handle owns it and both
/// are closed together at release time. When the channel came from a pool, the
/// connection stays with the pool and the handle only borrows the channel.
#[derive(Debug)]
pub struct ChannelHandle {
    pub(crate) channel: Channel,
    pub(crate) connection: Option<Connection>,
    pub(crate) queue: String,
}

impl ChannelHandle {
    /// The provisioned channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The effective queue name, which is the broker-assigned one when the
    /// configured name was empty and the queue was declared.
    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Provisions a channel and runs the topology setup pipeline on it.
///
/// On any topology failure the channel is released through the strategy that
/// produced it before the original error is returned; the caller is expected
/// to back off and call again with a freshly validated configuration.
pub async fn setup_channel(cfg: &Configuration) -> Result<ChannelHandle, AmqpError> {
    let mut handle = provision(cfg).await?;

    match topology::install(cfg, &handle.channel).await {
        Ok(queue) => {
            handle.queue = queue;
            Ok(handle)
        }
        Err(err) => {
            if let Err(release_err) = release_channel(cfg, &handle).await {
                warn!(
                    error = release_err.to_string(),
                    "failure to release the channel after a setup error"
                );
            }
            Err(err)
        }
    }
}

async fn provision(cfg: &Configuration) -> Result<ChannelHandle, AmqpError> {
    match &cfg.connection {
        ConnectionSpec::Pool(pool) => {
            debug!("checking out a channel from the pool...");

            let channel = pool.checkout().await?;

            if !channel.status().connected() {
                error!("the pool handed out a channel that is not connected");
                if let Err(err) = channel.close(200, "broken pool channel").await {
                    warn!(error = err.to_string(), "failure to close the broken channel");
                }
                return Err(AmqpError::ContractViolation(
                    "pool checkout returned a channel that is not connected".to_owned(),
                ));
            }

            debug!("channel checked out");
            Ok(ChannelHandle {
                channel,
                connection: None,
                queue: cfg.queue.clone(),
            })
        }
        ConnectionSpec::Uri(uri) => open_direct(cfg, uri.clone()).await,
        ConnectionSpec::Params(params) => open_direct(cfg, params.to_uri()).await,
    }
}

async fn open_direct(cfg: &Configuration, uri: String) -> Result<ChannelHandle, AmqpError> {
    let mut span = otel::start_span(
        "amqp connection open",
        vec![KeyValue::new("messaging.connection.name", cfg.name().to_owned())],
    );

    debug!("creating amqp connection...");
    let properties = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.name().to_owned()));

    let connection = match connect_with_deadline(uri, properties, cfg.connect_timeout).await {
        Ok(conn) => conn,
        Err(err) => {
            otel::end_error(&mut span, &err);
            return Err(err);
        }
    };
    debug!("amqp connected");

    // Monitor for abnormal termination; the broker dropping the connection
    // must not go unnoticed between setup and the next delivery operation.
    let name = cfg.name().to_owned();
    connection.on_error(move |err| {
        error!(
            error = err.to_string(),
            name = name.as_str(),
            "amqp connection failed"
        );
    });

    debug!("creating amqp channel...");
    match connection.create_channel().await {
        Ok(channel) => {
            debug!("channel created");
            otel::end_ok(span);
            Ok(ChannelHandle {
                channel,
                connection: Some(connection),
                queue: cfg.queue.clone(),
            })
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            otel::end_error(&mut span, &AmqpError::ChannelError);

            if let Err(close_err) = connection.close(200, "channel open failed").await {
                warn!(
                    error = close_err.to_string(),
                    "failure to close the connection after a channel error"
                );
            }
            Err(AmqpError::ChannelError)
        }
    }
}

/// Opens a connection with a bounded wait.
///
/// The connect future runs in its own task so an elapsed deadline can abort
/// the in-flight attempt. A connection that completed in the window between
/// the deadline and the abort is closed, never returned: the caller has given
/// up and may already be retrying, so handing it back would leak a duplicate.
async fn connect_with_deadline(
    uri: String,
    properties: ConnectionProperties,
    wait: Duration,
) -> Result<Connection, AmqpError> {
    let mut attempt = tokio::spawn(async move { Connection::connect(&uri, properties).await });

    match tokio::time::timeout(wait, &mut attempt).await {
        Ok(Ok(Ok(connection))) => Ok(connection),
        Ok(Ok(Err(err))) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
        Ok(Err(join_err)) => {
            error!(error = join_err.to_string(), "connect task failed");
            Err(AmqpError::ConnectionError)
        }
        Err(_) => {
            attempt.abort();

            if let Ok(Ok(connection)) = attempt.await {
                if let Err(err) = connection.close(200, "connect timed out").await {
                    warn!(
                        error = err.to_string(),
                        "failure to close the late connection"
                    );
                }
            }

            error!("timed out connecting to the broker");
            Err(AmqpError::ConnectTimeoutError)
        }
    }
}

/// Releases a channel back to its origin.
///
/// The liveness check is scoped per resource: a broker rejection during setup
/// closes only the channel while the connection (or the pool's slot) stays
/// alive, so a dead channel skips its local close but never the checkin or
/// the owning connection's close. Pool-backed channels are always checked
/// back in; a checkin error still closes a live channel locally before it
/// propagates, since the pool may not have cleaned it up. Calling this again
/// once everything is gone returns success without action.
pub async fn release_channel(cfg: &Configuration, handle: &ChannelHandle) -> Result<(), AmqpError> {
    match &cfg.connection {
        ConnectionSpec::Pool(pool) => {
            debug!("checking the channel back into the pool...");

            match pool.checkin(handle.channel.clone()).await {
                Ok(()) => {
                    debug!("channel checked in");
                    Ok(())
                }
                Err(err) => {
                    error!(error = err.to_string(), "failure to checkin the channel");

                    if handle.channel.status().connected() {
                        if let Err(close_err) = handle.channel.close(200, "checkin failed").await {
                            warn!(
                                error = close_err.to_string(),
                                "failure to close the channel after a checkin error"
                            );
                        }
                    }
                    Err(err)
                }
            }
        }
        _ => {
            if handle.channel.status().connected() {
                debug!("closing the channel...");
                if let Err(err) = handle.channel.close(200, "released").await {
                    warn!(error = err.to_string(), "failure to close the channel");
                }
            } else {
                debug!("channel already gone");
            }

            if let Some(connection) = &handle.connection {
                if connection.status().connected() {
                    debug!("closing the owning connection...");
                    if let Err(err) = connection.close(200, "released").await {
                        error!(error = err.to_string(), "failure to close the connection");
                        return Err(AmqpError::CloseError("connection".to_owned()));
                    }
                }
            }

            Ok(())
        }
    }
}

/// Closes the connection at top-level shutdown.
///
/// Same liveness check as [`release_channel`]: calling this on an
/// already-closed resource returns success without action.
pub async fn close_connection(cfg: &Configuration, handle: &ChannelHandle) -> Result<(), AmqpError> {
    release_channel(cfg, handle).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        options::{init, SourceOptions},
        pool::MockChannelPool,
    };
    use std::sync::Arc;

    #[tokio::test]
    async fn pool_checkout_error_passes_through_and_never_checks_in() {
        let mut pool = MockChannelPool::new();
        pool.expect_checkout()
            .times(1)
            .returning(|| Err(AmqpError::PoolCheckoutError("pool exhausted".to_owned())));
        pool.expect_checkin().never();

        let cfg = init(SourceOptions::new("orders").pool(Arc::new(pool))).unwrap();

        let err = setup_channel(&cfg).await.unwrap_err();

        assert_eq!(
            err,
            AmqpError::PoolCheckoutError("pool exhausted".to_owned())
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn pool_checkout_errors_keep_their_original_reason() {
        let mut pool = MockChannelPool::new();
        pool.expect_checkout()
            .times(1)
            .returning(|| Err(AmqpError::PoolCheckoutError("pool closed".to_owned())));
        pool.expect_checkin().never();

        let cfg = init(SourceOptions::new("orders").pool(Arc::new(pool))).unwrap();

        match setup_channel(&cfg).await {
            Err(AmqpError::PoolCheckoutError(reason)) => assert_eq!(reason, "pool closed"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn connect_deadline_aborts_the_in_flight_attempt() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts the socket but never answers the protocol header, so the
        // attempt can only end through the deadline.
        let server = tokio::spawn(async move {
            let socket = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let err = connect_with_deadline(
            format!("amqp://guest:guest@{addr}"),
            ConnectionProperties::default(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

        assert_eq!(err, AmqpError::ConnectTimeoutError);
        server.abort();
    }
}
