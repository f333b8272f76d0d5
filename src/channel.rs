// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Ownership
//!
//! [`AmqpConnection`] is the single long-lived broker connection of a process.
//! It is created explicitly, handed by reference to the topology, publisher and
//! subscriber functions, and closed explicitly. Every channel is derived from
//! it and owned by whoever opened it.

use crate::{
    configs::{RabbitMQConfigs, DEFAULT_PREFETCH_COUNT},
    errors::AmqpError,
};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use tracing::{debug, error};

/// Reply code sent to the broker on a normal close
pub const AMQP_REPLY_SUCCESS: u16 = 200;

/// An established connection to the broker.
pub struct AmqpConnection {
    conn: Connection,
    prefetch_count: u16,
}

impl AmqpConnection {
    /// Connects to the broker described by `cfg`.
    ///
    /// # Example
    /// ```no_run
    /// # async fn run() -> Result<(), peril_pubsub::errors::AmqpError> {
    /// use peril_pubsub::{channel::AmqpConnection, configs::RabbitMQConfigs};
    ///
    /// let cfg = RabbitMQConfigs::load()?;
    /// let conn = AmqpConnection::connect(&cfg).await?;
    /// conn.close().await
    /// # }
    /// ```
    ///
    /// Subscriptions started on this connection use `cfg.prefetch_count`.
    pub async fn connect(cfg: &RabbitMQConfigs) -> Result<AmqpConnection, AmqpError> {
        let mut conn = Self::connect_with_uri(&cfg.uri(), &cfg.connection_name).await?;
        conn.prefetch_count = cfg.prefetch_count.max(1);
        Ok(conn)
    }

    /// Connects to the broker at `uri`, reporting `name` as the connection name.
    ///
    /// Subscriptions use the default prefetch of [`DEFAULT_PREFETCH_COUNT`].
    ///
    /// # Errors
    /// * [`AmqpError::ConnectionError`] - the broker is unreachable or refused the credentials
    pub async fn connect_with_uri(uri: &str, name: &str) -> Result<AmqpConnection, AmqpError> {
        debug!("creating amqp connection...");
        let options =
            ConnectionProperties::default().with_connection_name(LongString::from(name));

        match Connection::connect(uri, options).await {
            Ok(conn) => {
                debug!("amqp connected");
                Ok(AmqpConnection {
                    conn,
                    prefetch_count: DEFAULT_PREFETCH_COUNT,
                })
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
        }
    }

    /// Opens a new channel. The caller owns it exclusively.
    pub async fn open_channel(&self) -> Result<Channel, AmqpError> {
        debug!("creating amqp channel...");
        match self.conn.create_channel().await {
            Ok(c) => {
                debug!(channel = c.id(), "channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }

    /// Prefetch window applied by [`crate::subscriber::subscribe`] on this connection.
    pub fn prefetch_count(&self) -> u16 {
        self.prefetch_count
    }

    /// Returns true while the connection is open.
    pub fn is_connected(&self) -> bool {
        self.conn.status().connected()
    }

    /// Access the inner `lapin::Connection`.
    pub fn inner(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection, which also ends every subscription's delivery stream.
    pub async fn close(self) -> Result<(), AmqpError> {
        debug!("closing amqp connection...");
        match self.conn.close(AMQP_REPLY_SUCCESS, "closing").await {
            Ok(_) => {
                debug!("amqp connection closed");
                Ok(())
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to close the connection");
                Err(AmqpError::ConnectionError)
            }
        }
    }
}
