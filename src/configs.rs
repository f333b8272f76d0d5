// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Connection settings are read from `RABBITMQ_*` environment variables
//! (an optional `.env` file is loaded first). Any value that is not set falls
//! back to the defaults of a local development broker.

use crate::errors::AmqpError;
use config::{Config, Environment};
use serde::Deserialize;
use tracing::error;

/// Prefix shared by every environment variable read by [`RabbitMQConfigs::load`]
pub const ENV_PREFIX: &str = "RABBITMQ";
/// Prefetch window used when nothing else is configured
pub const DEFAULT_PREFETCH_COUNT: u16 = 10;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5672;
const DEFAULT_USER: &str = "guest";
const DEFAULT_PASSWORD: &str = "guest";
const DEFAULT_CONNECTION_NAME: &str = "peril";

/// Settings needed to reach the broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Empty means the broker's default vhost.
    pub vhost: String,
    /// Name reported to the broker for this connection.
    pub connection_name: String,
    /// Full connection string. When present it replaces the individual parts.
    pub url: Option<String>,
    pub prefetch_count: u16,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_owned(),
            password: DEFAULT_PASSWORD.to_owned(),
            vhost: String::new(),
            connection_name: DEFAULT_CONNECTION_NAME.to_owned(),
            url: None,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
        }
    }
}

impl RabbitMQConfigs {
    /// Loads the configs from the environment, merged over the defaults.
    ///
    /// Recognized variables: `RABBITMQ_HOST`, `RABBITMQ_PORT`, `RABBITMQ_USER`,
    /// `RABBITMQ_PASSWORD`, `RABBITMQ_VHOST`, `RABBITMQ_CONNECTION_NAME`,
    /// `RABBITMQ_URL` and `RABBITMQ_PREFETCH_COUNT`.
    pub fn load() -> Result<RabbitMQConfigs, AmqpError> {
        dotenvy::dotenv().ok();

        let defaults = RabbitMQConfigs::default();

        let cfg = Config::builder()
            .set_default("host", defaults.host)
            .and_then(|b| b.set_default("port", i64::from(defaults.port)))
            .and_then(|b| b.set_default("user", defaults.user))
            .and_then(|b| b.set_default("password", defaults.password))
            .and_then(|b| b.set_default("vhost", defaults.vhost))
            .and_then(|b| b.set_default("connection_name", defaults.connection_name))
            .and_then(|b| b.set_default("prefetch_count", i64::from(defaults.prefetch_count)))
            .map_err(|err| {
                error!(error = err.to_string(), "failure to set config defaults");
                AmqpError::ConfigError(err.to_string())
            })?
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build();

        match cfg.and_then(|c| c.try_deserialize::<RabbitMQConfigs>()) {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to load rabbitmq configs");
                Err(AmqpError::ConfigError(err.to_string()))
            }
        }
    }

    /// Builds the AMQP connection string.
    pub fn uri(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }

        let vhost = match self.vhost.as_str() {
            "/" => "%2f",
            other => other,
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        )
    }
}
