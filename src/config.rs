//! Environment configuration

use std::{env, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable '{0}'")]
    Missing(&'static str),
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub store_name: String,
    pub http_timeout: Duration,
    pub shipping: ShippingConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone)]
pub struct ShippingConfig {
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub booking_timeout: Duration,
    pub webhook_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;
        let config = Self {
            port: parse_var("PORT", 8083)?,
            database_url,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: optional("NATS_URL"),
            store_name: optional("STORE_NAME").unwrap_or_else(|| "Animart".to_string()),
            http_timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", 10)?),
            shipping: ShippingConfig {
                api_url: optional("SHIPPING_API_URL"),
                api_token: optional("SHIPPING_API_TOKEN"),
                booking_timeout: Duration::from_secs(parse_var("SHIPPING_TIMEOUT_SECS", 15)?),
                webhook_token: optional("SHIPPING_WEBHOOK_TOKEN"),
            },
            email: EmailConfig {
                api_url: optional("EMAIL_API_URL").unwrap_or_else(|| "https://api.resend.com".to_string()),
                api_key: optional("EMAIL_API_KEY"),
                from: optional("EMAIL_FROM").unwrap_or_else(|| "Animart <orders@animart.in>".to_string()),
            },
        };
        tracing::info!(port = config.port, nats = config.nats_url.is_some(), shipping = config.shipping.api_url.is_some(), email = config.email.api_key.is_some(), "configuration loaded");
        Ok(config)
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid { name, message: e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_and_invalid() {
        assert_eq!(parse_var::<u16>("ANIMART_TEST_UNSET_PORT", 8083).unwrap(), 8083);
        env::set_var("ANIMART_TEST_BAD_TIMEOUT", "soon");
        let err = parse_var::<u64>("ANIMART_TEST_BAD_TIMEOUT", 15).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ANIMART_TEST_BAD_TIMEOUT", .. }));
        env::remove_var("ANIMART_TEST_BAD_TIMEOUT");
    }
}
