use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use consent_core::LinkStore;
use consent_orders::{HttpOrderTransport, OrderSubmitter, RetryPolicy};

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_TOKEN_MAX_AGE_SECONDS: i64 = 604_800;
const DEFAULT_RESUBMIT_BATCH_LIMIT: i64 = 50;

#[derive(Clone, Debug)]
pub struct OrderApiConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl OrderApiConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }

    pub fn submitter(&self, store: Arc<dyn LinkStore>) -> Result<OrderSubmitter> {
        let transport = HttpOrderTransport::new(&self.url, self.token.clone(), self.timeout)
            .context("failed to build order API client")?;
        Ok(OrderSubmitter::new(
            store,
            Arc::new(transport),
            self.retry_policy(),
        ))
    }
}

#[derive(Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub secret_key: String,
    pub http_addr: String,
    pub base_url: String,
    pub token_max_age: chrono::Duration,
    /// `None` when `ORDER_API_URL` is unset; agreements are then stored
    /// but never forwarded.
    pub order_api: Option<OrderApiConfig>,
    pub resubmit_batch_limit: i64,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("http_addr", &self.http_addr)
            .field("base_url", &self.base_url)
            .field("token_max_age", &self.token_max_age)
            .field("order_api", &self.order_api.as_ref().map(|api| &api.url))
            .field("resubmit_batch_limit", &self.resubmit_batch_limit)
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    pub fn from_env(default_http_addr: &str) -> Result<Self> {
        Self::from_lookup(default_http_addr, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(default_http_addr: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;
        let secret_key = var("SECRET_KEY").context("SECRET_KEY is required")?;
        let http_addr = var("HTTP_ADDR").unwrap_or_else(|| default_http_addr.to_string());
        let base_url = var("BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let max_age_seconds: i64 = parse_or(
            "TOKEN_MAX_AGE_SECONDS",
            var("TOKEN_MAX_AGE_SECONDS"),
            DEFAULT_TOKEN_MAX_AGE_SECONDS,
        )?;
        if max_age_seconds <= 0 {
            bail!("TOKEN_MAX_AGE_SECONDS must be positive");
        }

        let order_api = match var("ORDER_API_URL") {
            Some(url) => Some(OrderApiConfig {
                url,
                token: var("ORDER_API_TOKEN"),
                timeout: Duration::from_secs(parse_or(
                    "ORDER_API_TIMEOUT_SECONDS",
                    var("ORDER_API_TIMEOUT_SECONDS"),
                    10,
                )?),
                max_attempts: parse_or(
                    "ORDER_API_MAX_ATTEMPTS",
                    var("ORDER_API_MAX_ATTEMPTS"),
                    3,
                )?,
                backoff: Duration::from_millis(parse_or(
                    "ORDER_API_BACKOFF_MS",
                    var("ORDER_API_BACKOFF_MS"),
                    500,
                )?),
            }),
            None => None,
        };

        let resubmit_batch_limit = parse_or(
            "RESUBMIT_BATCH_LIMIT",
            var("RESUBMIT_BATCH_LIMIT"),
            DEFAULT_RESUBMIT_BATCH_LIMIT,
        )?;

        Ok(Self {
            database_url,
            secret_key,
            http_addr,
            base_url,
            token_max_age: chrono::Duration::seconds(max_age_seconds),
            order_api,
            resubmit_batch_limit,
        })
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("{key} is not valid ({raw}): {err}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = ServiceConfig::from_lookup(
            "0.0.0.0:8080",
            lookup(&[("DATABASE_URL", "postgres://localhost/consent"), ("SECRET_KEY", "s3cret")]),
        )
        .unwrap();

        assert_eq!(config.http_addr, "0.0.0.0:8080");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.token_max_age, chrono::Duration::days(7));
        assert!(config.order_api.is_none());
        assert_eq!(config.resubmit_batch_limit, 50);
    }

    #[test]
    fn order_api_settings_are_parsed() {
        let config = ServiceConfig::from_lookup(
            "0.0.0.0:8080",
            lookup(&[
                ("DATABASE_URL", "postgres://localhost/consent"),
                ("SECRET_KEY", "s3cret"),
                ("ORDER_API_URL", "https://orders.example.com/api/orders"),
                ("ORDER_API_TOKEN", "bearer-1"),
                ("ORDER_API_TIMEOUT_SECONDS", "4"),
                ("ORDER_API_MAX_ATTEMPTS", "5"),
                ("ORDER_API_BACKOFF_MS", "250"),
            ]),
        )
        .unwrap();

        let api = config.order_api.unwrap();
        assert_eq!(api.token.as_deref(), Some("bearer-1"));
        assert_eq!(api.timeout, Duration::from_secs(4));
        let policy = api.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_before(2), Duration::from_millis(250));
    }

    #[test]
    fn missing_or_blank_secret_is_rejected() {
        let err = ServiceConfig::from_lookup(
            "0.0.0.0:8080",
            lookup(&[("DATABASE_URL", "postgres://localhost/consent"), ("SECRET_KEY", "  ")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SECRET_KEY"));

        assert!(ServiceConfig::from_lookup("0.0.0.0:8080", lookup(&[("SECRET_KEY", "x")])).is_err());
    }

    #[test]
    fn malformed_numbers_name_the_variable() {
        let err = ServiceConfig::from_lookup(
            "0.0.0.0:8080",
            lookup(&[
                ("DATABASE_URL", "postgres://localhost/consent"),
                ("SECRET_KEY", "s3cret"),
                ("TOKEN_MAX_AGE_SECONDS", "a week"),
            ]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("TOKEN_MAX_AGE_SECONDS"));
    }
}
