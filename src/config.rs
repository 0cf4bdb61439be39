use {
    crate::adapters::khipu::client::DEFAULT_API_BASE,
    std::{env, net::SocketAddr, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub bind_addr: SocketAddr,
    pub public_base_url: String,
    pub khipu_api_base: String,
    pub khipu_api_key: String,
    pub khipu_webhook_secret: Option<String>,
    pub provider_timeout: Duration,
    pub payment_ttl: chrono::Duration,
    /// Pending sweeper interval; `None` disables the sweeper.
    pub sweep_every: Option<Duration>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| get(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let bind_addr = var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_addr: SocketAddr = bind_addr.parse().map_err(|_| ConfigError::Invalid {
            name: "BIND_ADDR",
            value: bind_addr.clone(),
        })?;

        let public_base_url = var("PUBLIC_BASE_URL").unwrap_or_else(|| format!("http://{bind_addr}"));

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", var("DB_MAX_CONNECTIONS"), 20)?,
            bind_addr,
            public_base_url,
            khipu_api_base: var("KHIPU_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            khipu_api_key: required("KHIPU_API_KEY")?,
            khipu_webhook_secret: var("KHIPU_WEBHOOK_SECRET"),
            provider_timeout: Duration::from_secs(parse_or(
                "PROVIDER_TIMEOUT_SECS",
                var("PROVIDER_TIMEOUT_SECS"),
                10,
            )?),
            payment_ttl: chrono::Duration::minutes(parse_or(
                "PAYMENT_TTL_MINUTES",
                var("PAYMENT_TTL_MINUTES"),
                60,
            )?),
            sweep_every: var("RECONCILE_SWEEP_SECS")
                .map(|v| parse_or::<u64>("RECONCILE_SWEEP_SECS", Some(v), 0))
                .transpose()?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/raffle"),
            ("KHIPU_API_KEY", "key"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.provider_timeout, Duration::from_secs(10));
        assert_eq!(cfg.payment_ttl, chrono::Duration::minutes(60));
        assert_eq!(cfg.db_max_connections, 20);
        assert_eq!(cfg.khipu_api_base, DEFAULT_API_BASE);
        assert!(cfg.khipu_webhook_secret.is_none());
        assert!(cfg.sweep_every.is_none());
    }

    #[test]
    fn missing_api_key_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("KHIPU_API_KEY")));
    }

    #[test]
    fn invalid_number_is_reported() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("KHIPU_API_KEY", "key"),
            ("PROVIDER_TIMEOUT_SECS", "ten"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PROVIDER_TIMEOUT_SECS", .. }));
    }

    #[test]
    fn sweeper_enabled_by_interval() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("KHIPU_API_KEY", "key"),
            ("RECONCILE_SWEEP_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(cfg.sweep_every, Some(Duration::from_secs(120)));
    }
}
