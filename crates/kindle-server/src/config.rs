use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use kindle_engine::EngineConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me",
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys fall back to defaults; set but
    /// unparseable keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("KINDLE_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("KINDLE_JWT_SECRET is unset or still a placeholder; it must match the identity provider's signing secret");
        }

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            message_allotment: parse(&lookup, "KINDLE_MESSAGE_ALLOTMENT", defaults.message_allotment)?,
            daily_likes: parse(&lookup, "KINDLE_DAILY_LIKES", defaults.daily_likes)?,
            daily_superlikes: parse(&lookup, "KINDLE_DAILY_SUPERLIKES", defaults.daily_superlikes)?,
            retry_attempts: parse(&lookup, "KINDLE_RETRY_ATTEMPTS", defaults.retry_attempts)?,
            retry_base: Duration::from_millis(parse(
                &lookup,
                "KINDLE_RETRY_BASE_MS",
                defaults.retry_base.as_millis() as u64,
            )?),
            conversion_window: Duration::from_secs(parse(
                &lookup,
                "KINDLE_CONVERSION_WINDOW_SECS",
                defaults.conversion_window.as_secs(),
            )?),
            moderation_fail_open: parse(
                &lookup,
                "KINDLE_MODERATION_FAIL_OPEN",
                defaults.moderation_fail_open,
            )?,
            moderation_allow_list: lookup("KINDLE_MODERATION_ALLOW_LIST")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|term| !term.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        };

        Ok(Self {
            host: lookup("KINDLE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&lookup, "KINDLE_PORT", 3000)?,
            db_path: lookup("KINDLE_DB_PATH")
                .unwrap_or_else(|| "kindle.db".into())
                .into(),
            jwt_secret,
            engine,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[("KINDLE_JWT_SECRET", "s3cret-for-tests")]).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("kindle.db"));
        assert_eq!(config.engine.message_allotment, 5);
        assert_eq!(config.engine.daily_likes, 25);
        assert_eq!(config.engine.daily_superlikes, 1);
        assert_eq!(config.engine.retry_base, Duration::from_millis(25));
        assert!(!config.engine.moderation_fail_open);
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("KINDLE_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("KINDLE_JWT_SECRET", "s3cret-for-tests"),
            ("KINDLE_PORT", "8088"),
            ("KINDLE_MESSAGE_ALLOTMENT", "10"),
            ("KINDLE_DAILY_LIKES", "3"),
            ("KINDLE_DAILY_SUPERLIKES", "0"),
            ("KINDLE_CONVERSION_WINDOW_SECS", "60"),
            ("KINDLE_MODERATION_FAIL_OPEN", "true"),
            ("KINDLE_MODERATION_ALLOW_LIST", "kindle.app, ola.com ,"),
        ])
        .unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.engine.message_allotment, 10);
        assert_eq!(config.engine.daily_likes, 3);
        assert_eq!(config.engine.daily_superlikes, 0);
        assert_eq!(config.engine.conversion_window, Duration::from_secs(60));
        assert!(config.engine.moderation_fail_open);
        assert_eq!(config.engine.moderation_allow_list, vec!["kindle.app", "ola.com"]);
    }

    #[test]
    fn garbage_numbers_are_an_error() {
        let err = config(&[("KINDLE_JWT_SECRET", "s3cret-for-tests"), ("KINDLE_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("KINDLE_PORT"));
    }
}
