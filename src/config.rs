use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub addr: SocketAddr,
    pub poll_interval_secs: u64,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    pub bell: bool,
    pub reseed_alarms: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://todo.db".to_string(),
            max_connections: 5,
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            poll_interval_secs: 30,
            webhook_url: None,
            webhook_timeout_secs: 10,
            bell: true,
            reseed_alarms: true,
        }
    }
}

impl Config {
    /// Reads settings from the process environment. Call `dotenvy::dotenv()`
    /// first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_interval_secs = parse_or(&lookup, "ALARM_POLL_SECS", defaults.poll_interval_secs)?;
        if poll_interval_secs == 0 {
            return Err(AppError::Config("ALARM_POLL_SECS must be at least 1".to_string()));
        }

        let webhook_timeout_secs =
            parse_or(&lookup, "ALARM_WEBHOOK_TIMEOUT_SECS", defaults.webhook_timeout_secs)?;
        if webhook_timeout_secs == 0 {
            return Err(AppError::Config(
                "ALARM_WEBHOOK_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            addr: parse_or(&lookup, "STUDYMATE_ADDR", defaults.addr)?,
            poll_interval_secs,
            webhook_url: lookup("ALARM_WEBHOOK_URL").filter(|url| !url.is_empty()),
            webhook_timeout_secs,
            bell: parse_bool_or(&lookup, "ALARM_BELL", defaults.bell)?,
            reseed_alarms: parse_bool_or(&lookup, "ALARM_RESEED", defaults.reseed_alarms)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> Result<bool, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(default),
        Some("1") | Some("true") | Some("yes") | Some("on") => Ok(true),
        Some("0") | Some("false") | Some("no") | Some("off") => Ok(false),
        Some(other) => Err(AppError::Config(format!("{} has an invalid value: {}", key, other))),
    }
}
