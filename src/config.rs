use std::env;

use anyhow::{Context, bail};
use chrono_tz::Tz;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataBackend {
    Postgres,
    Memory,
}

impl DataBackend {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(DataBackend::Postgres),
            "memory" | "inmemory" => Ok(DataBackend::Memory),
            other => bail!("unknown DATA_BACKEND: {other} (expected postgres or memory)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: DataBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub clinic_timezone: Tz,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let backend = match get("DATA_BACKEND") {
            Some(raw) => DataBackend::parse(&raw)?,
            None => DataBackend::Postgres,
        };

        let database_url = get("DATABASE_URL");
        if backend == DataBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when DATA_BACKEND=postgres");
        }

        let database_max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("invalid DATABASE_MAX_CONNECTIONS: {raw}"))?,
            None => 10,
        };

        let run_migrations = match get("RUN_MIGRATIONS") {
            Some(raw) => parse_bool(&raw)
                .with_context(|| format!("invalid RUN_MIGRATIONS: {raw}"))?,
            None => true,
        };

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let session_ttl_hours = match get("SESSION_TTL_HOURS") {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("invalid SESSION_TTL_HOURS: {raw}"))?,
            None => 24,
        };
        if session_ttl_hours <= 0 {
            bail!("SESSION_TTL_HOURS must be positive");
        }

        let clinic_timezone = match get("CLINIC_TIMEZONE") {
            Some(raw) => raw
                .parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("invalid CLINIC_TIMEZONE {raw}: {e}"))?,
            None => chrono_tz::Europe::Zurich,
        };

        Ok(Self {
            backend,
            database_url,
            database_max_connections,
            run_migrations,
            bind_addr,
            session_ttl_hours,
            clinic_timezone,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
