use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageBackend,
    pub run_migrations: bool,
    /// Request body cap for image uploads, in bytes.
    pub upload_limit: usize,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_parse("BIND_ADDR").unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));
        let storage = match env_string("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => {
                warn!("STORAGE_BACKEND=memory: data lives only as long as the process");
                StorageBackend::Memory
            }
            Some(other) => anyhow::bail!("unknown STORAGE_BACKEND '{other}' (expected postgres or memory)"),
        };
        Ok(Self {
            bind_addr,
            storage,
            run_migrations: env_bool("RUN_MIGRATIONS").unwrap_or(true),
            upload_limit: env_parse("UPLOAD_LIMIT_BYTES").unwrap_or(10 * 1024 * 1024),
        })
    }
}

pub fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn first_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env_string(key))
}

pub fn env_bool(key: &str) -> Option<bool> {
    env_string(key).and_then(|v| parse_bool(&v))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Unparseable values are logged and treated as unset.
pub fn env_parse<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env_string(key)?;
    raw.parse()
        .map_err(|e| warn!("Invalid {key} value '{raw}': {e}; using default"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bool_spellings() {
        for v in ["1", "true", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true));
        }
        for v in ["0", "false", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn unset_variables_are_none() {
        assert_eq!(env_string("PRODUKSI_TEST_SURELY_UNSET"), None);
        assert_eq!(env_parse::<u16>("PRODUKSI_TEST_SURELY_UNSET"), None);
        assert_eq!(first_env(&["PRODUKSI_TEST_A_UNSET", "PRODUKSI_TEST_B_UNSET"]), None);
    }
}
