use anyhow::{Context, Result};

const PREFIX: &str = "TIMETABLE__";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub port: u16,
    pub body_limit_bytes: usize,
    /// Compiled graphs kept across requests; 0 disables the cache.
    pub cache_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            body_limit_bytes: 2 * 1024 * 1024,
            cache_capacity: 64,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = read(&lookup, "SERVER__PORT")? {
            cfg.port = v;
        }
        if let Some(v) = read(&lookup, "SERVER__BODY_LIMIT_BYTES")? {
            cfg.body_limit_bytes = v;
        }
        if let Some(v) = read(&lookup, "CACHE__CAPACITY")? {
            cfg.cache_capacity = v;
        }
        Ok(cfg)
    }
}

fn read<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{PREFIX}{key}");
    lookup(&name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value {raw:?} for {name}"))
        })
        .transpose()
}
