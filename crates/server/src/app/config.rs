use std::fmt::Debug;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::str::FromStr;

use engine::{EngineConfig, StepMode};
use thiserror::Error;
use tracing::warn;

const BIND_ENV_VAR: &str = "ARENA_BIND";
const PORT_ENV_VAR: &str = "ARENA_PORT";
const TICK_HZ_ENV_VAR: &str = "ARENA_TICK_HZ";
const MAX_CATCH_UP_ENV_VAR: &str = "ARENA_MAX_CATCH_UP";
const TOKEN_PREFIX_ENV_VAR: &str = "ARENA_TOKEN_PREFIX";
const REAP_EMPTY_ROOMS_ENV_VAR: &str = "ARENA_REAP_EMPTY_ROOMS";
const SEED_ENV_VAR: &str = "ARENA_SEED";

pub(crate) const DEFAULT_BIND: &str = "127.0.0.1";
pub(crate) const DEFAULT_PORT: u16 = 47001;
pub(crate) const DEFAULT_TICK_HZ: u32 = 60;
pub(crate) const DEFAULT_TOKEN_PREFIX: &str = "dev.";

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid bind address '{value}': {source}")]
    InvalidBind {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerConfig {
    pub(crate) bind: String,
    pub(crate) port: u16,
    pub(crate) tick_hz: u32,
    /// `None` replays every missed tick after a stall.
    pub(crate) max_catch_up_steps: Option<u32>,
    pub(crate) token_prefix: String,
    pub(crate) reap_empty_rooms: bool,
    /// Fixed seed for every room RNG. Random per room when unset.
    pub(crate) seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            tick_hz: DEFAULT_TICK_HZ,
            max_catch_up_steps: None,
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            reap_empty_rooms: false,
            seed: None,
        }
    }
}

impl ServerConfig {
    pub(crate) fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from `lookup`, keeping the default for every value
    /// that is missing or does not parse.
    pub(crate) fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let bind = match lookup(BIND_ENV_VAR) {
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => defaults.bind,
        };
        let port = parse_or_default(PORT_ENV_VAR, lookup(PORT_ENV_VAR), defaults.port);
        let tick_hz = match parse_or_default(
            TICK_HZ_ENV_VAR,
            lookup(TICK_HZ_ENV_VAR),
            defaults.tick_hz,
        ) {
            0 => {
                warn!(
                    var = TICK_HZ_ENV_VAR,
                    fallback = DEFAULT_TICK_HZ,
                    "config_zero_tick_rate_using_default"
                );
                DEFAULT_TICK_HZ
            }
            hz => hz,
        };
        let max_catch_up_steps = lookup(MAX_CATCH_UP_ENV_VAR)
            .and_then(|raw| parse_optional(MAX_CATCH_UP_ENV_VAR, &raw))
            .filter(|steps| *steps > 0);
        let token_prefix = lookup(TOKEN_PREFIX_ENV_VAR).unwrap_or(defaults.token_prefix);
        let reap_empty_rooms = match lookup(REAP_EMPTY_ROOMS_ENV_VAR) {
            Some(raw) => parse_flag(REAP_EMPTY_ROOMS_ENV_VAR, &raw, defaults.reap_empty_rooms),
            None => defaults.reap_empty_rooms,
        };
        let seed = lookup(SEED_ENV_VAR).and_then(|raw| parse_optional(SEED_ENV_VAR, &raw));

        Self {
            bind,
            port,
            tick_hz,
            max_catch_up_steps,
            token_prefix,
            reap_empty_rooms,
            seed,
        }
    }

    pub(crate) fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .bind
            .parse::<IpAddr>()
            .map_err(|source| ConfigError::InvalidBind {
                value: self.bind.clone(),
                source,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub(crate) fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            step_mode: StepMode::fixed_hz(self.tick_hz),
            max_catch_up_steps: self.max_catch_up_steps,
            ..EngineConfig::default()
        }
    }
}

fn parse_or_default<T>(var: &'static str, raw: Option<String>, default: T) -> T
where
    T: FromStr + Debug + Copy,
{
    match raw {
        Some(value) => parse_optional(var, &value).unwrap_or(default),
        None => default,
    }
}

fn parse_optional<T>(var: &'static str, raw: &str) -> Option<T>
where
    T: FromStr,
{
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(var, value = raw, "config_invalid_value_ignored");
            None
        }
    }
}

fn parse_flag(var: &'static str, raw: &str, default: bool) -> bool {
    match raw.trim() {
        "1" | "true" => true,
        "0" | "false" => false,
        other => {
            warn!(var, value = other, fallback = default, "config_invalid_flag_using_default");
            default
        }
    }
}
