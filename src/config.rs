//! Listener configuration read from the environment.

use crate::listener::decoder::{DEPOSIT_EVENT_OPCODE, WITHDRAW_EVENT_OPCODE};
use crate::listener::fetcher::PageSizePolicy;
use crate::listener::supervisor::SupervisorConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// TON network whose public TonAPI deployment is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonNetwork {
    #[default]
    Mainnet,
    Testnet,
}

impl TonNetwork {
    pub fn tonapi_url(&self) -> &'static str {
        match self {
            TonNetwork::Mainnet => "https://tonapi.io",
            TonNetwork::Testnet => "https://testnet.tonapi.io",
        }
    }
}

/// Credentials of the Supabase project holding `users` and `tx_history`.
#[derive(Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("service_role_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Escrow contract whose transactions are watched
    pub escrow_address: String,
    pub network: TonNetwork,
    pub tonapi_base_url: String,
    pub tonapi_api_key: Option<String>,
    pub supervisor: SupervisorConfig,
    pub page_sizes: PageSizePolicy,
    pub deposit_opcode: u32,
    pub withdraw_opcode: u32,
    /// Directory holding the cursor file and dead-letter log
    pub state_dir: PathBuf,
    pub dead_letter_enabled: bool,
    /// `None` runs against the in-memory store
    pub supabase: Option<SupabaseConfig>,
    pub http_timeout: Duration,
}

impl ListenerConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which returns a variable's value if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let escrow_address =
            var("ESCROW_ADDRESS").ok_or(ConfigError::Missing("ESCROW_ADDRESS"))?;

        let legacy_testnet = parse_bool("TESTNET", var("TESTNET"))?;
        let network = match var("TON_NETWORK") {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "mainnet" => TonNetwork::Mainnet,
                "testnet" => TonNetwork::Testnet,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "TON_NETWORK",
                        value,
                        reason: "expected mainnet or testnet".to_string(),
                    });
                }
            },
            None if legacy_testnet => TonNetwork::Testnet,
            None => TonNetwork::Mainnet,
        };
        let tonapi_base_url =
            var("TONAPI_BASE_URL").unwrap_or_else(|| network.tonapi_url().to_string());

        let supervisor = SupervisorConfig {
            poll_interval: Duration::from_millis(parse_number(
                "POLL_INTERVAL_MS",
                var("POLL_INTERVAL_MS"),
                2000,
            )?),
            backoff_delay: Duration::from_millis(parse_number(
                "BACKOFF_MS",
                var("BACKOFF_MS"),
                2000,
            )?),
        };
        let page_sizes = PageSizePolicy {
            priming: parse_page_size("PRIMING_PAGE_SIZE", var("PRIMING_PAGE_SIZE"), 1)?,
            polling: parse_page_size("POLLING_PAGE_SIZE", var("POLLING_PAGE_SIZE"), 10)?,
        };

        let supabase = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };

        Ok(Self {
            escrow_address,
            network,
            tonapi_base_url,
            tonapi_api_key: var("TONAPI_API_KEY"),
            supervisor,
            page_sizes,
            deposit_opcode: parse_opcode(
                "DEPOSIT_EVENT_OPCODE",
                var("DEPOSIT_EVENT_OPCODE"),
                DEPOSIT_EVENT_OPCODE,
            )?,
            withdraw_opcode: parse_opcode(
                "WITHDRAW_EVENT_OPCODE",
                var("WITHDRAW_EVENT_OPCODE"),
                WITHDRAW_EVENT_OPCODE,
            )?,
            state_dir: var("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            dead_letter_enabled: parse_bool("DEAD_LETTER_ENABLED", var("DEAD_LETTER_ENABLED"))?,
            supabase,
            http_timeout: Duration::from_secs(parse_number(
                "HTTP_TIMEOUT_SECS",
                var("HTTP_TIMEOUT_SECS"),
                30,
            )?),
        })
    }
}

fn invalid(name: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value,
        reason: reason.to_string(),
    }
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value {
        None => Ok(false),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(invalid(name, value, "expected true or false")),
        },
    }
}

fn parse_number(
    name: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e| invalid(name, value, e)),
    }
}

fn parse_page_size(
    name: &'static str,
    value: Option<String>,
    default: u32,
) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => match value.trim().parse::<u32>() {
            Ok(0) => Err(invalid(name, value, "must be at least 1")),
            Ok(size) => Ok(size),
            Err(e) => Err(invalid(name, value, e)),
        },
    }
}

fn parse_opcode(
    name: &'static str,
    value: Option<String>,
    default: u32,
) -> Result<u32, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => {
            let digits = value
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            u32::from_str_radix(digits, 16).map_err(|e| invalid(name, value.clone(), e))
        }
    }
}
