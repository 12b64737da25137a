//! Agent configuration
//!
//! All configuration is loaded from environment variables (case-insensitive
//! variable names). Required fields missing at startup are a fatal
//! `ConfigError`.

use std::env;

use crate::errors::ConfigError;

/// Configuration for the Sentry security agent.
///
/// Every field here corresponds to one environment variable. Required
/// fields have no default and produce a `ConfigError` if absent; optional
/// fields fall back to the documented default.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    // -- Blockchain --
    pub sepolia_rpc_url: String,
    pub chain_id: u64,

    // -- Wallet --
    pub agent_private_key: String,

    // -- Contract addresses --
    pub weth_address: String,
    pub usdc_address: String,
    pub oracle_address: String,
    pub amm_pool_address: String,
    pub lending_vault_address: String,

    // -- AI --
    pub gemini_api_key: String,
    pub gemini_model: String,

    // -- Agent behavior --
    pub poll_interval: u64,
    pub price_deviation_threshold: f64,
    pub pause_confidence_threshold: f64,
    pub block_liquidation_threshold: f64,
    pub proactive_pause_deviation: f64,
    pub rapid_response_mode: bool,
    pub price_history_window: usize,

    // -- Backend --
    pub backend_url: String,

    // -- Logging --
    pub log_level: String,
}

/// Looks up an environment variable case-insensitively by name, matching
/// `pydantic_settings`'s `case_sensitive = False` behavior in the original
/// Python configuration (every variable in the env is scanned once; the
/// first whose name matches ignoring case wins).
fn lookup(name: &str) -> Option<String> {
    env::var(name).ok().or_else(|| {
        env::vars()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn required(name: &str) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired(name.to_string()))
}

/// `0x` followed by exactly 40 hex digits — the shape every contract
/// address in §6 must have before the Chain Gateway ever touches it.
fn is_well_formed_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Like `required`, but for the five contract addresses: malformed values
/// are a `ConfigError::Invalid` rather than being handed to the Chain
/// Gateway to fail on later with a less specific error.
fn required_address(name: &str) -> Result<String, ConfigError> {
    let value = required(name)?;
    if is_well_formed_address(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            field: name.to_string(),
            reason: format!("expected a 0x-prefixed 40-hex-character address, got {value:?}"),
        })
    }
}

fn optional_str(name: &str, default: &str) -> String {
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn optional_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    lookup(name)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn optional_bool(name: &str, default: bool) -> bool {
    lookup(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl AgentConfig {
    /// Load and validate configuration from the environment.
    ///
    /// Looks for a `.env` file in the current directory first (local dev
    /// convenience); environment variables already set are never
    /// overridden by the file.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        Ok(Self {
            sepolia_rpc_url: required("SEPOLIA_RPC_URL")?,
            chain_id: optional_parsed("CHAIN_ID", 11_155_111),

            agent_private_key: required("AGENT_PRIVATE_KEY")?,

            weth_address: required_address("WETH_ADDRESS")?,
            usdc_address: required_address("USDC_ADDRESS")?,
            oracle_address: required_address("ORACLE_ADDRESS")?,
            amm_pool_address: required_address("AMM_POOL_ADDRESS")?,
            lending_vault_address: required_address("LENDING_VAULT_ADDRESS")?,

            gemini_api_key: required("GEMINI_API_KEY")?,
            gemini_model: optional_str("GEMINI_MODEL", "gemini-1.5-pro"),

            poll_interval: optional_parsed("POLL_INTERVAL", 3),
            price_deviation_threshold: optional_parsed("PRICE_DEVIATION_THRESHOLD", 0.03),
            pause_confidence_threshold: optional_parsed("PAUSE_CONFIDENCE_THRESHOLD", 0.65),
            block_liquidation_threshold: optional_parsed("BLOCK_LIQUIDATION_THRESHOLD", 0.50),
            proactive_pause_deviation: optional_parsed("PROACTIVE_PAUSE_DEVIATION", 0.30),
            rapid_response_mode: optional_bool("RAPID_RESPONSE_MODE", true),
            price_history_window: optional_parsed("PRICE_HISTORY_WINDOW", 20),

            backend_url: optional_str("BACKEND_URL", "http://localhost:8080"),

            log_level: optional_str("LOG_LEVEL", "INFO"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation is process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const WETH: &str = "0x1111111111111111111111111111111111111111";
    const USDC: &str = "0x2222222222222222222222222222222222222222";
    const ORACLE: &str = "0x3333333333333333333333333333333333333333";
    const AMM_POOL: &str = "0x4444444444444444444444444444444444444444";
    const LENDING_VAULT: &str = "0x5555555555555555555555555555555555555555";

    fn clear_required_vars() {
        for var in [
            "SEPOLIA_RPC_URL",
            "AGENT_PRIVATE_KEY",
            "WETH_ADDRESS",
            "USDC_ADDRESS",
            "ORACLE_ADDRESS",
            "AMM_POOL_ADDRESS",
            "LENDING_VAULT_ADDRESS",
            "GEMINI_API_KEY",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_field_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_required_vars();

        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
    }

    #[test]
    fn defaults_apply_when_optional_fields_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_required_vars();
        env::set_var("SEPOLIA_RPC_URL", "https://example.invalid/rpc");
        env::set_var("AGENT_PRIVATE_KEY", "0xabc");
        env::set_var("WETH_ADDRESS", WETH);
        env::set_var("USDC_ADDRESS", USDC);
        env::set_var("ORACLE_ADDRESS", ORACLE);
        env::set_var("AMM_POOL_ADDRESS", AMM_POOL);
        env::set_var("LENDING_VAULT_ADDRESS", LENDING_VAULT);
        env::set_var("GEMINI_API_KEY", "key");
        env::remove_var("PROACTIVE_PAUSE_DEVIATION");
        env::remove_var("PAUSE_CONFIDENCE_THRESHOLD");

        let cfg = AgentConfig::from_env().expect("config should load");
        assert_eq!(cfg.chain_id, 11_155_111);
        assert_eq!(cfg.poll_interval, 3);
        assert!((cfg.proactive_pause_deviation - 0.30).abs() < f64::EPSILON);
        assert!((cfg.pause_confidence_threshold - 0.65).abs() < f64::EPSILON);
        assert_eq!(cfg.price_history_window, 20);
        assert_eq!(cfg.backend_url, "http://localhost:8080");

        clear_required_vars();
    }

    #[test]
    fn required_lookup_is_case_insensitive() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_required_vars();
        // Lowercase variants should satisfy the uppercase-named required fields.
        env::set_var("sepolia_rpc_url", "https://example.invalid/rpc");
        env::set_var("AGENT_PRIVATE_KEY", "0xabc");
        env::set_var("weth_address", WETH);
        env::set_var("USDC_ADDRESS", USDC);
        env::set_var("Oracle_Address", ORACLE);
        env::set_var("AMM_POOL_ADDRESS", AMM_POOL);
        env::set_var("LENDING_VAULT_ADDRESS", LENDING_VAULT);
        env::set_var("GEMINI_API_KEY", "key");

        let cfg = AgentConfig::from_env().expect("case-insensitive lookup should find every field");
        assert_eq!(cfg.sepolia_rpc_url, "https://example.invalid/rpc");
        assert_eq!(cfg.weth_address, WETH);
        assert_eq!(cfg.oracle_address, ORACLE);

        env::remove_var("sepolia_rpc_url");
        env::remove_var("weth_address");
        env::remove_var("Oracle_Address");
        clear_required_vars();
    }

    #[test]
    fn malformed_contract_address_is_a_config_error_not_a_missing_one() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_required_vars();
        env::set_var("SEPOLIA_RPC_URL", "https://example.invalid/rpc");
        env::set_var("AGENT_PRIVATE_KEY", "0xabc");
        env::set_var("WETH_ADDRESS", "not-an-address");
        env::set_var("USDC_ADDRESS", USDC);
        env::set_var("ORACLE_ADDRESS", ORACLE);
        env::set_var("AMM_POOL_ADDRESS", AMM_POOL);
        env::set_var("LENDING_VAULT_ADDRESS", LENDING_VAULT);
        env::set_var("GEMINI_API_KEY", "key");

        let err = AgentConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "WETH_ADDRESS"));

        clear_required_vars();
    }
}
