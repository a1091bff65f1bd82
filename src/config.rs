// SPDX-License-Identifier: MIT

//! Ledger configuration loaded from environment variables.
//!
//! Every tunable has a documented default so the engine runs unconfigured;
//! tests use [`LedgerConfig::test_default`] for fixed, fast values.

use std::env;

/// Engine configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Lot lifetime: coins expire this many months after being earned.
    pub retention_months: u32,
    /// Horizon for the `expiring_soon` balance component, in days.
    pub expiring_soon_days: i64,
    /// Coins awarded to a referred user at attribution time.
    pub welcome_bonus: i64,
    /// Coins awarded to the referrer when the referral qualifies.
    pub referral_reward: i64,
    /// Prefix for generated referral codes.
    pub referral_code_prefix: String,
    /// Page size used by exhaustive store query loops.
    pub store_page_size: u32,

    // --- Transient-failure retry ---
    /// Maximum attempts per store call (including the first).
    pub retry_max_attempts: usize,
    /// Base backoff delay in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Backoff delay cap in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl LedgerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok(); // Load .env file if present

        Self {
            retention_months: env_parse("COIN_RETENTION_MONTHS", 12),
            expiring_soon_days: env_parse("COIN_EXPIRING_SOON_DAYS", 30),
            welcome_bonus: env_parse("REFERRAL_WELCOME_BONUS", 50),
            referral_reward: env_parse("REFERRAL_REWARD", 100),
            referral_code_prefix: env::var("REFERRAL_CODE_PREFIX")
                .unwrap_or_else(|_| "INDA".to_string()),
            store_page_size: env_parse("STORE_PAGE_SIZE", 100),
            retry_max_attempts: env_parse("STORE_RETRY_MAX_ATTEMPTS", 5),
            retry_base_delay_ms: env_parse("STORE_RETRY_BASE_DELAY_MS", 250),
            retry_max_delay_ms: env_parse("STORE_RETRY_MAX_DELAY_MS", 5_000),
        }
    }

    /// Fixed configuration for tests: production amounts, no retry delays.
    pub fn test_default() -> Self {
        Self {
            retention_months: 12,
            expiring_soon_days: 30,
            welcome_bonus: 50,
            referral_reward: 100,
            referral_code_prefix: "INDA".to_string(),
            store_page_size: 100,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 1,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Parse an env var, falling back to `default` when unset or invalid.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = LedgerConfig::test_default();

        assert_eq!(config.retention_months, 12);
        assert_eq!(config.expiring_soon_days, 30);
        assert_eq!(config.welcome_bonus, 50);
        assert_eq!(config.referral_reward, 100);
        assert_eq!(config.referral_code_prefix, "INDA");
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        env::set_var("COIN_LEDGER_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_parse("COIN_LEDGER_TEST_GARBAGE", 42u32), 42);
        env::remove_var("COIN_LEDGER_TEST_GARBAGE");
    }

    #[test]
    fn env_parse_reads_valid_values() {
        env::set_var("COIN_LEDGER_TEST_MONTHS", "6");
        assert_eq!(env_parse("COIN_LEDGER_TEST_MONTHS", 12u32), 6);
        env::remove_var("COIN_LEDGER_TEST_MONTHS");
    }
}
