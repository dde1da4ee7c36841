//! Checkout configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `CHECKOUT_RETURN_URL` - Where the payment provider sends the buyer after approval
//! - `CHECKOUT_CANCEL_URL` - Where the payment provider sends the buyer on cancel
//! - `PAYPAL_CLIENT_ID` - `PayPal` REST app client ID
//! - `PAYPAL_CLIENT_SECRET` - `PayPal` REST app secret
//!
//! ## Optional
//! - `CHECKOUT_CURRENCY` - Store currency (default: USD)
//! - `CHECKOUT_STATE_REQUIRED_COUNTRIES` - Countries whose addresses need a state (default: CA)
//! - `CHECKOUT_TAX_RATE` - Flat tax rate as a fraction, e.g. `0.08` (default: 0)
//! - `CHECKOUT_SHIPPING_FLAT` - Shipping charged per seller (default: 0)
//! - `CHECKOUT_DOUBLE_SUBMIT` - `reuse` or `reject` (default: reuse)
//! - `PAYPAL_API_BASE` - API base URL (default: `PayPal` sandbox)
//! - `PAYPAL_TIMEOUT_SECS` - Provider call timeout (default: 15)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use marketway_core::CurrencyCode;

const DEFAULT_PAYPAL_API_BASE: &str = "https://api-m.sandbox.paypal.com";
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// What `create()` does when the cart already has an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoubleSubmitPolicy {
    /// Return the open session if its snapshot still matches the cart;
    /// otherwise fail it and start a fresh one.
    #[default]
    Reuse,
    /// Refuse with `DuplicateSubmission`.
    Reject,
}

impl FromStr for DoubleSubmitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reuse" => Ok(Self::Reuse),
            "reject" => Ok(Self::Reject),
            other => Err(format!("expected `reuse` or `reject`, got `{other}`")),
        }
    }
}

/// Checkout application configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// Session-manager settings
    pub checkout: CheckoutSettings,
    /// Flat-rate pricing settings
    pub pricing: PricingSettings,
    /// `PayPal` REST API configuration
    pub paypal: PayPalConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g. production, staging)
    pub sentry_environment: Option<String>,
}

/// Settings consumed by the checkout session manager and address gate.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Store currency
    pub currency: CurrencyCode,
    /// Provider return URL
    pub return_url: Url,
    /// Provider cancel URL
    pub cancel_url: Url,
    /// Countries whose addresses must carry a state/region
    pub state_required_countries: Vec<String>,
    /// Double-submit handling for `create()`
    pub double_submit: DoubleSubmitPolicy,
    /// Upper bound on any single payment provider call
    pub provider_timeout: Duration,
}

/// Flat-rate pricing: one tax rate and a per-seller shipping charge.
#[derive(Debug, Clone, Default)]
pub struct PricingSettings {
    pub tax_rate: Decimal,
    pub shipping_flat: Decimal,
}

/// `PayPal` REST API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PayPalConfig {
    /// API base URL (sandbox or live)
    pub api_base: Url,
    /// REST app client ID
    pub client_id: String,
    /// REST app secret
    pub client_secret: SecretString,
}

impl std::fmt::Debug for PayPalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayPalConfig")
            .field("api_base", &self.api_base.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_database_url("CHECKOUT_DATABASE_URL")?,
            checkout: CheckoutSettings::from_env()?,
            pricing: PricingSettings::from_env()?,
            paypal: PayPalConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Only the database URL, for operator tooling that never talks to the
    /// payment provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if neither
    /// `CHECKOUT_DATABASE_URL` nor `DATABASE_URL` is set.
    pub fn database_url_from_env() -> Result<SecretString, ConfigError> {
        let _ = dotenvy::dotenv();
        get_database_url("CHECKOUT_DATABASE_URL")
    }
}

impl CheckoutSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs: u64 = parse_env("PAYPAL_TIMEOUT_SECS", "15")?;

        Ok(Self {
            currency: parse_env("CHECKOUT_CURRENCY", "USD")?,
            return_url: get_required_url("CHECKOUT_RETURN_URL")?,
            cancel_url: get_required_url("CHECKOUT_CANCEL_URL")?,
            state_required_countries: parse_country_list(&get_env_or_default(
                "CHECKOUT_STATE_REQUIRED_COUNTRIES",
                "CA",
            )),
            double_submit: parse_env("CHECKOUT_DOUBLE_SUBMIT", "reuse")?,
            provider_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl PricingSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            tax_rate: parse_env("CHECKOUT_TAX_RATE", "0")?,
            shipping_flat: parse_env("CHECKOUT_SHIPPING_FLAT", "0")?,
        })
    }
}

impl PayPalConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base = get_env_or_default("PAYPAL_API_BASE", DEFAULT_PAYPAL_API_BASE);
        let api_base = Url::parse(&api_base)
            .map_err(|e| ConfigError::InvalidEnvVar("PAYPAL_API_BASE".to_string(), e.to_string()))?;

        Ok(Self {
            api_base,
            client_id: get_required_env("PAYPAL_CLIENT_ID")?,
            client_secret: get_validated_secret("PAYPAL_CLIENT_SECRET")?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) with `FromStr`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Get a required absolute URL.
fn get_required_url(key: &str) -> Result<Url, ConfigError> {
    let value = get_required_env(key)?;
    Url::parse(&value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Split a comma separated list of country codes.
fn parse_country_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-paypal-secret", "PAYPAL_CLIENT_SECRET");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaa", "PAYPAL_CLIENT_SECRET");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("EKx9$Qw7!pZ2@mR5#tY8&uV1", "PAYPAL_CLIENT_SECRET");
        assert!(result.is_ok());
    }

    #[test]
    fn test_double_submit_policy_parse() {
        assert_eq!(
            "Reject".parse::<DoubleSubmitPolicy>(),
            Ok(DoubleSubmitPolicy::Reject)
        );
        assert_eq!(
            " reuse ".parse::<DoubleSubmitPolicy>(),
            Ok(DoubleSubmitPolicy::Reuse)
        );
        assert!("sometimes".parse::<DoubleSubmitPolicy>().is_err());
    }

    #[test]
    fn test_parse_country_list() {
        assert_eq!(parse_country_list("ca, us,,au "), vec!["CA", "US", "AU"]);
        assert!(parse_country_list("").is_empty());
    }

    #[test]
    fn test_paypal_config_debug_redacts_secret() {
        let config = PayPalConfig {
            api_base: Url::parse(DEFAULT_PAYPAL_API_BASE).unwrap(),
            client_id: "client_id_value".to_string(),
            client_secret: SecretString::from("super_secret_paypal_value"),
        };

        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("client_id_value"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_paypal_value"));
    }
}
