//! Venue credentials
//!
//! Structured credentials loaded from the environment; secrets live in
//! `.env` files, never in the TOML config or source.

use super::types::ExchangeError;

/// Credentials for one venue session
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// API key identifier
    pub api_key_id: String,
    /// API secret, or a path to key material for venues that sign with a key file
    pub secret: String,
    /// Passphrase, for venues that require one
    pub passphrase: Option<String>,
    /// Override for the venue REST endpoint
    pub endpoint: Option<String>,
}

impl Credentials {
    /// Credentials with explicit values
    pub fn new(api_key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key_id: api_key_id.into(),
            secret: secret.into(),
            passphrase: None,
            endpoint: None,
        }
    }

    /// Empty credentials for public, unauthenticated endpoints only
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Set the passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Set the endpoint override
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Load credentials from `<PREFIX>_API_KEY_ID` / `<PREFIX>_API_SECRET`
    /// (plus optional `<PREFIX>_PASSPHRASE` and `<PREFIX>_ENDPOINT`)
    ///
    /// A `.env` file in the working directory is loaded first if present.
    pub fn from_env(prefix: &str) -> Result<Self, ExchangeError> {
        let _ = dotenvy::dotenv();

        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}"));

        let api_key_id = var("API_KEY_ID").map_err(|_| {
            ExchangeError::Credentials(format!("{prefix}_API_KEY_ID is not set"))
        })?;
        let secret = var("API_SECRET").map_err(|_| {
            ExchangeError::Credentials(format!("{prefix}_API_SECRET is not set"))
        })?;

        Ok(Self {
            api_key_id,
            secret,
            passphrase: var("PASSPHRASE").ok(),
            endpoint: var("ENDPOINT").ok(),
        })
    }

    /// True when no key material is present
    pub fn is_anonymous(&self) -> bool {
        self.api_key_id.is_empty() && self.secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let creds = Credentials::new("key-id", "secret")
            .passphrase("phrase")
            .endpoint("https://example.com");

        assert_eq!(creds.api_key_id, "key-id");
        assert_eq!(creds.secret, "secret");
        assert_eq!(creds.passphrase.as_deref(), Some("phrase"));
        assert_eq!(creds.endpoint.as_deref(), Some("https://example.com"));
        assert!(!creds.is_anonymous());
    }

    #[test]
    fn test_anonymous() {
        let creds = Credentials::anonymous();
        assert!(creds.is_anonymous());
    }

    #[test]
    fn test_from_env_missing_key() {
        let result = Credentials::from_env("PMKIT_TEST_NO_SUCH_VENUE");
        assert!(matches!(result, Err(ExchangeError::Credentials(_))));
    }

    #[test]
    fn test_from_env_reads_values() {
        std::env::set_var("PMKIT_TEST_VENUE_API_KEY_ID", "abc");
        std::env::set_var("PMKIT_TEST_VENUE_API_SECRET", "s3cret");

        let creds = Credentials::from_env("PMKIT_TEST_VENUE").unwrap();
        assert_eq!(creds.api_key_id, "abc");
        assert_eq!(creds.secret, "s3cret");
        assert!(creds.passphrase.is_none());

        std::env::remove_var("PMKIT_TEST_VENUE_API_KEY_ID");
        std::env::remove_var("PMKIT_TEST_VENUE_API_SECRET");
    }
}
