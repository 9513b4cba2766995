/*
[INPUT]:  API key material from configuration
[OUTPUT]: ApiCredentials with redacted Debug output
[POS]:    Auth layer - credential container
[UPDATE]: When exchanges require additional key material
*/

use serde::{Deserialize, Serialize};

/// Exchange API key triple. `Debug` never prints the secret or passphrase.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub passphrase: String,
}

impl ApiCredentials {
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            passphrase: passphrase.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = ApiCredentials::new("key-1", "super-secret", "pass-phrase");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("key-1"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("pass-phrase"));
    }

    #[test]
    fn test_is_complete() {
        assert!(ApiCredentials::new("k", "s", "").is_complete());
        assert!(!ApiCredentials::new("k", "", "p").is_complete());
    }
}
