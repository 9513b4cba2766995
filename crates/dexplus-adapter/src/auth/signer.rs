/*
[INPUT]:  Secret key, timestamp and request descriptor
[OUTPUT]: Base64 HMAC-SHA256 signatures for WebSocket login
[POS]:    Auth layer - request signing
[UPDATE]: When adding signature schemes
*/

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{DexError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Path signed by the OKX WebSocket login.
pub const OKX_VERIFY_PATH: &str = "/users/self/verify";

/// HMAC-SHA256 signer producing base64 output.
#[derive(Clone)]
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn sign(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|err| DexError::auth(format!("invalid HMAC key: {err}")))?;
        mac.update(message.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Signature for an OKX WebSocket login at `timestamp` (unix seconds).
    pub fn sign_okx_login(&self, timestamp: &str) -> Result<String> {
        self.sign(&format!("{timestamp}GET{OKX_VERIFY_PATH}"))
    }

    /// Current unix time in seconds, as OKX expects it in the login request.
    pub fn timestamp_secs() -> String {
        chrono::Utc::now().timestamp().to_string()
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}
