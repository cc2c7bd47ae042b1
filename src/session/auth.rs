//! API credential storage and logon signing.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{ClientError, TransportError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct Credential {
    api_key: String,
    api_secret: Box<[u8]>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into().into_bytes().into_boxed_slice(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::ConfigInvalid("api key is empty".to_string()));
        }
        if self.api_secret.is_empty() {
            return Err(ClientError::ConfigInvalid("secret key is empty".to_string()));
        }
        Ok(())
    }

    /// Hex encoded HMAC-SHA256 of `payload` keyed by the secret.
    pub fn sign(&self, payload: &[u8]) -> Result<String, TransportError> {
        let mut mac = HmacSha256::new_from_slice(&self.api_secret)
            .map_err(|e| TransportError::Auth(e.to_string()))?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signature carried by the logon frame: `sign(timestamp + api_key)`.
    pub fn sign_logon(&self, timestamp_ms: u64) -> Result<String, TransportError> {
        self.sign(format!("{timestamp_ms}{}", self.api_key).as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_reference_vector() {
        // RFC 4231 test case 2
        let credential = Credential::new("key", "Jefe");
        assert_eq!(
            credential.sign(b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_logon_signature_covers_timestamp() {
        let credential = Credential::new("my-key", "my-secret");
        let a = credential.sign_logon(1_700_000_000_000).unwrap();
        let b = credential.sign_logon(1_700_000_000_001).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, credential.sign(b"1700000000000my-key").unwrap());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = Credential::new("my-key", "super-secret");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("my-key"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn test_validate() {
        assert!(Credential::new("k", "s").validate().is_ok());
        assert!(matches!(
            Credential::new(" ", "s").validate(),
            Err(ClientError::ConfigInvalid(_))
        ));
        assert!(matches!(
            Credential::new("k", "").validate(),
            Err(ClientError::ConfigInvalid(_))
        ));
    }
}
