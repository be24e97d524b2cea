//! RSA secret keys used during the token exchange.
//!
//! The proxy sits between both ends of the handshake, so it holds the
//! *private* halves: the server keypair (to read `clientRandKey`) and
//! every indexed client keypair (to read `serverRandKey`).

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

/// Errors from key parsing and sealed-value decryption.
#[derive(Debug)]
pub enum KeyError {
    /// The PEM document could not be parsed as a private key.
    InvalidPem,
    /// The sealed value is not valid Base64.
    Base64(base64::DecodeError),
    /// The RSA decryption itself failed (wrong key, bad padding).
    Decrypt(rsa::Error),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPem => write!(f, "not a PKCS#8 or PKCS#1 private key"),
            Self::Base64(e) => write!(f, "base64: {e}"),
            Self::Decrypt(e) => write!(f, "rsa decrypt: {e}"),
        }
    }
}

impl std::error::Error for KeyError {}

/// An RSA private key that opens Base64-wrapped sealed values.
pub struct SecretKey {
    inner: RsaPrivateKey,
}

impl SecretKey {
    /// Parse a PEM document, accepting PKCS#8 and legacy PKCS#1 framing.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|_| KeyError::InvalidPem)?;
        Ok(Self { inner })
    }

    /// Base64-decode `sealed` and decrypt it with PKCS#1 v1.5 padding.
    pub fn decrypt_base64(&self, sealed: &str) -> Result<Vec<u8>, KeyError> {
        let ciphertext = B64.decode(sealed).map_err(KeyError::Base64)?;
        self.inner.decrypt(Pkcs1v15Encrypt, &ciphertext).map_err(KeyError::Decrypt)
    }
}

impl From<RsaPrivateKey> for SecretKey {
    fn from(inner: RsaPrivateKey) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPublicKey;

    #[test]
    fn decrypts_what_the_peer_sealed() {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let public = RsaPublicKey::from(&private);

        let seed = 0x0102_0304_0506_0708u64.to_be_bytes();
        let sealed = public.encrypt(&mut rng, Pkcs1v15Encrypt, &seed).unwrap();
        let sealed_b64 = B64.encode(sealed);

        let key = SecretKey::from(private);
        assert_eq!(key.decrypt_base64(&sealed_b64).unwrap(), seed);
    }

    #[test]
    fn rejects_bad_base64() {
        let mut rng = rand::thread_rng();
        let key = SecretKey::from(RsaPrivateKey::new(&mut rng, 512).unwrap());
        assert!(matches!(key.decrypt_base64("!!!"), Err(KeyError::Base64(_))));
    }
}
