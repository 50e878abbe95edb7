//! Credential fields and pluggable decryption
//!
//! Secret configuration values may be stored as `ENC(<base64>)`. The payload
//! is RSA-encrypted with a private key and decrypted here with the matching
//! public key. Decryption happens on first access and the plaintext is cached
//! on the field in memory only; serializing a [`Credential`] always writes the
//! original text back out.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, OnceLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

static CIPHER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ENC\((.*)\)$").expect("cipher marker pattern is valid"));

/// Extract the payload of an `ENC(...)` value
pub fn cipher_payload(value: &str) -> Option<&str> {
    CIPHER_MARKER
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// A configuration string that may hold ciphertext
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Credential {
    raw: String,
    plain: Arc<OnceLock<String>>,
}

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            plain: Arc::new(OnceLock::new()),
        }
    }

    /// The value exactly as configured
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// Whether the value carries the `ENC(...)` marker
    pub fn is_encrypted(&self) -> bool {
        CIPHER_MARKER.is_match(&self.raw)
    }

    /// Plaintext value, computing it with `decrypt` on first access
    pub fn reveal_with<F>(&self, decrypt: F) -> &str
    where
        F: FnOnce(&str) -> String,
    {
        self.plain.get_or_init(|| decrypt(&self.raw))
    }
}

impl From<String> for Credential {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Credential {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Credential> for String {
    fn from(credential: Credential) -> Self {
        credential.raw
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("\"\"")
        } else if self.is_encrypted() {
            f.write_str("ENC(..)")
        } else {
            f.write_str("***")
        }
    }
}

/// Turns configured ciphertext into plaintext
pub trait Decryptor: Send + Sync {
    /// Decrypt `ciphertext` for `config`. Implementations never fail: values
    /// they cannot handle are returned unchanged.
    fn decrypt(&self, config: &BackendConfig, ciphertext: &str) -> String;
}

/// Passes every value through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecryptor;

impl Decryptor for PlainDecryptor {
    fn decrypt(&self, _config: &BackendConfig, ciphertext: &str) -> String {
        ciphertext.to_string()
    }
}

/// Decrypts `ENC(...)` values with an RSA public key
///
/// The payload is the base64 of a block produced by a private-key operation
/// over a PKCS#1 v1.5 type 1 padded message. The key is a base64 DER
/// SubjectPublicKeyInfo; a backend's own `public_key` wins over the global one.
#[derive(Debug, Clone, Default)]
pub struct RsaDecryptor {
    public_key: Option<String>,
}

impl RsaDecryptor {
    pub fn new(public_key: Option<String>) -> Self {
        Self { public_key }
    }
}

impl Decryptor for RsaDecryptor {
    fn decrypt(&self, config: &BackendConfig, ciphertext: &str) -> String {
        let Some(payload) = cipher_payload(ciphertext) else {
            return ciphertext.to_string();
        };

        let Some(key) = config.public_key.as_deref().or(self.public_key.as_deref()) else {
            tracing::error!(
                backend = %config.name,
                "No public key configured for encrypted credential, using value as-is"
            );
            return ciphertext.to_string();
        };

        match public_decrypt(key, payload) {
            Ok(plain) => plain,
            Err(e) => {
                tracing::error!(
                    backend = %config.name,
                    error = %e,
                    "Credential decryption failed, using value as-is"
                );
                ciphertext.to_string()
            }
        }
    }
}

fn public_decrypt(public_key: &str, payload: &str) -> std::result::Result<String, String> {
    let der = STANDARD
        .decode(public_key.trim())
        .map_err(|e| format!("invalid public key encoding: {e}"))?;
    let key =
        RsaPublicKey::from_public_key_der(&der).map_err(|e| format!("invalid public key: {e}"))?;

    let block = STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid payload encoding: {e}"))?;
    let size = key.size();
    if block.len() != size {
        return Err(format!(
            "payload is {} bytes, expected {size}",
            block.len()
        ));
    }

    let message = BigUint::from_bytes_be(&block).modpow(key.e(), key.n());
    let mut encoded = message.to_bytes_be();
    if encoded.len() < size {
        let mut padded = vec![0u8; size - encoded.len()];
        padded.append(&mut encoded);
        encoded = padded;
    }

    let plain = strip_type1_padding(&encoded)?;
    String::from_utf8(plain.to_vec()).map_err(|e| format!("plaintext is not UTF-8: {e}"))
}

// 0x00 0x01 0xFF.. 0x00 message, at least eight 0xFF bytes
fn strip_type1_padding(encoded: &[u8]) -> std::result::Result<&[u8], String> {
    if encoded.len() < 11 || encoded[0] != 0x00 || encoded[1] != 0x01 {
        return Err("malformed padding header".to_string());
    }
    let separator = encoded[2..]
        .iter()
        .position(|&b| b != 0xFF)
        .map(|i| i + 2)
        .ok_or_else(|| "missing padding separator".to_string())?;
    if encoded[separator] != 0x00 || separator < 10 {
        return Err("malformed padding".to_string());
    }
    Ok(&encoded[separator + 1..])
}

/// Picks the decryptor for a backend
///
/// A backend may name a decryptor through `decryptor = "..."`; everything
/// else goes through the default one.
#[derive(Clone)]
pub struct CredentialResolver {
    default: Arc<dyn Decryptor>,
    named: HashMap<String, Arc<dyn Decryptor>>,
}

impl CredentialResolver {
    pub fn new(default: Arc<dyn Decryptor>) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    /// Resolver using [`RsaDecryptor`] with the given global public key
    pub fn rsa(public_key: Option<String>) -> Self {
        Self::new(Arc::new(RsaDecryptor::new(public_key)))
    }

    pub fn with_decryptor(mut self, name: impl Into<String>, decryptor: Arc<dyn Decryptor>) -> Self {
        self.named.insert(name.into(), decryptor);
        self
    }

    pub fn decryptor_for(&self, config: &BackendConfig) -> Arc<dyn Decryptor> {
        match config.decryptor.as_deref() {
            None => Arc::clone(&self.default),
            Some(name) => match self.named.get(name) {
                Some(decryptor) => Arc::clone(decryptor),
                None => {
                    tracing::warn!(
                        backend = %config.name,
                        decryptor = name,
                        "Unknown decryptor, falling back to default"
                    );
                    Arc::clone(&self.default)
                }
            },
        }
    }

    /// Plaintext access key for `config`
    pub fn access_key<'a>(&self, config: &'a BackendConfig) -> &'a str {
        let decryptor = self.decryptor_for(config);
        config
            .access_key
            .reveal_with(|raw| decryptor.decrypt(config, raw))
    }

    /// Plaintext secret key for `config`
    pub fn secret_key<'a>(&self, config: &'a BackendConfig) -> &'a str {
        let decryptor = self.decryptor_for(config);
        config
            .secret_key
            .reveal_with(|raw| decryptor.decrypt(config, raw))
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(Arc::new(RsaDecryptor::default()))
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.named.keys().collect();
        names.sort();
        f.debug_struct("CredentialResolver")
            .field("named", &names)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use rsa::{Pkcs1v15Sign, RsaPrivateKey};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn keypair() -> (RsaPrivateKey, String) {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 1024).expect("generate key");
        let der = private
            .to_public_key()
            .to_public_key_der()
            .expect("encode public key");
        (private, STANDARD.encode(der.as_bytes()))
    }

    fn encrypt(private: &RsaPrivateKey, plain: &str) -> String {
        let block = private
            .sign(Pkcs1v15Sign::new_unprefixed(), plain.as_bytes())
            .expect("private key operation");
        format!("ENC({})", STANDARD.encode(block))
    }

    fn config_with_key(public_key: Option<String>) -> BackendConfig {
        let mut config = BackendConfig::new("s3a", "http://localhost:9000", "ak", "sk");
        config.public_key = public_key;
        config
    }

    #[test]
    fn test_cipher_payload() {
        assert_eq!(cipher_payload("ENC(abc)"), Some("abc"));
        assert_eq!(cipher_payload("ENC()"), Some(""));
        assert_eq!(cipher_payload("plain"), None);
        assert_eq!(cipher_payload("xENC(abc)"), None);
    }

    #[test]
    fn test_plaintext_passes_through() {
        let decryptor = RsaDecryptor::new(None);
        let config = config_with_key(None);
        assert_eq!(decryptor.decrypt(&config, "minioadmin"), "minioadmin");
    }

    #[test]
    fn test_rsa_decrypts_marked_value() {
        let (private, public) = keypair();
        let cipher = encrypt(&private, "super-secret");

        let decryptor = RsaDecryptor::new(Some(public));
        let config = config_with_key(None);
        assert_eq!(decryptor.decrypt(&config, &cipher), "super-secret");
    }

    #[test]
    fn test_backend_key_overrides_global_key() {
        let (private, public) = keypair();
        let (_, other_public) = keypair();
        let cipher = encrypt(&private, "per-backend");

        let decryptor = RsaDecryptor::new(Some(other_public));
        let config = config_with_key(Some(public));
        assert_eq!(decryptor.decrypt(&config, &cipher), "per-backend");
    }

    #[test]
    fn test_failure_returns_ciphertext() {
        let (_, public) = keypair();
        let decryptor = RsaDecryptor::new(Some(public));
        let config = config_with_key(None);

        let garbage = "ENC(bm90LXZhbGlk)";
        assert_eq!(decryptor.decrypt(&config, garbage), garbage);
    }

    #[test]
    fn test_missing_key_returns_ciphertext() {
        let decryptor = RsaDecryptor::new(None);
        let config = config_with_key(None);
        assert_eq!(decryptor.decrypt(&config, "ENC(abc)"), "ENC(abc)");
    }

    struct CountingDecryptor(AtomicUsize);

    impl Decryptor for CountingDecryptor {
        fn decrypt(&self, _config: &BackendConfig, ciphertext: &str) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            ciphertext.to_uppercase()
        }
    }

    #[test]
    fn test_reveal_is_cached() {
        let counter = Arc::new(CountingDecryptor(AtomicUsize::new(0)));
        let resolver = CredentialResolver::new(counter.clone());
        let config = config_with_key(None);

        assert_eq!(resolver.access_key(&config), "AK");
        assert_eq!(resolver.access_key(&config), "AK");
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        // Raw value is untouched
        assert_eq!(config.access_key.raw(), "ak");
    }

    #[test]
    fn test_named_decryptor_selection() {
        let resolver = CredentialResolver::new(Arc::new(PlainDecryptor)).with_decryptor(
            "upper",
            Arc::new(CountingDecryptor(AtomicUsize::new(0))),
        );

        let mut config = config_with_key(None);
        assert_eq!(resolver.secret_key(&config), "sk");

        config = BackendConfig::new("s3b", "http://localhost:9000", "ak", "sk");
        config.decryptor = Some("upper".to_string());
        assert_eq!(resolver.secret_key(&config), "SK");
    }

    #[test]
    fn test_debug_redacts() {
        assert_eq!(format!("{:?}", Credential::new("secret")), "***");
        assert_eq!(format!("{:?}", Credential::new("ENC(xyz)")), "ENC(..)");
    }

    #[test]
    fn test_serialize_keeps_ciphertext() {
        let credential = Credential::new("ENC(abc)");
        credential.reveal_with(|_| "plain".to_string());
        let json = serde_json::to_string(&credential).unwrap();
        assert_eq!(json, "\"ENC(abc)\"");
    }
}
